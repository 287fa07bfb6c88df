//! Persistence layer for runs and grid points
//!
//! This module provides:
//! - [`RunStore`] trait, the read/write contract the dispatcher needs
//! - [`InMemoryRunStore`] for testing
//! - [`PostgresRunStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::{InMemoryRunStore, StoreOperation};
pub use postgres::PostgresRunStore;
pub use store::{RunStore, StoreError};
