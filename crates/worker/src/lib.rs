// Geo-Grid Dispatch Worker
//
// Process entry point for the scheduler: reads settings from the environment,
// wires the PostgreSQL store and the HTTP rank client into a RunDispatcher,
// and drains every pending run once per invocation.

pub mod config;
pub mod shutdown;

pub use config::{ConfigError, WorkerSettings};
pub use shutdown::ShutdownSignal;
