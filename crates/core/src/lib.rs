// Geo-Grid Rank Core
//
// This crate provides the DB-agnostic building blocks shared by the scheduler
// and the dispatcher binary:
// - Run and Point entities and their status values
// - The RankAcquisition trait (the external capability that performs one search)
// - An HTTP implementation of RankAcquisition that talks to the rank service
// - Telemetry initialisation (console logging + optional OTLP export)
//
// Key design decisions:
// - "Measured, not found" is stored as a sentinel rank so a point is written exactly once
// - Semantic outcomes (not found, blocked) are data, not errors; only transport faults are errors
// - Egress credentials are passed per request and never appear in logs

pub mod acquisition;
pub mod domain;
pub mod http_client;
pub mod telemetry;

pub use acquisition::{
    AcquisitionError, AcquisitionRequest, AcquisitionResponse, BusinessContext, EgressConfig,
    GeoOrigin, RankAcquisition, ReasonCode,
};
pub use domain::{Point, Run, RunStatus, NOT_FOUND_RANK};
pub use http_client::{HttpRankClient, HttpRankClientConfig};
