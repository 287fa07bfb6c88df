// Rank acquisition contract
//
// The scheduler never searches or parses anything itself. It hands an
// AcquisitionRequest to a RankAcquisition implementation and gets back either
// a structured response (rank or a semantic reason such as "not found") or a
// transport-level AcquisitionError that the retry policy may retry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Geographic origin of one search.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoOrigin {
    pub lat: f64,
    pub lng: f64,
}

/// The business whose position is being measured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessContext {
    pub id: String,
    pub name: String,
}

/// Egress identity used by the acquisition service (rotating proxy).
///
/// The credential is forwarded with every request but is redacted from
/// `Debug` output so it cannot leak into logs.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EgressConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl EgressConfig {
    /// Direct egress (no proxy).
    pub fn direct() -> Self {
        Self::default()
    }

    pub fn with_proxy(mut self, url: impl Into<String>) -> Self {
        self.proxy_url = Some(url.into());
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn is_direct(&self) -> bool {
        self.proxy_url.is_none()
    }
}

impl std::fmt::Debug for EgressConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EgressConfig")
            .field("proxy_url", &self.proxy_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Input for one rank acquisition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcquisitionRequest {
    pub keyword: String,
    pub origin: GeoOrigin,
    pub business: BusinessContext,
    pub egress: EgressConfig,
}

/// Why an acquisition produced (or did not produce) a rank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReasonCode {
    /// Business found in the results.
    Found,
    /// Results acquired, business not among them.
    NotFound,
    /// The search engine blocked the egress identity (captcha, consent wall).
    Blocked,
    /// The page loaded but no result list could be extracted.
    NoContent,
    /// Every attempt failed at the transport level.
    TransportError,
    /// The rank service refused the request outright.
    Rejected,
    /// The execution unit faulted while handling the task.
    WorkerFault,
    /// Reason reported by the service that this crate does not know.
    Other(String),
}

impl ReasonCode {
    pub fn as_str(&self) -> &str {
        match self {
            ReasonCode::Found => "found",
            ReasonCode::NotFound => "not_found",
            ReasonCode::Blocked => "blocked",
            ReasonCode::NoContent => "no_content",
            ReasonCode::TransportError => "transport_error",
            ReasonCode::Rejected => "rejected",
            ReasonCode::WorkerFault => "worker_fault",
            ReasonCode::Other(s) => s,
        }
    }

    /// Whether this outcome counts against the failure window.
    ///
    /// Anything short of a located rank counts: a run of "not found" or
    /// "blocked" answers is how a burned egress pool shows up.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, ReasonCode::Found)
    }
}

impl From<String> for ReasonCode {
    fn from(s: String) -> Self {
        match s.as_str() {
            "found" => ReasonCode::Found,
            "not_found" => ReasonCode::NotFound,
            "blocked" => ReasonCode::Blocked,
            "no_content" => ReasonCode::NoContent,
            "transport_error" => ReasonCode::TransportError,
            "rejected" => ReasonCode::Rejected,
            "worker_fault" => ReasonCode::WorkerFault,
            _ => ReasonCode::Other(s),
        }
    }
}

impl From<ReasonCode> for String {
    fn from(reason: ReasonCode) -> Self {
        reason.as_str().to_string()
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result of an acquisition that reached the search engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcquisitionResponse {
    /// 1-based position, `None` when the business was not located.
    pub rank: Option<i32>,
    pub reason: ReasonCode,
    /// Opaque payload from the service (e.g. the parsed result list).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<serde_json::Value>,
}

impl AcquisitionResponse {
    pub fn found(rank: i32) -> Self {
        Self {
            rank: Some(rank),
            reason: ReasonCode::Found,
            raw_content: None,
        }
    }

    pub fn unranked(reason: ReasonCode) -> Self {
        Self {
            rank: None,
            reason,
            raw_content: None,
        }
    }
}

/// Transport-level acquisition failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AcquisitionError {
    /// Connection refused, reset, timed out
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered but is overloaded or failing (429 / 5xx)
    #[error("rank service unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    /// The service refused the request itself (4xx); retrying will not help
    #[error("rank service rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The response body could not be decoded
    #[error("invalid response from rank service: {0}")]
    InvalidResponse(String),
}

impl AcquisitionError {
    pub fn transport(msg: impl Into<String>) -> Self {
        AcquisitionError::Transport(msg.into())
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AcquisitionError::Rejected { .. })
    }

    /// Reason recorded when this is the final error for a task
    pub fn reason(&self) -> ReasonCode {
        match self {
            AcquisitionError::Rejected { .. } => ReasonCode::Rejected,
            _ => ReasonCode::TransportError,
        }
    }
}

/// The external capability that performs one search from one origin.
#[async_trait]
pub trait RankAcquisition: Send + Sync + 'static {
    async fn acquire(
        &self,
        request: &AcquisitionRequest,
    ) -> Result<AcquisitionResponse, AcquisitionError>;
}
