// Run and Point domain types
//
// A Run asks "where does this business rank for this keyword?" from every
// point of a geo-grid. Runs and their points are created outside this
// subsystem; the dispatcher only moves run status forward and writes ranks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rank stored for a point that was measured but where the business did not
/// appear within the scanned results.
pub const NOT_FOUND_RANK: i32 = 999;

/// Run execution status.
/// - `queued`: Run created, not yet picked up by a dispatcher
/// - `running`: A dispatcher has started measuring its points
/// - `done`: Every point has a rank
/// - `failed`: Run abandoned (set externally)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run created but not yet started.
    Queued,
    /// Run is being measured.
    Running,
    /// All points measured.
    Done,
    /// Run terminated without completing.
    Failed,
}

impl RunStatus {
    /// Parse the persisted form of a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "done" => Some(RunStatus::Done),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    /// Statuses a dispatcher picks up.
    pub fn is_pending(self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Done => "done",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run - one keyword/business measured across a whole geo-grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    /// Unique identifier for the run.
    pub id: Uuid,
    /// Search keyword typed at every grid point.
    pub keyword: String,
    /// Identifier of the business whose position is measured.
    pub business_id: String,
    /// Display name of the business, used to match results.
    pub business_name: String,
    /// Current status of the run.
    pub status: RunStatus,
    /// Timestamp when the run was created. Runs are processed oldest first.
    pub created_at: DateTime<Utc>,
}

/// Point - one geographic origin of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Point {
    /// Unique identifier for the point.
    pub id: Uuid,
    /// ID of the run this point belongs to.
    pub run_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    /// `None` until measured; [`NOT_FOUND_RANK`] when measured without a match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<i32>,
    /// Timestamp of the measurement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measured_at: Option<DateTime<Utc>>,
}

impl Point {
    /// Create an unmeasured point.
    pub fn new(run_id: Uuid, lat: f64, lng: f64) -> Self {
        Self {
            id: Uuid::now_v7(),
            run_id,
            lat,
            lng,
            rank: None,
            measured_at: None,
        }
    }

    pub fn is_measured(&self) -> bool {
        self.rank.is_some()
    }
}
