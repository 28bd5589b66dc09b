//! Run reports.

use crate::config::ExecutionMode;
use crate::types::{HostEndpoint, SearchResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome for one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostReport {
    pub host: HostEndpoint,
    /// Set when the host could not be reached or enumerated; `results` is
    /// then empty.
    pub connection_error: Option<String>,
    pub results: Vec<SearchResult>,
}

impl HostReport {
    pub fn is_reachable(&self) -> bool {
        self.connection_error.is_none()
    }
}

/// Whole autofocus run across every host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutofocusReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: ExecutionMode,
    pub hosts: Vec<HostReport>,
}

impl AutofocusReport {
    pub fn results(&self) -> impl Iterator<Item = &SearchResult> {
        self.hosts.iter().flat_map(|h| h.results.iter())
    }

    pub fn camera_count(&self) -> usize {
        self.results().count()
    }

    pub fn converged_count(&self) -> usize {
        self.results().filter(|r| r.converged).count()
    }

    /// Cameras that ended with a failure reason.
    pub fn fault_count(&self) -> usize {
        self.results().filter(|r| r.is_fault()).count()
    }

    pub fn unreachable_hosts(&self) -> impl Iterator<Item = &HostEndpoint> {
        self.hosts
            .iter()
            .filter(|h| !h.is_reachable())
            .map(|h| &h.host)
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
