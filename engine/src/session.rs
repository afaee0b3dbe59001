//! The sync session value published to observers.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Debounced network reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Connectivity {
    Online,
    #[default]
    Offline,
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Online => f.write_str("ONLINE"),
            Connectivity::Offline => f.write_str("OFFLINE"),
        }
    }
}

/// Whether a batch is currently outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
}

/// The single status label a status bar shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Online,
    Offline,
    Syncing,
}

/// Snapshot of sync state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSession {
    pub connectivity: Connectivity,
    pub phase: SyncPhase,
    /// When a sync response was last received (ms)
    pub last_synced_at: Option<Timestamp>,
    /// PENDING + IN_FLIGHT mutations
    pub queue_depth: usize,
    /// Set while the session token is rejected
    pub paused: bool,
    /// Nominal backoff delay in effect, if backing off
    pub retry_delay_ms: Option<u64>,
}

impl SyncSession {
    pub fn status(&self) -> SyncStatus {
        match (self.phase, self.connectivity) {
            (SyncPhase::Syncing, _) => SyncStatus::Syncing,
            (SyncPhase::Idle, Connectivity::Online) => SyncStatus::Online,
            (SyncPhase::Idle, Connectivity::Offline) => SyncStatus::Offline,
        }
    }

    pub fn is_online(&self) -> bool {
        self.connectivity == Connectivity::Online
    }
}
