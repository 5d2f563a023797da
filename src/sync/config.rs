use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flashcards::DeckId;

/// Sync status of the schedule store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Current sync state
    pub status: SyncState,
    /// Last time the remote store acknowledged a write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Number of decks waiting to be pushed
    pub pending_changes: usize,
    /// Error message of the last failed remote call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            status: SyncState::Idle,
            last_sync: None,
            pending_changes: 0,
            error: None,
        }
    }
}

/// Current sync state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Everything written locally has reached the remote store
    Idle,
    /// Writes are queued or in flight
    Pending,
    /// Last remote call failed transiently; retried in the background
    Offline,
    /// Last remote call was rejected; needs an explicit flush
    Error,
}

/// Outcome of one background push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The remote store now holds this version
    Pushed { version: u64 },
    /// Nothing newer than what the remote store already holds
    AlreadySynced,
}

/// Per-entry result of a bulk upsert
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpsertReport {
    pub succeeded: Vec<DeckId>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFailure {
    pub deck_id: DeckId,
    pub error: String,
    pub transient: bool,
}

impl BulkUpsertReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of an explicit flush
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub decks_pushed: usize,
    pub decks_failed: usize,
    /// Pending pushes left afterwards
    pub remaining: usize,
    /// Duration of the flush in milliseconds
    pub duration_ms: u64,
}

impl SyncResult {
    pub fn success(&self) -> bool {
        self.decks_failed == 0
    }
}
