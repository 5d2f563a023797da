use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use thiserror::Error;

use crate::flashcards::{DeckId, DeckSchedule};

use super::lock_or_recover;

/// Failure talking to the remote store, classified for retry decisions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote store unavailable: {0}")]
    Transient(String),
    #[error("remote store rejected request: {0}")]
    Permanent(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// Remote persistence of deck schedules for one user.
///
/// A missing deck is `Ok(None)`, never an error.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch(&self, deck_id: &str) -> Result<Option<DeckSchedule>, RemoteError>;

    async fn upsert(&self, deck_id: &str, schedule: &DeckSchedule) -> Result<(), RemoteError>;

    /// Write several decks; each entry succeeds or fails on its own
    async fn upsert_many(
        &self,
        entries: &[(DeckId, DeckSchedule)],
    ) -> Vec<(DeckId, Result<(), RemoteError>)> {
        let writes = entries.iter().map(|(deck_id, schedule)| async move {
            (deck_id.clone(), self.upsert(deck_id, schedule).await)
        });
        join_all(writes).await
    }

    /// Every deck schedule stored for the user
    async fn list_all(&self) -> Result<Vec<DeckSchedule>, RemoteError>;

    /// Re-acquire credentials before a retry
    async fn refresh_credentials(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// In-process remote store.
///
/// Backs local-only mode and tests. Failures can be injected either for the
/// next calls (`fail_next`) or for every write of one deck (`reject_deck`).
#[derive(Default)]
pub struct MemoryRemoteStore {
    rows: Mutex<HashMap<DeckId, DeckSchedule>>,
    injected: Mutex<VecDeque<RemoteError>>,
    rejected: Mutex<HashMap<DeckId, RemoteError>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    refreshes: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next remote call fail with `error`; calls queue up in order
    pub fn fail_next(&self, error: RemoteError) {
        lock_or_recover(&self.injected).push_back(error);
    }

    /// Fail every write of `deck_id` until cleared
    pub fn reject_deck(&self, deck_id: &str, error: RemoteError) {
        lock_or_recover(&self.rejected).insert(deck_id.to_string(), error);
    }

    pub fn accept_deck(&self, deck_id: &str) {
        lock_or_recover(&self.rejected).remove(deck_id);
    }

    /// Delay every call, e.g. to exercise timeouts
    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock_or_recover(&self.delay) = delay;
    }

    /// Write a row directly, as another device would
    pub fn insert(&self, deck_id: &str, mut schedule: DeckSchedule) {
        schedule.deck_id = deck_id.to_string();
        lock_or_recover(&self.rows).insert(deck_id.to_string(), schedule);
    }

    pub fn get(&self, deck_id: &str) -> Option<DeckSchedule> {
        lock_or_recover(&self.rows).get(deck_id).cloned()
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    async fn begin_call(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock_or_recover(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match lock_or_recover(&self.injected).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch(&self, deck_id: &str) -> Result<Option<DeckSchedule>, RemoteError> {
        self.begin_call().await?;
        Ok(self.get(deck_id))
    }

    async fn upsert(&self, deck_id: &str, schedule: &DeckSchedule) -> Result<(), RemoteError> {
        self.begin_call().await?;
        if let Some(error) = lock_or_recover(&self.rejected).get(deck_id) {
            return Err(error.clone());
        }
        self.insert(deck_id, schedule.clone());
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<DeckSchedule>, RemoteError> {
        self.begin_call().await?;
        let mut rows: Vec<DeckSchedule> = lock_or_recover(&self.rows).values().cloned().collect();
        rows.sort_by(|a, b| a.deck_id.cmp(&b.deck_id));
        Ok(rows)
    }

    async fn refresh_credentials(&self) -> Result<(), RemoteError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_missing_deck_is_none() {
        let store = MemoryRemoteStore::new();
        assert_eq!(store.fetch("nope").await, Ok(None));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let store = MemoryRemoteStore::new();
        store.fail_next(RemoteError::Transient("offline".into()));
        store.fail_next(RemoteError::Permanent("bad row".into()));

        assert!(store.fetch("a").await.unwrap_err().is_transient());
        assert!(!store.fetch("a").await.unwrap_err().is_transient());
        assert_eq!(store.fetch("a").await, Ok(None));
        assert_eq!(store.call_count(), 3);
    }

    #[tokio::test]
    async fn test_upsert_many_reports_each_entry() {
        let store = MemoryRemoteStore::new();
        store.reject_deck("b", RemoteError::Permanent("schema".into()));
        let now = Utc::now();
        let entries = vec![
            ("a".to_string(), DeckSchedule::new("a", 2, now)),
            ("b".to_string(), DeckSchedule::new("b", 1, now)),
        ];

        let results = store.upsert_many(&entries).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert!(store.get("a").is_some());
        assert!(store.get("b").is_none());
    }
}
