use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::flashcards::DeckId;

/// Queue of deck schedules waiting to reach the remote store
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncQueue {
    pub items: Vec<QueueItem>,
}

/// A single pending deck push
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Unique ID for this queue item
    pub id: Uuid,
    pub deck_id: DeckId,
    /// Local version that must reach the remote store
    pub version: u64,
    /// When this item was queued
    pub created_at: DateTime<Utc>,
    /// Number of failed attempts
    pub retries: u32,
    /// Last error message if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Rejected by the store; only an explicit flush retries it
    #[serde(default)]
    pub permanent: bool,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Queue a deck push, replacing any older entry for the same deck
    pub fn enqueue(&mut self, deck_id: &str, version: u64, now: DateTime<Utc>) {
        if let Some(item) = self.items.iter_mut().find(|item| item.deck_id == deck_id) {
            if version > item.version {
                item.version = version;
                item.permanent = false;
            }
            return;
        }

        self.items.push(QueueItem {
            id: Uuid::new_v4(),
            deck_id: deck_id.to_string(),
            version,
            created_at: now,
            retries: 0,
            last_error: None,
            permanent: false,
        });
    }

    pub fn get(&self, deck_id: &str) -> Option<&QueueItem> {
        self.items.iter().find(|item| item.deck_id == deck_id)
    }

    /// Count pending pushes
    pub fn pending_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Decks to push; permanent failures only when `include_permanent`
    pub fn deck_ids(&self, include_permanent: bool) -> Vec<DeckId> {
        self.items
            .iter()
            .filter(|item| include_permanent || !item.permanent)
            .map(|item| item.deck_id.clone())
            .collect()
    }

    /// The remote store acknowledged `version`; drop the item if nothing newer is queued
    pub fn complete(&mut self, deck_id: &str, version: u64) {
        self.items
            .retain(|item| item.deck_id != deck_id || item.version > version);
    }

    /// Mark a push as failed with error
    pub fn fail(&mut self, deck_id: &str, error: String, permanent: bool) {
        if let Some(item) = self.items.iter_mut().find(|i| i.deck_id == deck_id) {
            item.retries += 1;
            item.last_error = Some(error);
            item.permanent = permanent;
        }
    }

    /// Load queue from file
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save queue to file
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_deduplication() {
        let mut queue = SyncQueue::new();
        let now = Utc::now();

        queue.enqueue("bio", 1, now);
        queue.enqueue("bio", 2, now);

        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.get("bio").unwrap().version, 2);
    }

    #[test]
    fn test_queue_different_decks() {
        let mut queue = SyncQueue::new();
        let now = Utc::now();

        queue.enqueue("bio", 1, now);
        queue.enqueue("chem", 1, now);

        assert_eq!(queue.pending_count(), 2);
    }

    #[test]
    fn test_complete_keeps_newer_version() {
        let mut queue = SyncQueue::new();
        queue.enqueue("bio", 3, Utc::now());

        queue.complete("bio", 2);
        assert_eq!(queue.pending_count(), 1);

        queue.complete("bio", 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_permanent_failure_cleared_by_newer_write() {
        let mut queue = SyncQueue::new();
        let now = Utc::now();
        queue.enqueue("bio", 1, now);
        queue.enqueue("chem", 1, now);
        queue.fail("bio", "422".into(), true);
        queue.fail("chem", "offline".into(), false);

        assert_eq!(queue.deck_ids(false), vec!["chem".to_string()]);
        assert_eq!(queue.deck_ids(true).len(), 2);
        assert_eq!(queue.get("bio").unwrap().retries, 1);

        queue.enqueue("bio", 2, now);
        assert!(!queue.get("bio").unwrap().permanent);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync_queue.json");
        let mut queue = SyncQueue::new();
        queue.enqueue("bio", 4, Utc::now());
        queue.fail("bio", "timeout".into(), false);
        queue.save(&path).unwrap();

        let loaded = SyncQueue::load(&path).unwrap();
        let item = loaded.get("bio").unwrap();
        assert_eq!(item.version, 4);
        assert_eq!(item.last_error.as_deref(), Some("timeout"));

        let missing = SyncQueue::load(&dir.path().join("absent.json")).unwrap();
        assert!(missing.is_empty());
    }
}
