//! Local schedule cache
//!
//! Process-wide keyed store of deck schedules, owned by the synchronizer.
//! Reads hit memory first and fall back to one JSON file per deck:
//! ```text
//! {data_dir}/schedules/
//! └── {deck-id}.json   # CachedDeck: schedule + last acknowledged remote version
//! ```
//! Whole aggregates are swapped behind an `Arc`, so a reader never observes
//! a half-written `schedules` vector. Disk failures are logged and the
//! in-memory copy stays authoritative for the session.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::flashcards::{DeckId, DeckSchedule};

use super::Result;

/// Snapshot of one cached deck
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub schedule: Arc<DeckSchedule>,
    /// Highest local version the remote store has acknowledged
    pub synced_version: u64,
}

impl CacheEntry {
    pub fn is_synced(&self) -> bool {
        self.synced_version >= self.schedule.version
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedDeck {
    schedule: DeckSchedule,
    #[serde(default)]
    synced_version: u64,
}

pub struct LocalCache {
    dir: Option<PathBuf>,
    entries: RwLock<HashMap<DeckId, CacheEntry>>,
}

impl LocalCache {
    /// Disk-backed cache rooted at `{data_dir}/schedules`
    pub fn new(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("schedules");
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: Some(dir),
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// Memory-only cache, gone with the process
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<DeckId, CacheEntry>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<DeckId, CacheEntry>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deck_path(&self, deck_id: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", file_stem(deck_id))))
    }

    fn read_file(path: &Path) -> Option<CachedDeck> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("Local cache: failed to read {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(cached) => Some(cached),
            Err(e) => {
                log::warn!("Local cache: ignoring unreadable {}: {}", path.display(), e);
                None
            }
        }
    }

    fn load_from_disk(&self, deck_id: &str) -> Option<CacheEntry> {
        let path = self.deck_path(deck_id)?;
        let cached = Self::read_file(&path)?;
        let mut schedule = cached.schedule;
        schedule.deck_id = deck_id.to_string();
        Some(CacheEntry {
            schedule: Arc::new(schedule),
            synced_version: cached.synced_version,
        })
    }

    fn persist(&self, deck_id: &str, entry: &CacheEntry) {
        let Some(path) = self.deck_path(deck_id) else {
            return;
        };
        let cached = CachedDeck {
            schedule: (*entry.schedule).clone(),
            synced_version: entry.synced_version,
        };
        let result = serde_json::to_string_pretty(&cached)
            .map_err(std::io::Error::from)
            .and_then(|data| {
                let tmp = path.with_extension("json.tmp");
                fs::write(&tmp, data)?;
                fs::rename(&tmp, &path)
            });
        if let Err(e) = result {
            log::warn!("Local cache: failed to persist deck {}: {}", deck_id, e);
        }
    }

    /// Entry for a deck, pulling it from disk into memory on a miss
    pub fn entry(&self, deck_id: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.read_entries().get(deck_id) {
            return Some(entry.clone());
        }

        let mut entries = self.write_entries();
        if let Some(entry) = entries.get(deck_id) {
            return Some(entry.clone());
        }
        let entry = self.load_from_disk(deck_id)?;
        entries.insert(deck_id.to_string(), entry.clone());
        Some(entry)
    }

    pub fn get(&self, deck_id: &str) -> Option<DeckSchedule> {
        self.entry(deck_id).map(|entry| (*entry.schedule).clone())
    }

    /// Store a locally produced schedule under the next version.
    ///
    /// Returns the stored copy, with `deck_id` and `version` filled in.
    pub fn put(&self, deck_id: &str, mut schedule: DeckSchedule) -> DeckSchedule {
        let mut entries = self.write_entries();
        let existing = match entries.get(deck_id) {
            Some(entry) => Some(entry.clone()),
            None => self.load_from_disk(deck_id),
        };

        let (current_version, synced_version) = existing
            .map(|e| (e.schedule.version, e.synced_version))
            .unwrap_or((0, 0));
        schedule.deck_id = deck_id.to_string();
        schedule.version = current_version.max(schedule.version) + 1;

        let entry = CacheEntry {
            schedule: Arc::new(schedule.clone()),
            synced_version,
        };
        self.persist(deck_id, &entry);
        entries.insert(deck_id.to_string(), entry);
        schedule
    }

    /// Offer a schedule read from the remote store.
    ///
    /// It is accepted only when nothing is cached or it carries a higher
    /// version than the local copy; local writes always win ties. A local
    /// copy the remote has not acknowledged is never replaced: it is
    /// renumbered past the remote version so its pending push still lands.
    pub fn merge_remote(&self, deck_id: &str, mut remote: DeckSchedule) -> bool {
        let mut entries = self.write_entries();
        let existing = match entries.get(deck_id) {
            Some(entry) => Some(entry.clone()),
            None => self.load_from_disk(deck_id),
        };

        if let Some(local) = &existing {
            if remote.version <= local.schedule.version {
                if !entries.contains_key(deck_id) {
                    entries.insert(deck_id.to_string(), local.clone());
                }
                return false;
            }
            if !local.is_synced() {
                let mut kept = (*local.schedule).clone();
                kept.version = remote.version + 1;
                log::info!(
                    "Local cache: deck {} has unpushed changes, keeping them as v{} over remote v{}",
                    deck_id,
                    kept.version,
                    remote.version
                );
                let entry = CacheEntry {
                    schedule: Arc::new(kept),
                    synced_version: local.synced_version,
                };
                self.persist(deck_id, &entry);
                entries.insert(deck_id.to_string(), entry);
                return false;
            }
        }

        remote.deck_id = deck_id.to_string();
        let entry = CacheEntry {
            synced_version: remote.version,
            schedule: Arc::new(remote),
        };
        self.persist(deck_id, &entry);
        entries.insert(deck_id.to_string(), entry);
        true
    }

    /// Record that the remote store holds `version` for this deck
    pub fn mark_synced(&self, deck_id: &str, version: u64) {
        let mut entries = self.write_entries();
        if let Some(entry) = entries.get_mut(deck_id) {
            if version > entry.synced_version {
                entry.synced_version = version;
                let snapshot = entry.clone();
                self.persist(deck_id, &snapshot);
            }
        }
    }

    /// Every cached deck, including ones only present on disk
    pub fn all(&self) -> HashMap<DeckId, DeckSchedule> {
        if let Some(dir) = &self.dir {
            let on_disk: Vec<CachedDeck> = match fs::read_dir(dir) {
                Ok(read_dir) => read_dir
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
                    .filter_map(|path| Self::read_file(&path))
                    .collect(),
                Err(e) => {
                    log::warn!("Local cache: failed to list {}: {}", dir.display(), e);
                    Vec::new()
                }
            };

            let mut entries = self.write_entries();
            for cached in on_disk {
                let deck_id = cached.schedule.deck_id.clone();
                if deck_id.is_empty() {
                    continue;
                }
                entries.entry(deck_id).or_insert_with(|| CacheEntry {
                    schedule: Arc::new(cached.schedule),
                    synced_version: cached.synced_version,
                });
            }
        }

        self.read_entries()
            .iter()
            .map(|(deck_id, entry)| (deck_id.clone(), (*entry.schedule).clone()))
            .collect()
    }

    /// Decks with local versions the remote store has not acknowledged
    pub fn unsynced(&self) -> Vec<DeckId> {
        let mut ids: Vec<DeckId> = self
            .read_entries()
            .iter()
            .filter(|(_, entry)| !entry.is_synced())
            .map(|(deck_id, _)| deck_id.clone())
            .collect();
        ids.sort();
        ids
    }
}

/// Deck ids are opaque, so escape anything that is not filename-safe
fn file_stem(deck_id: &str) -> String {
    deck_id
        .bytes()
        .map(|b| match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => (b as char).to_string(),
            other => format!("%{:02X}", other),
        })
        .collect()
}
