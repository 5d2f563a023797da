use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::clock::Clock;
use crate::flashcards::{DeckId, DeckSchedule, ValidationError};
use crate::storage::{LocalCache, StorageError};

use super::config::{BulkFailure, BulkUpsertReport, PushOutcome, SyncResult, SyncState, SyncStatus};
use super::lock_or_recover;
use super::queue::SyncQueue;
use super::remote::{RemoteError, RemoteStore};

/// Default bound on a single remote call
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Remote store unavailable: {0}")]
    TransientStore(String),
    #[error("Remote store rejected the request: {0}")]
    PermanentStore(String),
    #[error("Cannot repair deck {deck_id} to {card_count} cards")]
    DriftRepair { deck_id: DeckId, card_count: i64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("No async runtime available: {0}")]
    Runtime(String),
    #[error("Deck not found: {0}")]
    DeckNotFound(DeckId),
    #[error("Background push failed: {0}")]
    Task(String),
}

impl From<RemoteError> for SyncError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Transient(message) => SyncError::TransientStore(message),
            RemoteError::Permanent(message) => SyncError::PermanentStore(message),
        }
    }
}

impl SyncError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientStore(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

type DeckLocks = Mutex<HashMap<DeckId, Arc<tokio::sync::Mutex<()>>>>;

fn deck_lock(locks: &DeckLocks, deck_id: &str) -> Arc<tokio::sync::Mutex<()>> {
    lock_or_recover(locks)
        .entry(deck_id.to_string())
        .or_default()
        .clone()
}

/// Where a resolved schedule came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Local,
    Remote,
    Fresh,
    /// Remote read failed; defaults stand in and are not written back
    Fallback,
}

/// A local write whose remote push runs in the background.
///
/// Dropping it leaves the push running; `wait` observes the outcome.
#[derive(Debug)]
pub struct PendingSync {
    pub deck_id: DeckId,
    /// The aggregate as stored locally, version included
    pub schedule: DeckSchedule,
    handle: JoinHandle<Result<PushOutcome>>,
}

impl PendingSync {
    pub fn version(&self) -> u64 {
        self.schedule.version
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn wait(self) -> Result<PushOutcome> {
        self.handle
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?
    }
}

/// Keeps deck schedules in the local cache and mirrors them to a remote store.
///
/// Local writes are synchronous and always win; remote pushes happen in
/// tracked background tasks, one at a time per deck, and always send the
/// newest local snapshot.
#[derive(Clone)]
pub struct ScheduleSynchronizer {
    local: Arc<LocalCache>,
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    queue: Arc<Mutex<SyncQueue>>,
    queue_path: Option<PathBuf>,
    status: Arc<Mutex<SyncStatus>>,
    edit_locks: Arc<DeckLocks>,
    push_locks: Arc<DeckLocks>,
    remote_timeout: Duration,
    tasks: TaskTracker,
    runtime: Handle,
}

impl ScheduleSynchronizer {
    /// Must be called from within a tokio runtime; pushes are spawned on it
    pub fn new(local: LocalCache, remote: Arc<dyn RemoteStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| SyncError::Runtime(e.to_string()))?;

        Ok(Self {
            local: Arc::new(local),
            remote,
            clock,
            queue: Arc::new(Mutex::new(SyncQueue::new())),
            queue_path: None,
            status: Arc::new(Mutex::new(SyncStatus::default())),
            edit_locks: Arc::new(Mutex::new(HashMap::new())),
            push_locks: Arc::new(Mutex::new(HashMap::new())),
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            tasks: TaskTracker::new(),
            runtime,
        })
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Persist pending pushes at `path`, picking up what a previous run left
    pub fn with_queue_file(mut self, path: PathBuf) -> Result<Self> {
        let mut queue = SyncQueue::load(&path)?;
        let now = self.clock.now();

        // Pull on-disk decks into memory so unacknowledged ones are found
        self.local.all();
        for deck_id in self.local.unsynced() {
            if let Some(entry) = self.local.entry(&deck_id) {
                queue.enqueue(&deck_id, entry.schedule.version, now);
            }
        }
        if !queue.is_empty() {
            log::info!("Sync: restored {} pending deck push(es)", queue.pending_count());
        }

        {
            let mut status = lock_or_recover(&self.status);
            status.pending_changes = queue.pending_count();
            if !queue.is_empty() {
                status.status = SyncState::Pending;
            }
        }
        self.queue = Arc::new(Mutex::new(queue));
        self.queue_path = Some(path);
        self.persist_queue(&lock_or_recover(&self.queue));
        Ok(self)
    }

    /// Cached schedule, memory first then disk; never touches the network
    pub fn load_local(&self, deck_id: &str) -> Option<DeckSchedule> {
        self.local.get(deck_id)
    }

    /// Every locally cached schedule
    pub fn load_all_local(&self) -> HashMap<DeckId, DeckSchedule> {
        self.local.all()
    }

    /// Read one deck from the remote store.
    ///
    /// A newer remote copy is merged into the local cache; a failed read
    /// leaves the cache untouched.
    pub async fn load_remote(&self, deck_id: &str) -> Result<Option<DeckSchedule>> {
        let fetched = self
            .call_remote("read", deck_id, || self.remote.fetch(deck_id))
            .await;

        match fetched {
            Ok(Some(mut remote)) => {
                if let Err(e) = remote.validate() {
                    log::warn!("Sync: remote copy of deck {} is invalid: {}", deck_id, e);
                    return Err(e.into());
                }
                remote.deck_id = deck_id.to_string();
                if self.local.merge_remote(deck_id, remote.clone()) {
                    log::debug!("Sync: took remote deck {} v{}", deck_id, remote.version);
                }
                Ok(Some(remote))
            }
            Ok(None) => Ok(None),
            Err(error) => {
                log::warn!("Sync: failed to read deck {}: {}", deck_id, error);
                self.record_failure(None, &error);
                Err(error.into())
            }
        }
    }

    async fn resolve(&self, deck_id: &str, card_count: i64) -> Result<(DeckSchedule, Origin, bool)> {
        if card_count < 0 {
            return Err(SyncError::DriftRepair {
                deck_id: deck_id.to_string(),
                card_count,
            });
        }
        let now = self.clock.now();

        let (mut schedule, origin) = match self.load_local(deck_id) {
            Some(local) => (local, Origin::Local),
            None => match self.load_remote(deck_id).await {
                Ok(Some(_)) => match self.load_local(deck_id) {
                    Some(merged) => (merged, Origin::Remote),
                    None => (DeckSchedule::new(deck_id, 0, now), Origin::Fresh),
                },
                Ok(None) => (DeckSchedule::new(deck_id, 0, now), Origin::Fresh),
                Err(SyncError::Validation(e)) => return Err(e.into()),
                Err(error) => {
                    log::warn!("Sync: using default schedule for deck {}: {}", deck_id, error);
                    (DeckSchedule::new(deck_id, 0, now), Origin::Fallback)
                }
            },
        };

        let repaired = schedule
            .repair_len(card_count, now)
            .map_err(|_| SyncError::DriftRepair {
                deck_id: deck_id.to_string(),
                card_count,
            })?;
        Ok((schedule, origin, repaired))
    }

    /// Local copy, else remote copy, else a fresh schedule, sized to `card_count`.
    ///
    /// A schedule whose length had to be repaired is saved back.
    pub async fn load_authoritative(&self, deck_id: &str, card_count: i64) -> Result<DeckSchedule> {
        let lock = deck_lock(&self.edit_locks, deck_id);
        let _guard = lock.lock().await;

        let (schedule, origin, repaired) = self.resolve(deck_id, card_count).await?;
        if repaired && origin != Origin::Fallback {
            log::info!("Sync: resized deck {} to {} cards", deck_id, card_count);
            return Ok(self.save(deck_id, schedule).schedule);
        }
        Ok(schedule)
    }

    /// Read-modify-write of one deck under its write lock
    pub async fn update<T, F>(&self, deck_id: &str, card_count: i64, edit: F) -> Result<(T, PendingSync)>
    where
        F: FnOnce(&mut DeckSchedule) -> Result<T>,
    {
        let lock = deck_lock(&self.edit_locks, deck_id);
        let _guard = lock.lock().await;

        let (mut schedule, _, _) = self.resolve(deck_id, card_count).await?;
        let value = edit(&mut schedule)?;
        Ok((value, self.save(deck_id, schedule)))
    }

    /// Clear the cancel flag of a deck
    pub async fn revive(&self, deck_id: &str, card_count: i64) -> Result<PendingSync> {
        let ((), pending) = self
            .update(deck_id, card_count, |schedule| {
                schedule.is_cancelled = false;
                Ok(())
            })
            .await?;
        log::info!("Sync: revived deck {}", deck_id);
        Ok(pending)
    }

    /// Write locally under the next version, then push in the background
    pub fn save(&self, deck_id: &str, mut schedule: DeckSchedule) -> PendingSync {
        schedule.updated_at = Some(self.clock.now());
        let stored = self.local.put(deck_id, schedule);
        self.enqueue(deck_id, stored.version);
        log::debug!("Sync: saved deck {} v{}", deck_id, stored.version);

        let this = self.clone();
        let id = deck_id.to_string();
        let handle = self
            .tasks
            .spawn_on(async move { this.push_deck(&id).await }, &self.runtime);

        PendingSync {
            deck_id: deck_id.to_string(),
            schedule: stored,
            handle,
        }
    }

    /// Save several decks and push them in one batch.
    ///
    /// Every valid entry is written locally; remote failures are reported
    /// per deck and stay queued. An entry whose version is older than the
    /// cached copy was read before another write landed, so the cached copy
    /// is pushed in its place.
    pub async fn bulk_upsert(&self, entries: Vec<(DeckId, DeckSchedule)>) -> Result<BulkUpsertReport> {
        let mut report = BulkUpsertReport::default();
        let mut valid: Vec<(DeckId, DeckSchedule)> = Vec::with_capacity(entries.len());

        for (deck_id, schedule) in entries {
            match schedule.validate() {
                Ok(()) => valid.push((deck_id, schedule)),
                Err(e) => report.failed.push(BulkFailure {
                    deck_id,
                    error: e.to_string(),
                    transient: false,
                }),
            }
        }
        if valid.is_empty() {
            return Ok(report);
        }

        // Lock in deck order so concurrent batches cannot deadlock
        let mut edit_ids: Vec<DeckId> = valid.iter().map(|(id, _)| id.clone()).collect();
        edit_ids.sort();
        edit_ids.dedup();
        let edit_locks: Vec<_> = edit_ids.iter().map(|id| deck_lock(&self.edit_locks, id)).collect();
        let mut edit_guards = Vec::with_capacity(edit_locks.len());
        for lock in &edit_locks {
            edit_guards.push(lock.lock().await);
        }

        let mut stored: Vec<(DeckId, DeckSchedule)> = Vec::with_capacity(valid.len());
        for (deck_id, mut schedule) in valid {
            let saved = match self.local.entry(&deck_id) {
                Some(current) if current.schedule.version > schedule.version => {
                    log::debug!(
                        "Sync: deck {} changed to v{} since v{} was read, keeping the newer copy",
                        deck_id,
                        current.schedule.version,
                        schedule.version
                    );
                    (*current.schedule).clone()
                }
                _ => {
                    schedule.updated_at = Some(self.clock.now());
                    let saved = self.local.put(&deck_id, schedule);
                    self.enqueue(&deck_id, saved.version);
                    saved
                }
            };
            match stored.iter_mut().find(|(id, _)| *id == deck_id) {
                Some(slot) => slot.1 = saved,
                None => stored.push((deck_id, saved)),
            }
        }
        drop(edit_guards);

        // Lock in deck order so concurrent batches cannot deadlock
        let mut ids: Vec<&DeckId> = stored.iter().map(|(id, _)| id).collect();
        ids.sort();
        let locks: Vec<_> = ids.iter().map(|id| deck_lock(&self.push_locks, id)).collect();
        let mut guards = Vec::with_capacity(locks.len());
        for lock in &locks {
            guards.push(lock.lock().await);
        }

        let mut results = self.upsert_batch(&stored).await;
        let retry: Vec<(DeckId, DeckSchedule)> = results
            .iter()
            .filter(|(_, result)| matches!(result, Err(e) if e.is_transient()))
            .filter_map(|(id, _)| stored.iter().find(|(s, _)| s == id).cloned())
            .collect();
        if !retry.is_empty() {
            log::warn!(
                "Sync: {} deck(s) failed transiently in bulk write, retrying once",
                retry.len()
            );
            self.refresh_credentials().await;
            for (deck_id, result) in self.upsert_batch(&retry).await {
                if let Some(slot) = results.iter_mut().find(|(id, _)| *id == deck_id) {
                    slot.1 = result;
                }
            }
        }

        for (deck_id, result) in results {
            let version = stored
                .iter()
                .find(|(id, _)| *id == deck_id)
                .map(|(_, s)| s.version)
                .unwrap_or_default();
            match result {
                Ok(()) => {
                    self.local.mark_synced(&deck_id, version);
                    self.complete(&deck_id, version);
                    report.succeeded.push(deck_id);
                }
                Err(error) => {
                    log::warn!("Sync: bulk write of deck {} failed: {}", deck_id, error);
                    self.record_failure(Some(&deck_id), &error);
                    report.failed.push(BulkFailure {
                        deck_id,
                        error: error.to_string(),
                        transient: error.is_transient(),
                    });
                }
            }
        }
        drop(guards);

        log::info!(
            "Sync: bulk write finished, {} ok, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Fetch every remote schedule in one round-trip and merge it into the cache.
    ///
    /// Returns the reconciled view, local copies included.
    pub async fn load_all(&self) -> Result<HashMap<DeckId, DeckSchedule>> {
        let rows = match self
            .call_remote("list", "all decks", || self.remote.list_all())
            .await
        {
            Ok(rows) => rows,
            Err(error) => {
                log::warn!("Sync: failed to list decks: {}", error);
                self.record_failure(None, &error);
                return Err(error.into());
            }
        };

        let mut accepted = 0;
        for row in rows {
            if row.deck_id.is_empty() {
                log::warn!("Sync: skipping remote schedule without deck id");
                continue;
            }
            if let Err(e) = row.validate() {
                log::warn!("Sync: skipping invalid remote deck {}: {}", row.deck_id, e);
                continue;
            }
            let deck_id = row.deck_id.clone();
            if self.local.merge_remote(&deck_id, row) {
                accepted += 1;
            }
        }
        log::debug!("Sync: merged {} remote deck(s)", accepted);

        Ok(self.local.all())
    }

    /// Push every queued deck, including ones the store rejected before
    pub async fn flush_pending(&self) -> SyncResult {
        self.flush(true).await
    }

    /// Push queued decks whose last failure may clear up on its own
    pub async fn retry_transient(&self) -> SyncResult {
        self.flush(false).await
    }

    async fn flush(&self, include_permanent: bool) -> SyncResult {
        let started = Instant::now();
        let deck_ids = lock_or_recover(&self.queue).deck_ids(include_permanent);
        let mut result = SyncResult::default();

        for deck_id in deck_ids {
            match self.push_deck(&deck_id).await {
                Ok(_) => result.decks_pushed += 1,
                Err(_) => result.decks_failed += 1,
            }
        }

        result.remaining = lock_or_recover(&self.queue).pending_count();
        result.duration_ms = started.elapsed().as_millis() as u64;
        if result.decks_pushed + result.decks_failed > 0 {
            log::info!(
                "Sync: flush pushed {} deck(s), {} failed, {} remaining",
                result.decks_pushed,
                result.decks_failed,
                result.remaining
            );
        }
        result
    }

    pub fn status(&self) -> SyncStatus {
        let mut status = lock_or_recover(&self.status).clone();
        status.pending_changes = lock_or_recover(&self.queue).pending_count();
        status
    }

    /// Wait until every background push started so far has finished
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    async fn push_deck(&self, deck_id: &str) -> Result<PushOutcome> {
        let lock = deck_lock(&self.push_locks, deck_id);
        let _guard = lock.lock().await;

        let Some(entry) = self.local.entry(deck_id) else {
            self.complete(deck_id, u64::MAX);
            return Ok(PushOutcome::AlreadySynced);
        };
        if entry.is_synced() {
            self.complete(deck_id, entry.synced_version);
            return Ok(PushOutcome::AlreadySynced);
        }

        let version = entry.schedule.version;
        let schedule = entry.schedule;
        let pushed = self
            .call_remote("push", deck_id, || self.remote.upsert(deck_id, &schedule))
            .await;

        match pushed {
            Ok(()) => {
                self.local.mark_synced(deck_id, version);
                self.complete(deck_id, version);
                log::debug!("Sync: pushed deck {} v{}", deck_id, version);
                Ok(PushOutcome::Pushed { version })
            }
            Err(error) => {
                log::warn!("Sync: push of deck {} v{} failed: {}", deck_id, version, error);
                self.record_failure(Some(deck_id), &error);
                Err(error.into())
            }
        }
    }

    /// One remote call with a timeout, retried once after a credential
    /// refresh when the failure is transient
    async fn call_remote<T, F, Fut>(&self, what: &str, target: &str, mut call: F) -> std::result::Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, RemoteError>>,
    {
        match self.timed(call()).await {
            Err(error) if error.is_transient() => {
                log::info!("Sync: {} of {} failed ({}), retrying once", what, target, error);
                self.refresh_credentials().await;
                self.timed(call()).await
            }
            result => result,
        }
    }

    async fn timed<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, RemoteError>>,
    ) -> std::result::Result<T, RemoteError> {
        match tokio::time::timeout(self.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error()),
        }
    }

    fn timeout_error(&self) -> RemoteError {
        RemoteError::Transient(format!(
            "timed out after {:.1}s",
            self.remote_timeout.as_secs_f64()
        ))
    }

    async fn refresh_credentials(&self) {
        if let Err(e) = self.timed(self.remote.refresh_credentials()).await {
            log::warn!("Sync: credential refresh failed: {}", e);
        }
    }

    async fn upsert_batch(
        &self,
        entries: &[(DeckId, DeckSchedule)],
    ) -> Vec<(DeckId, std::result::Result<(), RemoteError>)> {
        match tokio::time::timeout(self.remote_timeout, self.remote.upsert_many(entries)).await {
            Ok(results) => results,
            Err(_) => entries
                .iter()
                .map(|(deck_id, _)| (deck_id.clone(), Err(self.timeout_error())))
                .collect(),
        }
    }

    fn enqueue(&self, deck_id: &str, version: u64) {
        let mut queue = lock_or_recover(&self.queue);
        queue.enqueue(deck_id, version, self.clock.now());
        self.persist_queue(&queue);

        let mut status = lock_or_recover(&self.status);
        status.pending_changes = queue.pending_count();
        if status.status == SyncState::Idle {
            status.status = SyncState::Pending;
        }
    }

    fn complete(&self, deck_id: &str, version: u64) {
        let mut queue = lock_or_recover(&self.queue);
        queue.complete(deck_id, version);
        self.persist_queue(&queue);

        let mut status = lock_or_recover(&self.status);
        status.pending_changes = queue.pending_count();
        status.last_sync = Some(self.clock.now());
        if queue.is_empty() {
            status.status = SyncState::Idle;
            status.error = None;
        }
    }

    fn record_failure(&self, deck_id: Option<&str>, error: &RemoteError) {
        let mut queue = lock_or_recover(&self.queue);
        if let Some(deck_id) = deck_id {
            queue.fail(deck_id, error.to_string(), !error.is_transient());
            self.persist_queue(&queue);
        }

        let mut status = lock_or_recover(&self.status);
        status.pending_changes = queue.pending_count();
        status.status = if error.is_transient() {
            SyncState::Offline
        } else {
            SyncState::Error
        };
        status.error = Some(error.to_string());
    }

    fn persist_queue(&self, queue: &SyncQueue) {
        if let Some(path) = &self.queue_path {
            if let Err(e) = queue.save(path) {
                log::warn!("Sync: failed to save queue to {}: {}", path.display(), e);
            }
        }
    }
}
