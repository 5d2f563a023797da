pub mod config;
pub mod http;
pub mod queue;
pub mod remote;
pub mod scheduler;

mod manager;

use std::sync::{Mutex, MutexGuard};

pub use config::{BulkFailure, BulkUpsertReport, PushOutcome, SyncResult, SyncState, SyncStatus};
pub use http::HttpRemoteStore;
pub use manager::{PendingSync, Result, ScheduleSynchronizer, SyncError, DEFAULT_REMOTE_TIMEOUT};
pub use queue::{QueueItem, SyncQueue};
pub use remote::{MemoryRemoteStore, RemoteError, RemoteStore};
pub use scheduler::{start_sync_scheduler, SyncScheduler, SyncSchedulerMessage};

/// A panicked writer leaves plain data behind; keep using it
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
