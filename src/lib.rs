use std::sync::Arc;

use thiserror::Error;

pub mod clock;
pub mod config;
pub mod flashcards;
pub mod session;
pub mod storage;
pub mod sync;

use clock::Clock;
use config::{ConfigError, EngineConfig};
use session::{ReviewSession, StaticCardSource};
use storage::{LocalCache, StorageError};
use sync::{
    start_sync_scheduler, HttpRemoteStore, MemoryRemoteStore, RemoteStore, ScheduleSynchronizer,
    SyncError, SyncScheduler,
};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// A running engine: the review session plus its optional background flusher
pub struct Engine {
    pub session: ReviewSession,
    scheduler: Option<SyncScheduler>,
}

impl Engine {
    /// Wait for in-flight pushes and stop the background flusher
    pub async fn shutdown(self) {
        self.session.synchronizer().wait_idle().await;
        if let Some(scheduler) = self.scheduler {
            scheduler.stop().await;
        }
    }
}

/// Build an engine from config. Must run inside a tokio runtime.
///
/// Without a `[remote]` section, schedules live only in the local cache.
pub fn start(config: &EngineConfig, clock: Arc<dyn Clock>, background_sync: bool) -> Result<Engine, EngineError> {
    let data_dir = config.data_dir()?;
    let local = LocalCache::new(&data_dir)?;

    let remote: Arc<dyn RemoteStore> = match &config.remote {
        Some(remote) => {
            log::info!("Using remote store at {} for user {}", remote.base_url, remote.user_id);
            Arc::new(
                HttpRemoteStore::new(
                    &remote.base_url,
                    &remote.user_id,
                    remote.token.clone(),
                    remote.token_file.clone(),
                    config.remote_timeout(),
                )
                .map_err(SyncError::from)?,
            )
        }
        None => {
            log::info!("No remote store configured, running local-only");
            Arc::new(MemoryRemoteStore::new())
        }
    };

    let sync = ScheduleSynchronizer::new(local, remote, clock.clone())?
        .with_remote_timeout(config.remote_timeout())
        .with_queue_file(data_dir.join("sync_queue.json"))?;

    let cards = StaticCardSource::new();
    for (deck_id, deck) in &config.decks {
        cards.set(deck_id, deck.cards, deck.title.as_deref());
    }

    let scheduler = (background_sync && config.remote.is_some())
        .then(|| start_sync_scheduler(sync.clone(), config.flush_interval()));

    let session = ReviewSession::new(sync, Arc::new(cards), clock, config.scheduler_params());
    Ok(Engine { session, scheduler })
}
