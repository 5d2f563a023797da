use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use super::manager::ScheduleSynchronizer;

/// Messages to control the sync scheduler
#[derive(Debug)]
pub enum SyncSchedulerMessage {
    /// Push everything queued now, rejected decks included
    Flush,
    /// App closing
    Shutdown,
}

/// Handle for the periodic sync scheduler
pub struct SyncScheduler {
    sender: mpsc::Sender<SyncSchedulerMessage>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    /// Request an immediate flush
    pub fn flush(&self) {
        let _ = self.sender.try_send(SyncSchedulerMessage::Flush);
    }

    /// Shut down the scheduler
    pub fn shutdown(&self) {
        let _ = self.sender.try_send(SyncSchedulerMessage::Shutdown);
    }

    /// Shut down and wait for the loop to exit
    pub async fn stop(self) {
        self.shutdown();
        if let Err(e) = self.handle.await {
            log::warn!("Sync scheduler: task ended abnormally: {}", e);
        }
    }
}

/// Minimum flush interval in seconds (prevents runaway syncing)
pub const MIN_INTERVAL_SECS: u64 = 60;

/// Start the periodic sync scheduler.
///
/// Spawns a loop that retries transiently failed pushes every `interval`.
/// Rejected pushes are left for an explicit flush.
pub fn start_sync_scheduler(sync: ScheduleSynchronizer, interval: Duration) -> SyncScheduler {
    let (tx, rx) = mpsc::channel(32);

    let handle = tokio::spawn(async move {
        sync_scheduler_loop(sync, interval, rx).await;
    });

    SyncScheduler { sender: tx, handle }
}

/// Fixed-cadence retry timer; the first tick is one period out and
/// requested flushes do not shift it
fn retry_timer(period: Duration) -> Interval {
    let start = tokio::time::Instant::now() + period;
    let mut timer = tokio::time::interval_at(start, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Main scheduler loop
async fn sync_scheduler_loop(
    sync: ScheduleSynchronizer,
    interval: Duration,
    mut receiver: mpsc::Receiver<SyncSchedulerMessage>,
) {
    log::info!(
        "Sync scheduler started, flushing every {:.0}s",
        interval.as_secs_f64()
    );

    let mut timer = retry_timer(interval);
    loop {
        tokio::select! {
            _ = timer.tick() => {
                if sync.status().pending_changes == 0 {
                    continue;
                }
                let result = sync.retry_transient().await;
                if result.decks_failed > 0 {
                    log::warn!(
                        "Sync scheduler: {} deck(s) still failing, {} pending",
                        result.decks_failed,
                        result.remaining,
                    );
                }
            }

            msg = receiver.recv() => {
                match msg {
                    Some(SyncSchedulerMessage::Flush) => {
                        log::info!("Sync scheduler: flush requested");
                        sync.flush_pending().await;
                    }
                    Some(SyncSchedulerMessage::Shutdown) | None => {
                        log::info!("Sync scheduler: shutting down");
                        break;
                    }
                }
            }
        }
    }
}
