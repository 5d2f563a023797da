//! Review session API
//!
//! The surface a UI drives: grade a card, compute what is due, build an
//! interleaved session, and manage exam dates and cancellation. Pure
//! scheduling comes from `flashcards`; persistence goes through the
//! `ScheduleSynchronizer`.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::clock::Clock;
use crate::flashcards::{
    compute_due, interleave, next_schedule_with, preview_due, DeckId, DeckSchedule, DueSource, Grade,
    ImmediateRequeue, ScheduleState, SchedulerParams, SessionCard,
};
use crate::sync::{PendingSync, ScheduleSynchronizer, SyncError, SyncResult, SyncStatus};

/// Supplies the current card count of each deck
pub trait CardSource: Send + Sync {
    /// `None` when the deck is unknown
    fn card_count(&self, deck_id: &str) -> Option<i64>;

    fn title(&self, _deck_id: &str) -> Option<String> {
        None
    }
}

/// Card counts held in memory
#[derive(Debug, Default)]
pub struct StaticCardSource {
    decks: RwLock<HashMap<DeckId, (i64, Option<String>)>>,
}

impl StaticCardSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deck(self, deck_id: &str, cards: i64, title: Option<&str>) -> Self {
        self.set(deck_id, cards, title);
        self
    }

    pub fn set(&self, deck_id: &str, cards: i64, title: Option<&str>) {
        self.decks
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(deck_id.to_string(), (cards, title.map(str::to_string)));
    }
}

impl CardSource for StaticCardSource {
    fn card_count(&self, deck_id: &str) -> Option<i64> {
        self.decks
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(deck_id)
            .map(|(cards, _)| *cards)
    }

    fn title(&self, deck_id: &str) -> Option<String> {
        self.decks
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(deck_id)
            .and_then(|(_, title)| title.clone())
    }
}

/// Result of grading one card
#[derive(Debug)]
pub struct GradeOutcome {
    pub state: ScheduleState,
    /// Came back due immediately and is queued for this sitting
    pub requeued: bool,
    /// Background push of the updated deck
    pub sync: PendingSync,
}

pub struct ReviewSession {
    sync: ScheduleSynchronizer,
    cards: Arc<dyn CardSource>,
    clock: Arc<dyn Clock>,
    params: SchedulerParams,
    requeue: Mutex<ImmediateRequeue>,
}

impl ReviewSession {
    pub fn new(
        sync: ScheduleSynchronizer,
        cards: Arc<dyn CardSource>,
        clock: Arc<dyn Clock>,
        params: SchedulerParams,
    ) -> Self {
        Self {
            sync,
            cards,
            clock,
            params,
            requeue: Mutex::new(ImmediateRequeue::new()),
        }
    }

    pub fn synchronizer(&self) -> &ScheduleSynchronizer {
        &self.sync
    }

    fn card_count(&self, deck_id: &str) -> Result<i64, SyncError> {
        self.cards
            .card_count(deck_id)
            .ok_or_else(|| SyncError::DeckNotFound(deck_id.to_string()))
    }

    fn requeue(&self) -> std::sync::MutexGuard<'_, ImmediateRequeue> {
        self.requeue.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Due indices plus cards requeued by grades in this sitting
    fn due_with_requeue(&self, deck_id: &str, deck: &DeckSchedule, now: DateTime<Utc>) -> BTreeSet<usize> {
        if deck.is_cancelled || deck.exam_expired(now) {
            return BTreeSet::new();
        }
        let mut due = compute_due(deck, now);
        let len = deck.schedules.len();
        due.extend(self.requeue().for_deck(deck_id).into_iter().filter(|&i| i < len));
        due
    }

    /// Apply a grade and persist the deck.
    ///
    /// The local copy is updated before this returns; the remote push runs
    /// in the background.
    pub async fn grade_card(&self, deck_id: &str, card_index: usize, grade: Grade) -> Result<GradeOutcome, SyncError> {
        let count = self.card_count(deck_id)?;
        let now = self.clock.now();
        let params = &self.params;

        let ((state, revived), sync) = self
            .sync
            .update(deck_id, count, |deck| {
                let mut current = deck.state(card_index)?.clone();
                current.validate()?;
                if deck.exam_date.is_some() {
                    current.exam_date = deck.exam_date;
                }
                let next = next_schedule_with(params, &current, grade, now);
                deck.schedules[card_index] = next.clone();
                // Studying a cancelled deck brings it back
                let revived = std::mem::replace(&mut deck.is_cancelled, false);
                Ok((next, revived))
            })
            .await?;
        if revived {
            log::info!("Revived deck {} by grading card {}", deck_id, card_index);
        }

        let requeued = self.requeue().record(deck_id, card_index, state.due, now);
        log::debug!(
            "Graded card {} of deck {} as {}, due {}",
            card_index,
            deck_id,
            grade,
            state.due
        );

        Ok(GradeOutcome { state, requeued, sync })
    }

    pub async fn get_due_queue(&self, deck_id: &str) -> Result<BTreeSet<usize>, SyncError> {
        let count = self.card_count(deck_id)?;
        let deck = self.sync.load_authoritative(deck_id, count).await?;
        Ok(self.due_with_requeue(deck_id, &deck, self.clock.now()))
    }

    /// Due queues for several decks from a single prefetch.
    ///
    /// Falls back to the local cache when the remote store is unreachable.
    /// Decks whose length had to be repaired are written back in one batch.
    pub async fn get_due_queue_all(&self, deck_ids: &[DeckId]) -> Result<HashMap<DeckId, BTreeSet<usize>>, SyncError> {
        let mut known = match self.sync.load_all().await {
            Ok(all) => all,
            Err(e) => {
                log::warn!("Remote prefetch failed, using local schedules: {}", e);
                self.sync.load_all_local()
            }
        };
        let now = self.clock.now();

        let mut queues = HashMap::with_capacity(deck_ids.len());
        let mut repaired = Vec::new();
        for deck_id in deck_ids {
            let count = self.card_count(deck_id)?;
            let mut deck = known
                .remove(deck_id)
                .unwrap_or_else(|| DeckSchedule::new(deck_id.as_str(), 0, now));
            if deck
                .repair_len(count, now)
                .map_err(|_| SyncError::DriftRepair {
                    deck_id: deck_id.clone(),
                    card_count: count,
                })?
            {
                repaired.push((deck_id.clone(), deck.clone()));
            }
            queues.insert(deck_id.clone(), self.due_with_requeue(deck_id, &deck, now));
        }

        if !repaired.is_empty() {
            let report = self.sync.bulk_upsert(repaired).await?;
            for failure in &report.failed {
                log::warn!("Could not store repaired deck {}: {}", failure.deck_id, failure.error);
            }
        }
        Ok(queues)
    }

    /// Interleave due queues into one session
    pub fn start_interleaved_session(&self, queues: &HashMap<DeckId, BTreeSet<usize>>) -> Vec<SessionCard> {
        self.start_interleaved_session_with(queues, &mut rand::thread_rng())
    }

    pub fn start_interleaved_session_with<R: Rng + ?Sized>(
        &self,
        queues: &HashMap<DeckId, BTreeSet<usize>>,
        rng: &mut R,
    ) -> Vec<SessionCard> {
        let titles: HashMap<DeckId, String> = queues
            .keys()
            .filter_map(|id| self.cards.title(id).map(|title| (id.clone(), title)))
            .collect();
        interleave(&DueSource::from_due_map(queues, &titles), rng)
    }

    /// Set or clear the exam date of a deck
    pub async fn set_exam_date(&self, deck_id: &str, exam_date: Option<DateTime<Utc>>) -> Result<PendingSync, SyncError> {
        let count = self.card_count(deck_id)?;
        let (revived, pending) = self
            .sync
            .update(deck_id, count, |deck| {
                deck.set_exam_date(exam_date);
                Ok(std::mem::replace(&mut deck.is_cancelled, false))
            })
            .await?;
        if revived {
            log::info!("Revived deck {} with its new exam date", deck_id);
        }
        match exam_date {
            Some(date) => log::info!("Exam for deck {} set to {}", deck_id, date),
            None => log::info!("Exam for deck {} cleared", deck_id),
        }
        Ok(pending)
    }

    pub async fn cancel_deck(&self, deck_id: &str) -> Result<PendingSync, SyncError> {
        let count = self.card_count(deck_id)?;
        let ((), pending) = self
            .sync
            .update(deck_id, count, |deck| {
                deck.is_cancelled = true;
                Ok(())
            })
            .await?;
        self.requeue().clear_deck(deck_id);
        log::info!("Cancelled deck {}", deck_id);
        Ok(pending)
    }

    pub async fn revive_deck(&self, deck_id: &str) -> Result<PendingSync, SyncError> {
        let count = self.card_count(deck_id)?;
        self.sync.revive(deck_id, count).await
    }

    /// Due time for each grade of one card, in `Grade::ALL` order
    pub async fn preview(&self, deck_id: &str, card_index: usize) -> Result<[DateTime<Utc>; 4], SyncError> {
        let count = self.card_count(deck_id)?;
        let deck = self.sync.load_authoritative(deck_id, count).await?;
        let mut state = deck.state(card_index)?.clone();
        if deck.exam_date.is_some() {
            state.exam_date = deck.exam_date;
        }
        Ok(preview_due(&self.params, &state, self.clock.now()))
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    /// Push everything pending, then wait for background pushes
    pub async fn flush(&self) -> SyncResult {
        self.sync.wait_idle().await;
        self.sync.flush_pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::flashcards::CardStatus;
    use crate::storage::LocalCache;
    use crate::sync::{MemoryRemoteStore, RemoteError, SyncState};
    use chrono::{Duration, TimeZone};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap()
    }

    struct Fixture {
        session: ReviewSession,
        remote: Arc<MemoryRemoteStore>,
        clock: Arc<FixedClock>,
        cards: Arc<StaticCardSource>,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(MemoryRemoteStore::new());
        let clock = Arc::new(FixedClock::new(t0()));
        let cards = Arc::new(
            StaticCardSource::new()
                .with_deck("a", 2, Some("Anatomy"))
                .with_deck("b", 1, Some("Biology"))
                .with_deck("c", 3, None),
        );
        let sync = ScheduleSynchronizer::new(LocalCache::in_memory(), remote.clone(), clock.clone())
            .unwrap()
            .with_remote_timeout(std::time::Duration::from_millis(200));
        let session = ReviewSession::new(sync, cards.clone(), clock.clone(), SchedulerParams::default());
        Fixture {
            session,
            remote,
            clock,
            cards,
        }
    }

    #[tokio::test]
    async fn test_new_deck_is_fully_due() {
        let f = fixture();
        let due = f.session.get_due_queue("c").await.unwrap();
        assert_eq!(due.into_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_unknown_deck() {
        let f = fixture();
        let err = f.session.get_due_queue("zzz").await.unwrap_err();
        assert!(matches!(err, SyncError::DeckNotFound(_)));
    }

    #[tokio::test]
    async fn test_grade_persists_and_leaves_queue() {
        let f = fixture();
        let outcome = f.session.grade_card("a", 0, Grade::Easy).await.unwrap();
        assert!(outcome.state.due > t0() + Duration::days(1));
        assert!(!outcome.requeued);
        assert_eq!(outcome.sync.version(), 1);

        let stored = f.session.synchronizer().load_local("a").unwrap();
        assert_eq!(stored.schedules[0], outcome.state);
        outcome.sync.wait().await.unwrap();
        assert_eq!(f.remote.get("a").unwrap().schedules[0].status, CardStatus::Review);

        let due = f.session.get_due_queue("a").await.unwrap();
        assert_eq!(due.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_again_comes_back_within_minutes() {
        let f = fixture();
        let outcome = f.session.grade_card("a", 1, Grade::Again).await.unwrap();
        assert!(outcome.state.due <= t0() + Duration::minutes(10));

        f.clock.advance(Duration::minutes(11));
        let due = f.session.get_due_queue("a").await.unwrap();
        assert!(due.contains(&1));
    }

    #[tokio::test]
    async fn test_exam_clamps_grades() {
        let f = fixture();
        let exam = t0() + Duration::days(2);
        f.session.set_exam_date("c", Some(exam)).await.unwrap();

        let outcome = f.session.grade_card("c", 1, Grade::Easy).await.unwrap();
        assert_eq!(outcome.state.due, exam);

        let previews = f.session.preview("c", 2).await.unwrap();
        assert!(previews.iter().all(|due| *due <= exam));
    }

    #[tokio::test]
    async fn test_expired_exam_hides_deck() {
        let f = fixture();
        f.session
            .set_exam_date("c", Some(t0() - Duration::hours(30)))
            .await
            .unwrap();
        assert!(f.session.get_due_queue("c").await.unwrap().is_empty());

        f.session.set_exam_date("c", None).await.unwrap();
        assert_eq!(f.session.get_due_queue("c").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_cancel_and_revive() {
        let f = fixture();
        f.session.grade_card("a", 0, Grade::Again).await.unwrap();
        f.session.cancel_deck("a").await.unwrap();
        assert!(f.session.get_due_queue("a").await.unwrap().is_empty());

        let pending = f.session.revive_deck("a").await.unwrap();
        assert!(!pending.schedule.is_cancelled);
        assert!(!f.session.get_due_queue("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_studying_cancelled_deck_revives_it() {
        let f = fixture();
        f.session.cancel_deck("a").await.unwrap().wait().await.unwrap();

        let outcome = f.session.grade_card("a", 0, Grade::Good).await.unwrap();
        assert!(!outcome.sync.schedule.is_cancelled);
        outcome.sync.wait().await.unwrap();
        assert!(!f.session.synchronizer().load_local("a").unwrap().is_cancelled);
        assert!(!f.remote.get("a").unwrap().is_cancelled);

        f.session.cancel_deck("b").await.unwrap();
        let pending = f
            .session
            .set_exam_date("b", Some(t0() + Duration::days(5)))
            .await
            .unwrap();
        assert!(!pending.schedule.is_cancelled);
        assert_eq!(f.session.get_due_queue("b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_card_count_drift_is_repaired() {
        let f = fixture();
        f.session.grade_card("a", 1, Grade::Good).await.unwrap();
        f.cards.set("a", 4, Some("Anatomy"));

        let due = f.session.get_due_queue("a").await.unwrap();
        assert_eq!(due.into_iter().collect::<Vec<_>>(), vec![0, 2, 3]);
        assert_eq!(f.session.synchronizer().load_local("a").unwrap().schedules.len(), 4);

        let err = f.session.grade_card("a", 9, Grade::Good).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn test_due_queue_all_and_interleave() {
        let f = fixture();
        let decks: Vec<DeckId> = vec!["a".into(), "b".into()];
        let queues = f.session.get_due_queue_all(&decks).await.unwrap();
        assert_eq!(queues["a"].len(), 2);
        assert_eq!(queues["b"].len(), 1);

        // new decks were written back in one batch
        f.session.synchronizer().wait_idle().await;
        assert_eq!(f.remote.len(), 2);

        let cards = f
            .session
            .start_interleaved_session_with(&queues, &mut StdRng::seed_from_u64(11));
        assert_eq!(cards.len(), 3);
        assert!(cards.windows(2).filter(|w| w[0].deck_id == w[1].deck_id).count() <= 1);
        assert!(cards
            .iter()
            .all(|c| c.deck_title.is_some()));
    }

    #[tokio::test]
    async fn test_due_queue_all_works_offline() {
        let f = fixture();
        f.session.grade_card("a", 0, Grade::Easy).await.unwrap();
        f.session.synchronizer().wait_idle().await;
        f.remote.fail_next(RemoteError::Transient("offline".into()));
        f.remote.fail_next(RemoteError::Transient("offline".into()));

        let queues = f.session.get_due_queue_all(&["a".to_string()]).await.unwrap();
        assert_eq!(queues["a"].iter().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_grading_survives_remote_rejection() {
        let f = fixture();
        f.remote.reject_deck("b", RemoteError::Permanent("quota".into()));

        let outcome = f.session.grade_card("b", 0, Grade::Good).await.unwrap();
        assert!(outcome.sync.wait().await.is_err());
        assert_eq!(f.session.sync_status().status, SyncState::Error);
        assert!(f.session.get_due_queue("b").await.unwrap().is_empty());

        f.remote.accept_deck("b");
        let result = f.session.flush().await;
        assert_eq!(result.decks_pushed, 1);
        assert_eq!(f.session.sync_status().status, SyncState::Idle);
    }
}
