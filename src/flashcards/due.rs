//! Due-queue computation
//!
//! Derives which cards are due from deck schedule snapshots. Nothing here
//! is persisted; callers recompute whenever time passes or a grade lands.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use super::models::{DeckId, DeckSchedule};

/// Indices of the cards in `deck` that are due at `now`.
///
/// Cancelled decks and decks whose exam ended more than the grace window ago
/// yield an empty set.
pub fn compute_due(deck: &DeckSchedule, now: DateTime<Utc>) -> BTreeSet<usize> {
    if deck.is_cancelled || deck.exam_expired(now) {
        return BTreeSet::new();
    }

    deck.schedules
        .iter()
        .enumerate()
        .filter(|(_, state)| state.is_due(now))
        .map(|(index, _)| index)
        .collect()
}

/// Due indices for every deck, keyed by deck id
pub fn compute_due_all<'a, I>(decks: I, now: DateTime<Utc>) -> HashMap<DeckId, BTreeSet<usize>>
where
    I: IntoIterator<Item = (&'a DeckId, &'a DeckSchedule)>,
{
    decks
        .into_iter()
        .map(|(deck_id, deck)| (deck_id.clone(), compute_due(deck, now)))
        .collect()
}

/// Cards that came back due from the grade just applied.
///
/// A card graded `Again` with a step shorter than the recompute cadence, or
/// clamped onto an exam that starts now, must come back in the same sitting
/// even if no full recomputation runs in between.
#[derive(Debug, Clone, Default)]
pub struct ImmediateRequeue {
    decks: HashMap<DeckId, BTreeSet<usize>>,
}

impl ImmediateRequeue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh grade; returns whether the card is now requeued
    pub fn record(&mut self, deck_id: &str, card_index: usize, due: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if due <= now {
            self.decks
                .entry(deck_id.to_string())
                .or_default()
                .insert(card_index);
            true
        } else {
            if let Some(set) = self.decks.get_mut(deck_id) {
                set.remove(&card_index);
                if set.is_empty() {
                    self.decks.remove(deck_id);
                }
            }
            false
        }
    }

    pub fn for_deck(&self, deck_id: &str) -> BTreeSet<usize> {
        self.decks.get(deck_id).cloned().unwrap_or_default()
    }

    /// Forget a deck, e.g. once it is cancelled
    pub fn clear_deck(&mut self, deck_id: &str) {
        self.decks.remove(deck_id);
    }

    pub fn len(&self) -> usize {
        self.decks.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Totals across decks, for the dashboard badge
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DueSummary {
    pub total_due: usize,
    pub decks_with_due: usize,
}

impl DueSummary {
    pub fn from_queues(queues: &HashMap<DeckId, BTreeSet<usize>>) -> Self {
        queues.values().fold(Self::default(), |mut acc, due| {
            if !due.is_empty() {
                acc.total_due += due.len();
                acc.decks_with_due += 1;
            }
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flashcards::models::ScheduleState;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    /// Deck whose card `i` is due at `t0 + offsets[i]` hours
    fn deck_with_offsets(offsets: &[i64]) -> DeckSchedule {
        let mut deck = DeckSchedule::new("deck", 0, t0());
        deck.schedules = offsets
            .iter()
            .map(|h| {
                let mut s = ScheduleState::new(t0());
                s.due = t0() + Duration::hours(*h);
                s
            })
            .collect();
        deck
    }

    #[test]
    fn test_due_includes_past_and_now() {
        let deck = deck_with_offsets(&[-5, 0, 3, -1]);
        let due = compute_due(&deck, t0());
        assert_eq!(due.into_iter().collect::<Vec<_>>(), vec![0, 1, 3]);
    }

    #[test]
    fn test_cancelled_deck_is_never_due() {
        let mut deck = deck_with_offsets(&[-5, -4, -3]);
        deck.is_cancelled = true;
        assert!(compute_due(&deck, t0()).is_empty());
        assert!(compute_due(&deck, t0() + Duration::days(400)).is_empty());
    }

    #[test]
    fn test_exam_grace_window() {
        let mut deck = deck_with_offsets(&[-2, -1]);
        deck.exam_date = Some(t0() - Duration::hours(23));
        assert_eq!(compute_due(&deck, t0()).len(), 2);

        deck.exam_date = Some(t0() - Duration::hours(24));
        assert_eq!(compute_due(&deck, t0()).len(), 2);

        deck.exam_date = Some(t0() - Duration::hours(25));
        assert!(compute_due(&deck, t0()).is_empty());
    }

    #[test]
    fn test_future_exam_behaves_normally() {
        let mut deck = deck_with_offsets(&[-2, 4]);
        deck.exam_date = Some(t0() + Duration::days(3));
        assert_eq!(compute_due(&deck, t0()).into_iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_compute_due_all() {
        let mut decks: HashMap<DeckId, DeckSchedule> = HashMap::new();
        decks.insert("a".into(), deck_with_offsets(&[-1, -1]));
        let mut cancelled = deck_with_offsets(&[-1]);
        cancelled.is_cancelled = true;
        decks.insert("b".into(), cancelled);
        decks.insert("c".into(), deck_with_offsets(&[2]));

        let queues = compute_due_all(&decks, t0());
        assert_eq!(queues["a"].len(), 2);
        assert!(queues["b"].is_empty());
        assert!(queues["c"].is_empty());

        let summary = DueSummary::from_queues(&queues);
        assert_eq!(summary, DueSummary { total_due: 2, decks_with_due: 1 });
    }

    #[test]
    fn test_immediate_requeue_tracks_latest_grade() {
        let mut requeue = ImmediateRequeue::new();
        assert!(requeue.record("a", 2, t0(), t0()));
        assert!(requeue.record("a", 4, t0() - Duration::minutes(1), t0()));
        assert_eq!(requeue.for_deck("a").into_iter().collect::<Vec<_>>(), vec![2, 4]);

        assert!(!requeue.record("a", 2, t0() + Duration::minutes(10), t0()));
        assert_eq!(requeue.for_deck("a").into_iter().collect::<Vec<_>>(), vec![4]);
        assert_eq!(requeue.len(), 1);

        requeue.clear_deck("a");
        assert!(requeue.is_empty());
    }
}
