//! FSRS-6 Spaced Repetition Algorithm
//!
//! Free Spaced Repetition Scheduler, version 6, with the 21 published
//! default weights. Cards start in short learning steps measured in
//! minutes, graduate to day-based review intervals, and fall back into
//! relearning steps after a lapse.
//!
//! Core formulas:
//! - Retrievability: R = (1 + FACTOR * t / S)^DECAY, FACTOR = 0.9^(1/DECAY) - 1
//! - Interval: t = S / FACTOR * (R^(1/DECAY) - 1)
//!
//! Grades (1-4):
//! - 1 Again: forgot, card goes back to the first (re)learning step
//! - 2 Hard: recalled with serious difficulty
//! - 3 Good: recalled after hesitation
//! - 4 Easy: perfect recall
//!
//! Everything here is pure: the caller supplies `now` and persists the result.

use chrono::{DateTime, Duration, Utc};

use super::models::{CardStatus, Grade, ScheduleState};

/// FSRS-6 default weights w0..w20
pub const FSRS6_WEIGHTS: [f64; 21] = [
    0.212, 1.2931, 2.3065, 8.2956, 6.4133, 0.8334, 3.0194, 0.001, 1.8722, 0.1666, 0.796, 1.4835,
    0.0614, 0.2629, 1.6483, 0.6014, 1.8729, 0.5425, 0.0912, 0.0658, 0.1542,
];

/// Target probability of recall at the due date
pub const DEFAULT_RETENTION: f64 = 0.9;

/// Longest interval ever scheduled, in days
pub const MAX_INTERVAL_DAYS: u32 = 36500;

pub const MIN_STABILITY: f64 = 0.01;
pub const MAX_STABILITY: f64 = 36500.0;
pub const MIN_DIFFICULTY: f64 = 1.0;
pub const MAX_DIFFICULTY: f64 = 10.0;

/// Tunable scheduler parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerParams {
    pub weights: [f64; 21],
    pub request_retention: f64,
    pub maximum_interval: u32,
    /// Ascending delays for new cards before graduation
    pub learning_steps: Vec<Duration>,
    /// Ascending delays after a lapse
    pub relearning_steps: Vec<Duration>,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            weights: FSRS6_WEIGHTS,
            request_retention: DEFAULT_RETENTION,
            maximum_interval: MAX_INTERVAL_DAYS,
            learning_steps: vec![Duration::minutes(1), Duration::minutes(10)],
            relearning_steps: vec![Duration::minutes(10)],
        }
    }
}

impl SchedulerParams {
    fn decay(&self) -> f64 {
        -self.weights[20]
    }

    fn factor(&self) -> f64 {
        0.9f64.powf(1.0 / self.decay()) - 1.0
    }

    /// Probability of recall after `elapsed_days` at the given stability
    pub fn retrievability(&self, elapsed_days: f64, stability: f64) -> f64 {
        (1.0 + self.factor() * elapsed_days.max(0.0) / stability).powf(self.decay())
    }

    /// Interval in whole days that hits the requested retention
    pub fn next_interval(&self, stability: f64) -> u32 {
        let raw = stability / self.factor()
            * (self.request_retention.powf(1.0 / self.decay()) - 1.0);
        if !raw.is_finite() {
            return 1;
        }
        (raw.round() as i64).clamp(1, self.maximum_interval.max(1) as i64) as u32
    }

    pub fn initial_stability(&self, grade: Grade) -> f64 {
        self.weights[grade as usize - 1].max(0.1)
    }

    pub fn initial_difficulty(&self, grade: Grade) -> f64 {
        let w = &self.weights;
        clamp_difficulty(w[4] - (w[5] * (grade.as_f64() - 1.0)).exp() + 1.0)
    }

    pub fn next_difficulty(&self, difficulty: f64, grade: Grade) -> f64 {
        let w = &self.weights;
        let delta = -w[6] * (grade.as_f64() - 3.0);
        let damped = difficulty + delta * (10.0 - difficulty) / 9.0;
        let reverted = w[7] * self.initial_difficulty(Grade::Easy) + (1.0 - w[7]) * damped;
        clamp_difficulty(reverted)
    }

    pub fn next_recall_stability(&self, difficulty: f64, stability: f64, r: f64, grade: Grade) -> f64 {
        let w = &self.weights;
        let hard_penalty = if grade == Grade::Hard { w[15] } else { 1.0 };
        let easy_bonus = if grade == Grade::Easy { w[16] } else { 1.0 };
        let growth = w[8].exp()
            * (11.0 - difficulty)
            * stability.powf(-w[9])
            * ((w[10] * (1.0 - r)).exp() - 1.0)
            * hard_penalty
            * easy_bonus;
        clamp_stability(stability * (1.0 + growth))
    }

    pub fn next_forget_stability(&self, difficulty: f64, stability: f64, r: f64) -> f64 {
        let w = &self.weights;
        let forget = w[11]
            * difficulty.powf(-w[12])
            * ((stability + 1.0).powf(w[13]) - 1.0)
            * (w[14] * (1.0 - r)).exp();
        let ceiling = stability / (w[17] * w[18]).exp();
        clamp_stability(forget.min(ceiling))
    }

    /// Stability change for reviews inside the (re)learning steps
    pub fn short_term_stability(&self, stability: f64, grade: Grade) -> f64 {
        let w = &self.weights;
        let mut increase = (w[17] * (grade.as_f64() - 3.0 + w[18])).exp() * stability.powf(-w[19]);
        if grade >= Grade::Good {
            increase = increase.max(1.0);
        }
        clamp_stability(stability * increase)
    }
}

fn clamp_stability(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(MIN_STABILITY, MAX_STABILITY)
    } else {
        MIN_STABILITY
    }
}

fn clamp_difficulty(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
    } else {
        5.0
    }
}

/// Where one grade puts a card
enum Placement {
    Step { status: CardStatus, step: u32, delay: Duration },
    Graduate { days: u32 },
}

impl Placement {
    fn offset(&self) -> Duration {
        match self {
            Placement::Step { delay, .. } => *delay,
            Placement::Graduate { days } => Duration::days(i64::from(*days)),
        }
    }
}

/// Outcome of one grade inside the (re)learning steps
enum StepOutcome {
    Stay { delay: Duration, step: u32 },
    Graduate,
}

fn step_outcome(steps: &[Duration], current: u32, grade: Grade) -> StepOutcome {
    let Some(&first) = steps.first() else {
        return match grade {
            Grade::Again => StepOutcome::Stay { delay: Duration::zero(), step: 0 },
            _ => StepOutcome::Graduate,
        };
    };
    let current = (current as usize).min(steps.len() - 1);

    match grade {
        Grade::Again => StepOutcome::Stay { delay: first, step: 0 },
        Grade::Hard => {
            let delay = if steps.len() == 1 {
                first + first / 2
            } else if current == 0 {
                (steps[0] + steps[1]) / 2
            } else {
                steps[current]
            };
            StepOutcome::Stay { delay, step: current as u32 }
        }
        Grade::Good => match steps.get(current + 1) {
            Some(&delay) => StepOutcome::Stay { delay, step: current as u32 + 1 },
            None => StepOutcome::Graduate,
        },
        Grade::Easy => StepOutcome::Graduate,
    }
}

/// Compute the next state of a card using default parameters
pub fn next_schedule(state: &ScheduleState, grade: Grade, now: DateTime<Utc>) -> ScheduleState {
    next_schedule_with(&SchedulerParams::default(), state, grade, now)
}

/// Compute the next state of a card.
///
/// Guarantees `due >= now` and that due dates are ordered by grade. When the
/// card carries an exam date that has not passed yet, the due date never
/// lands after it.
pub fn next_schedule_with(
    params: &SchedulerParams,
    state: &ScheduleState,
    grade: Grade,
    now: DateTime<Utc>,
) -> ScheduleState {
    let prev_stability = clamp_stability(state.stability);
    let prev_difficulty = clamp_difficulty(state.difficulty);
    let is_new = state.status == CardStatus::New || state.last_review.is_none();

    let stability_for = |g: Grade| -> f64 {
        if is_new {
            return params.initial_stability(g);
        }
        match state.status {
            CardStatus::Learning | CardStatus::Relearning => {
                params.short_term_stability(prev_stability, g)
            }
            _ => {
                let elapsed_days = state
                    .last_review
                    .map(|last| (now - last).num_seconds().max(0) as f64 / 86_400.0)
                    .unwrap_or(0.0);
                let r = params.retrievability(elapsed_days, prev_stability);
                match g {
                    Grade::Again => params.next_forget_stability(prev_difficulty, prev_stability, r),
                    _ => params.next_recall_stability(prev_difficulty, prev_stability, r, g),
                }
            }
        }
    };

    let difficulty = if is_new {
        params.initial_difficulty(grade)
    } else {
        params.next_difficulty(prev_difficulty, grade)
    };
    let stability = stability_for(grade);

    // Day intervals for the graduating grades, ordered hard <= good < easy
    let good_days = params.next_interval(stability_for(Grade::Good));
    let hard_days = params.next_interval(stability_for(Grade::Hard)).min(good_days);
    let easy_days = params
        .next_interval(stability_for(Grade::Easy))
        .max(good_days + 1)
        .min(params.maximum_interval.max(1));
    let graduate_days = |g: Grade| match g {
        Grade::Again => params.next_interval(stability).min(hard_days),
        Grade::Hard => hard_days,
        Grade::Good => good_days,
        Grade::Easy => easy_days,
    };

    let mut next = state.clone();
    next.stability = stability;
    next.difficulty = difficulty;
    next.reps = state.reps.saturating_add(1);
    next.last_review = Some(now);

    let steps_for = |g: Grade| {
        if is_new || state.status == CardStatus::Learning {
            Some((&params.learning_steps, CardStatus::Learning, state.learning_steps))
        } else if state.status == CardStatus::Relearning {
            Some((&params.relearning_steps, CardStatus::Relearning, state.learning_steps))
        } else if g == Grade::Again {
            Some((&params.relearning_steps, CardStatus::Relearning, 0))
        } else {
            None
        }
    };
    let placement = |g: Grade| match steps_for(g) {
        Some((steps, status, current)) => match step_outcome(steps, current, g) {
            StepOutcome::Stay { delay, step } => Placement::Step {
                status,
                step,
                delay: delay.max(Duration::zero()),
            },
            StepOutcome::Graduate => Placement::Graduate { days: graduate_days(g) },
        },
        None => Placement::Graduate { days: graduate_days(g) },
    };

    if !is_new && state.status == CardStatus::Review && grade == Grade::Again {
        next.lapses = state.lapses.saturating_add(1);
    }

    // A step never outlasts what a better grade would give, whatever the
    // configured steps are
    let ceiling = Grade::ALL
        .iter()
        .filter(|g| **g > grade)
        .map(|g| placement(*g).offset())
        .min();

    next.due = match placement(grade) {
        Placement::Step { status, step, delay } => {
            next.status = status;
            next.learning_steps = step;
            next.scheduled_days = 0;
            now + ceiling.map_or(delay, |ceiling| delay.min(ceiling))
        }
        Placement::Graduate { days } => {
            next.status = CardStatus::Review;
            next.learning_steps = 0;
            next.scheduled_days = days;
            now + Duration::days(days as i64)
        }
    };

    if let Some(exam) = state.exam_date {
        if exam >= now && next.due > exam {
            next.due = exam;
            next.scheduled_days = (exam - now).num_days().max(0) as u32;
        }
    }

    next
}

/// Due time for each grade, in `Grade::ALL` order
pub fn preview_due(params: &SchedulerParams, state: &ScheduleState, now: DateTime<Utc>) -> [DateTime<Utc>; 4] {
    Grade::ALL.map(|grade| next_schedule_with(params, state, grade, now).due)
}

/// Format the time until a due date as a short label
pub fn format_interval(until: Duration) -> String {
    let minutes = until.num_minutes();
    if minutes < 1 {
        return "now".to_string();
    }
    if minutes < 60 {
        return format!("{}m", minutes);
    }
    let hours = until.num_hours();
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = until.num_days();
    if days < 7 {
        format!("{}d", days)
    } else if days < 30 {
        format!("{}w", days / 7)
    } else if days < 365 {
        format!("{}mo", days / 30)
    } else {
        format!("{}y", days / 365)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn review_state(stability: f64, difficulty: f64, days_ago: i64) -> ScheduleState {
        ScheduleState {
            difficulty,
            stability,
            reps: 6,
            lapses: 1,
            learning_steps: 0,
            scheduled_days: days_ago as u32,
            due: t0(),
            last_review: Some(t0() - Duration::days(days_ago)),
            status: CardStatus::Review,
            exam_date: None,
        }
    }

    fn sample_states() -> Vec<ScheduleState> {
        let mut learning = ScheduleState::new(t0());
        learning.status = CardStatus::Learning;
        learning.last_review = Some(t0() - Duration::minutes(1));
        learning.stability = 1.3;

        let mut last_step = learning.clone();
        last_step.learning_steps = 1;

        let mut relearning = review_state(2.0, 7.5, 0);
        relearning.status = CardStatus::Relearning;

        vec![
            ScheduleState::new(t0()),
            learning,
            last_step,
            relearning,
            review_state(0.5, 9.9, 1),
            review_state(10.0, 5.0, 10),
            review_state(120.0, 2.0, 200),
            review_state(3000.0, 1.0, 3000),
        ]
    }

    #[test]
    fn test_due_dates_monotonic_in_grade() {
        for state in sample_states() {
            let dues = preview_due(&SchedulerParams::default(), &state, t0());
            for pair in dues.windows(2) {
                assert!(pair[0] <= pair[1], "not monotonic for {:?}: {:?}", state, dues);
            }
        }
    }

    #[test]
    fn test_monotonic_with_odd_steps() {
        let odd = [
            vec![Duration::minutes(1), Duration::days(30)],
            vec![Duration::minutes(10), Duration::minutes(1)],
            vec![Duration::days(90)],
        ];
        for steps in odd {
            let params = SchedulerParams {
                learning_steps: steps.clone(),
                relearning_steps: steps,
                ..SchedulerParams::default()
            };
            for state in sample_states() {
                let dues = preview_due(&params, &state, t0());
                for pair in dues.windows(2) {
                    assert!(pair[0] <= pair[1], "not monotonic for {:?}: {:?}", state, dues);
                }
            }
        }
    }

    #[test]
    fn test_never_due_in_past() {
        for state in sample_states() {
            for grade in Grade::ALL {
                let next = next_schedule(&state, grade, t0());
                assert!(next.due >= t0());
                assert!(next.validate().is_ok());
            }
        }
    }

    #[test]
    fn test_again_requeues_within_minutes_easy_waits_days() {
        let mut state = ScheduleState::new(t0());
        state.stability = 1.0;

        let again = next_schedule(&state, Grade::Again, t0());
        assert!(again.due - t0() <= Duration::minutes(10));
        assert_eq!(again.status, CardStatus::Learning);

        let easy = next_schedule(&state, Grade::Easy, t0());
        assert!(easy.due - t0() >= Duration::days(2));
        assert_eq!(easy.status, CardStatus::Review);
    }

    #[test]
    fn test_exam_date_clamps_due() {
        let mut state = ScheduleState::new(t0());
        let exam = t0() + Duration::days(2);
        state.exam_date = Some(exam);

        let unclamped = next_schedule(&ScheduleState::new(t0()), Grade::Easy, t0());
        assert!(unclamped.due > exam);

        let clamped = next_schedule(&state, Grade::Easy, t0());
        assert_eq!(clamped.due, exam);
        assert_eq!(clamped.scheduled_days, 2);
        assert_eq!(clamped.exam_date, Some(exam));

        for s in sample_states() {
            let with_exam = ScheduleState { exam_date: Some(exam), ..s };
            for grade in Grade::ALL {
                assert!(next_schedule(&with_exam, grade, t0()).due <= exam);
            }
        }
    }

    #[test]
    fn test_past_exam_date_is_ignored() {
        let mut state = review_state(10.0, 5.0, 10);
        state.exam_date = Some(t0() - Duration::days(3));

        let next = next_schedule(&state, Grade::Good, t0());
        let plain = next_schedule(&review_state(10.0, 5.0, 10), Grade::Good, t0());
        assert_eq!(next.due, plain.due);
    }

    #[test]
    fn test_lapse_enters_relearning() {
        let state = review_state(10.0, 5.0, 10);
        let next = next_schedule(&state, Grade::Again, t0());

        assert_eq!(next.status, CardStatus::Relearning);
        assert_eq!(next.lapses, state.lapses + 1);
        assert_eq!(next.due, t0() + Duration::minutes(10));
        assert!(next.stability < state.stability);
    }

    #[test]
    fn test_good_review_grows_interval() {
        let state = review_state(10.0, 5.0, 10);
        let next = next_schedule(&state, Grade::Good, t0());

        assert!(next.stability > state.stability);
        assert!(next.scheduled_days >= 10);
        assert_eq!(next.reps, state.reps + 1);
        assert_eq!(next.last_review, Some(t0()));
    }

    #[test]
    fn test_learning_steps_progress_to_review() {
        let first = next_schedule(&ScheduleState::new(t0()), Grade::Good, t0());
        assert_eq!(first.status, CardStatus::Learning);
        assert_eq!(first.due, t0() + Duration::minutes(10));

        let second = next_schedule(&first, Grade::Good, first.due);
        assert_eq!(second.status, CardStatus::Review);
        assert!(second.scheduled_days >= 1);
    }

    #[test]
    fn test_corrupt_state_still_yields_finite_values() {
        let mut state = review_state(f64::NAN, f64::INFINITY, 5);
        state.last_review = Some(t0() + Duration::days(1));
        let next = next_schedule(&state, Grade::Hard, t0());

        assert!(next.stability.is_finite() && next.difficulty.is_finite());
        assert!(next.due >= t0());
    }

    #[test]
    fn test_deterministic() {
        let state = review_state(4.2, 6.1, 3);
        assert_eq!(
            next_schedule(&state, Grade::Hard, t0()),
            next_schedule(&state, Grade::Hard, t0())
        );
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(Duration::seconds(20)), "now");
        assert_eq!(format_interval(Duration::minutes(10)), "10m");
        assert_eq!(format_interval(Duration::hours(3)), "3h");
        assert_eq!(format_interval(Duration::days(5)), "5d");
        assert_eq!(format_interval(Duration::days(14)), "2w");
        assert_eq!(format_interval(Duration::days(90)), "3mo");
        assert_eq!(format_interval(Duration::days(730)), "2y");
    }
}
