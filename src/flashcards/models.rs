//! Data models for the scheduling engine
//!
//! The serialized shapes match the JSON the web client has always stored,
//! so existing local caches and remote rows load unchanged. New fields are
//! only ever added, never repurposed.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque deck identifier, stable for the deck's lifetime
pub type DeckId = String;

/// Hours after an exam during which its deck is still studied
pub const EXAM_GRACE_HOURS: i64 = 24;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid grade: {0} (expected 1-4)")]
    InvalidGrade(String),

    #[error("Invalid card state value {0}")]
    InvalidStatus(u8),

    #[error("Schedule field {field} is {value}, expected a finite non-negative number")]
    InvalidNumber { field: &'static str, value: f64 },

    #[error("Card index {index} out of range for deck with {len} cards")]
    CardIndexOutOfRange { index: usize, len: usize },

    #[error("Negative card count {0}")]
    NegativeCardCount(i64),

    #[error("Invalid exam date: {0}")]
    InvalidExamDate(String),
}

/// Recall quality reported by the learner, ordered worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Grade {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

impl Grade {
    pub const ALL: [Grade; 4] = [Grade::Again, Grade::Hard, Grade::Good, Grade::Easy];

    pub fn as_f64(self) -> f64 {
        u8::from(self) as f64
    }
}

impl From<Grade> for u8 {
    fn from(grade: Grade) -> Self {
        grade as u8
    }
}

impl TryFrom<u8> for Grade {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Grade::Again),
            2 => Ok(Grade::Hard),
            3 => Ok(Grade::Good),
            4 => Ok(Grade::Easy),
            other => Err(ValidationError::InvalidGrade(other.to_string())),
        }
    }
}

impl FromStr for Grade {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "again" => Ok(Grade::Again),
            "2" | "hard" => Ok(Grade::Hard),
            "3" | "good" => Ok(Grade::Good),
            "4" | "easy" => Ok(Grade::Easy),
            _ => Err(ValidationError::InvalidGrade(s.to_string())),
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Grade::Again => "again",
            Grade::Hard => "hard",
            Grade::Good => "good",
            Grade::Easy => "easy",
        };
        f.write_str(name)
    }
}

/// Status of a card in the spaced repetition system, stored as a number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum CardStatus {
    /// Never reviewed
    #[default]
    New = 0,
    /// In initial learning steps
    Learning = 1,
    /// Regular spaced review
    Review = 2,
    /// Failed a review and stepping back through relearning
    Relearning = 3,
}

impl From<CardStatus> for u8 {
    fn from(status: CardStatus) -> Self {
        status as u8
    }
}

impl TryFrom<u8> for CardStatus {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CardStatus::New),
            1 => Ok(CardStatus::Learning),
            2 => Ok(CardStatus::Review),
            3 => Ok(CardStatus::Relearning),
            other => Err(ValidationError::InvalidStatus(other)),
        }
    }
}

/// Review state of a single card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub difficulty: f64,
    pub stability: f64,
    #[serde(default)]
    pub reps: u32,
    #[serde(default)]
    pub lapses: u32,
    /// Index of the current (re)learning step
    #[serde(default)]
    pub learning_steps: u32,
    #[serde(default)]
    pub scheduled_days: u32,
    /// When the card is next due; a missing value loads as the epoch (due now)
    #[serde(default)]
    pub due: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review: Option<DateTime<Utc>>,
    #[serde(default, rename = "state")]
    pub status: CardStatus,
    #[serde(
        default,
        rename = "examDate",
        skip_serializing_if = "Option::is_none",
        with = "exam_date_serde"
    )]
    pub exam_date: Option<DateTime<Utc>>,
}

impl ScheduleState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            difficulty: 5.0,
            stability: 0.1,
            reps: 0,
            lapses: 0,
            learning_steps: 0,
            scheduled_days: 0,
            due: now,
            last_review: None,
            status: CardStatus::New,
            exam_date: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due <= now
    }

    /// Reject NaN, infinite or negative memory values
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [("stability", self.stability), ("difficulty", self.difficulty)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::InvalidNumber { field, value });
            }
        }
        Ok(())
    }
}

/// Schedule aggregate for one deck, index-aligned with the deck's cards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckSchedule {
    #[serde(default)]
    pub deck_id: DeckId,
    #[serde(default)]
    pub schedules: Vec<ScheduleState>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "exam_date_serde")]
    pub exam_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_cancelled: bool,
    /// Local write counter; higher wins during reconciliation
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DeckSchedule {
    /// Fresh aggregate with one neutral state per card
    pub fn new(deck_id: impl Into<DeckId>, card_count: usize, now: DateTime<Utc>) -> Self {
        Self {
            deck_id: deck_id.into(),
            schedules: vec![ScheduleState::new(now); card_count],
            exam_date: None,
            is_cancelled: false,
            version: 0,
            updated_at: None,
        }
    }

    /// Truncate or pad `schedules` to `card_count`.
    ///
    /// Returns whether anything changed. Running it twice is the same as once.
    pub fn repair_len(&mut self, card_count: i64, now: DateTime<Utc>) -> Result<bool, ValidationError> {
        let target = usize::try_from(card_count)
            .map_err(|_| ValidationError::NegativeCardCount(card_count))?;

        let len = self.schedules.len();
        if len == target {
            return Ok(false);
        }
        if len > target {
            self.schedules.truncate(target);
        } else {
            self.schedules.resize(target, ScheduleState::new(now));
        }
        Ok(true)
    }

    /// Set the deck-wide exam date and push it down to every card
    pub fn set_exam_date(&mut self, exam_date: Option<DateTime<Utc>>) {
        self.exam_date = exam_date;
        for state in &mut self.schedules {
            state.exam_date = exam_date;
        }
    }

    /// True once `now` is past the exam plus the grace window
    pub fn exam_expired(&self, now: DateTime<Utc>) -> bool {
        match self.exam_date {
            Some(exam) => now > exam + Duration::hours(EXAM_GRACE_HOURS),
            None => false,
        }
    }

    pub fn state(&self, index: usize) -> Result<&ScheduleState, ValidationError> {
        self.schedules.get(index).ok_or(ValidationError::CardIndexOutOfRange {
            index,
            len: self.schedules.len(),
        })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.schedules.iter().try_for_each(ScheduleState::validate)
    }
}

/// Parse a stored exam date.
///
/// Accepts RFC 3339 datetimes and legacy date-only `YYYY-MM-DD` values; the
/// latter mean the end of that day, 23:59:59 UTC.
pub fn parse_exam_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.contains('T') {
        return DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|dt| dt.and_utc())
}

mod exam_date_serde {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{parse_exam_date, SecondsFormat};

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => s.serialize_some(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => parse_exam_date(s)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid exam date: {}", s))),
        }
    }
}
