//! Flashcard scheduling core
//!
//! This module provides:
//! - Card and deck schedule models
//! - FSRS-6 grading with exam-date clamping
//! - Due-queue computation per deck and across decks
//! - Cross-deck interleaving of due cards

pub mod algorithm;
pub mod due;
pub mod interleave;
pub mod models;

pub use algorithm::{format_interval, next_schedule, next_schedule_with, preview_due, SchedulerParams};
pub use due::{compute_due, compute_due_all, DueSummary, ImmediateRequeue};
pub use interleave::{interleave, DueSource, SessionCard};
pub use models::*;
