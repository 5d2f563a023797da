use chrono::{DateTime, Utc};

use cogni_lib::flashcards::{format_interval, CardStatus};
use cogni_lib::sync::SyncState;

/// ANSI color codes
pub struct Color;

impl Color {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";
}

pub fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("{}{}{}", color, text, Color::RESET)
    } else {
        text.to_string()
    }
}

pub fn bold(text: &str, use_color: bool) -> String {
    paint(text, Color::BOLD, use_color)
}

/// "in 3d (2025-06-05 08:00)" or "now"
pub fn due_label(due: DateTime<Utc>, now: DateTime<Utc>, use_color: bool) -> String {
    if due <= now {
        return paint("now", Color::GREEN, use_color);
    }
    format!(
        "in {} {}",
        format_interval(due - now),
        paint(&format!("({})", due.format("%Y-%m-%d %H:%M")), Color::DIM, use_color)
    )
}

pub fn status_label(status: CardStatus) -> &'static str {
    match status {
        CardStatus::New => "new",
        CardStatus::Learning => "learning",
        CardStatus::Review => "review",
        CardStatus::Relearning => "relearning",
    }
}

pub fn sync_state_label(state: SyncState, use_color: bool) -> String {
    match state {
        SyncState::Idle => paint("in sync", Color::GREEN, use_color),
        SyncState::Pending => paint("pending", Color::CYAN, use_color),
        SyncState::Offline => paint("offline", Color::YELLOW, use_color),
        SyncState::Error => paint("error", Color::RED, use_color),
    }
}

/// Compact index list, e.g. "0-3, 7, 9-10"
pub fn index_ranges<I: IntoIterator<Item = usize>>(indices: I) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut run: Option<(usize, usize)> = None;

    for i in indices {
        run = match run {
            Some((start, end)) if i == end + 1 => Some((start, i)),
            Some(prev) => {
                parts.push(format_run(prev));
                Some((i, i))
            }
            None => Some((i, i)),
        };
    }
    if let Some(prev) = run {
        parts.push(format_run(prev));
    }
    parts.join(", ")
}

fn format_run((start, end): (usize, usize)) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}-{}", start, end)
    }
}
