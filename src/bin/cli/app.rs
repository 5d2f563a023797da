use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};

use cogni_lib::clock::{Clock, FixedClock, SystemClock};
use cogni_lib::config::EngineConfig;
use cogni_lib::flashcards::{parse_exam_date, DeckId};
use cogni_lib::session::ReviewSession;
use cogni_lib::Engine;

/// Shared application state for CLI commands
pub struct App {
    pub config: EngineConfig,
    pub clock: Arc<dyn Clock>,
    engine: Engine,
}

impl App {
    pub fn new(config_path: Option<&Path>, now: Option<&str>) -> Result<Self> {
        let config = EngineConfig::load(config_path).context("Failed to load config")?;

        let clock: Arc<dyn Clock> = match now {
            Some(raw) => Arc::new(FixedClock::new(parse_time(raw)?)),
            None => Arc::new(SystemClock),
        };

        // One-shot commands flush explicitly; no periodic flusher
        let engine = cogni_lib::start(&config, clock.clone(), false)
            .context("Failed to start scheduling engine")?;

        Ok(Self { config, clock, engine })
    }

    pub fn session(&self) -> &ReviewSession {
        &self.engine.session
    }

    /// Every deck id from the config, sorted
    pub fn deck_ids(&self) -> Vec<DeckId> {
        self.config.decks.keys().cloned().collect()
    }

    pub fn deck_title<'a>(&'a self, deck_id: &'a str) -> &'a str {
        self.config
            .decks
            .get(deck_id)
            .and_then(|d| d.title.as_deref())
            .unwrap_or(deck_id)
    }

    /// Fail early with the list of known decks
    pub fn require_deck(&self, deck_id: &str) -> Result<()> {
        if self.config.decks.contains_key(deck_id) {
            return Ok(());
        }
        if self.config.decks.is_empty() {
            bail!("No decks configured. Add [decks.<id>] sections to the config file.");
        }
        bail!(
            "Unknown deck '{}'. Configured decks:\n{}",
            deck_id,
            self.config
                .decks
                .keys()
                .map(|id| format!("  - {}", id))
                .collect::<Vec<_>>()
                .join("\n")
        )
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn shutdown(self) {
        self.engine.shutdown().await;
    }
}

pub fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    parse_exam_date(raw).with_context(|| format!("Invalid time '{}', expected RFC 3339 or YYYY-MM-DD", raw))
}
