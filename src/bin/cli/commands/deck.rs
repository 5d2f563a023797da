use anyhow::{bail, Result};

use cogni_lib::sync::PendingSync;

use crate::app::{parse_time, App};
use crate::OutputFormat;

pub async fn run_exam(
    app: &App,
    deck_id: &str,
    date: Option<&str>,
    clear: bool,
    format: &OutputFormat,
) -> Result<()> {
    app.require_deck(deck_id)?;
    let exam_date = match (date, clear) {
        (Some(raw), false) => Some(parse_time(raw)?),
        (None, true) => None,
        _ => bail!("Give an exam date or --clear"),
    };

    let pending = app.session().set_exam_date(deck_id, exam_date).await?;
    let message = match exam_date {
        Some(date) => format!("Exam for {} set to {}", app.deck_title(deck_id), date.to_rfc3339()),
        None => format!("Exam for {} cleared", app.deck_title(deck_id)),
    };
    report(deck_id, pending, &message, format).await
}

pub async fn run_cancel(app: &App, deck_id: &str, format: &OutputFormat) -> Result<()> {
    app.require_deck(deck_id)?;
    let pending = app.session().cancel_deck(deck_id).await?;
    let message = format!("Cancelled {}", app.deck_title(deck_id));
    report(deck_id, pending, &message, format).await
}

pub async fn run_revive(app: &App, deck_id: &str, format: &OutputFormat) -> Result<()> {
    app.require_deck(deck_id)?;
    let pending = app.session().revive_deck(deck_id).await?;
    let message = format!("Revived {}", app.deck_title(deck_id));
    report(deck_id, pending, &message, format).await
}

async fn report(deck_id: &str, pending: PendingSync, message: &str, format: &OutputFormat) -> Result<()> {
    let schedule = pending.schedule.clone();
    let synced = match pending.wait().await {
        Ok(_) => true,
        Err(e) => {
            log::warn!("Saved locally, remote push pending: {}", e);
            false
        }
    };

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "deckId": deck_id,
                "examDate": schedule.exam_date,
                "isCancelled": schedule.is_cancelled,
                "version": schedule.version,
                "synced": synced,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!("{}", message);
            if !synced {
                println!("  saved locally; run `cogni-cli sync` to retry the upload");
            }
        }
    }

    Ok(())
}
