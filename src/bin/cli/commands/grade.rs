use anyhow::{Context, Result};

use cogni_lib::flashcards::Grade;

use crate::app::App;
use crate::render::terminal::{bold, due_label, status_label};
use crate::OutputFormat;

pub async fn run(
    app: &App,
    deck_id: &str,
    card_index: usize,
    grade: &str,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    app.require_deck(deck_id)?;
    let grade: Grade = grade.parse()?;

    let outcome = app
        .session()
        .grade_card(deck_id, card_index, grade)
        .await
        .with_context(|| format!("Failed to grade card {} of '{}'", card_index, deck_id))?;
    let version = outcome.sync.version();
    let pushed = outcome.sync.wait().await;
    if let Err(e) = &pushed {
        log::warn!("Saved locally, remote push pending: {}", e);
    }
    let state = outcome.state;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "deckId": deck_id,
                "cardIndex": card_index,
                "grade": grade.to_string(),
                "state": state,
                "requeued": outcome.requeued,
                "version": version,
                "synced": pushed.is_ok(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!(
                "{} card {} as {}",
                bold(app.deck_title(deck_id), use_color),
                card_index,
                grade
            );
            println!("  due:        {}", due_label(state.due, app.now(), use_color));
            println!("  status:     {}", status_label(state.status));
            println!("  stability:  {:.2}", state.stability);
            println!("  difficulty: {:.2}", state.difficulty);
            if outcome.requeued {
                println!("  (back in this session)");
            }
            if pushed.is_err() {
                println!("  saved locally; run `cogni-cli sync` to retry the upload");
            }
        }
    }

    Ok(())
}
