use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::{bail, Result};

use cogni_lib::flashcards::{DeckId, DueSummary};

use crate::app::App;
use crate::render::terminal::{bold, index_ranges};
use crate::OutputFormat;

pub async fn run(
    app: &App,
    deck_id: Option<&str>,
    all: bool,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    let queues: BTreeMap<DeckId, BTreeSet<usize>> = match (deck_id, all) {
        (Some(deck_id), false) => {
            app.require_deck(deck_id)?;
            let due = app.session().get_due_queue(deck_id).await?;
            BTreeMap::from([(deck_id.to_string(), due)])
        }
        (None, true) => app
            .session()
            .get_due_queue_all(&app.deck_ids())
            .await?
            .into_iter()
            .collect(),
        _ => bail!("Give either a deck id or --all"),
    };
    let by_deck: HashMap<DeckId, BTreeSet<usize>> = queues.clone().into_iter().collect();
    let summary = DueSummary::from_queues(&by_deck);

    match format {
        OutputFormat::Json => {
            let decks: Vec<serde_json::Value> = queues
                .iter()
                .map(|(deck_id, due)| {
                    serde_json::json!({
                        "deckId": deck_id,
                        "title": app.deck_title(deck_id),
                        "due": due,
                    })
                })
                .collect();
            let output = serde_json::json!({
                "decks": decks,
                "summary": summary,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            for (deck_id, due) in &queues {
                if due.is_empty() {
                    println!("{}: nothing due", bold(app.deck_title(deck_id), use_color));
                } else {
                    println!(
                        "{}: {} due [{}]",
                        bold(app.deck_title(deck_id), use_color),
                        due.len(),
                        index_ranges(due.iter().copied())
                    );
                }
            }
            if queues.len() > 1 {
                println!(
                    "\n{} cards due across {} deck(s)",
                    summary.total_due, summary.decks_with_due
                );
            }
        }
    }

    Ok(())
}
