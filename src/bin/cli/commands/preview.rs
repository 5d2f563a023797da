use anyhow::Result;

use cogni_lib::flashcards::Grade;

use crate::app::App;
use crate::render::terminal::{bold, due_label};
use crate::OutputFormat;

pub async fn run(
    app: &App,
    deck_id: &str,
    card_index: usize,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    app.require_deck(deck_id)?;
    let dues = app.session().preview(deck_id, card_index).await?;
    let now = app.now();

    match format {
        OutputFormat::Json => {
            let output: Vec<serde_json::Value> = Grade::ALL
                .iter()
                .zip(dues.iter())
                .map(|(grade, due)| {
                    serde_json::json!({
                        "grade": grade.to_string(),
                        "due": due,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!("{} card {}", bold(app.deck_title(deck_id), use_color), card_index);
            for (grade, due) in Grade::ALL.iter().zip(dues.iter()) {
                println!("  {:<6} {}", grade.to_string(), due_label(*due, now, use_color));
            }
        }
    }

    Ok(())
}
