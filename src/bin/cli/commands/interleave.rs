use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::app::App;
use crate::render::terminal::{paint, Color};
use crate::OutputFormat;

pub async fn run(app: &App, seed: Option<u64>, format: &OutputFormat, use_color: bool) -> Result<()> {
    let queues = app.session().get_due_queue_all(&app.deck_ids()).await?;
    let cards = match seed {
        Some(seed) => app
            .session()
            .start_interleaved_session_with(&queues, &mut StdRng::seed_from_u64(seed)),
        None => app.session().start_interleaved_session(&queues),
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&cards)?);
        }
        OutputFormat::Plain => {
            if cards.is_empty() {
                println!("Nothing due.");
                return Ok(());
            }
            for (position, card) in cards.iter().enumerate() {
                let title = card.deck_title.as_deref().unwrap_or(&card.deck_id);
                println!(
                    "{:>4}. {} #{}",
                    position + 1,
                    paint(title, Color::CYAN, use_color),
                    card.card_index
                );
            }
            println!("\n{} cards", cards.len());
        }
    }

    Ok(())
}
