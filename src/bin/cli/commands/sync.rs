use anyhow::Result;

use crate::app::App;
use crate::render::terminal::sync_state_label;
use crate::OutputFormat;

pub async fn run(app: &App, status_only: bool, format: &OutputFormat, use_color: bool) -> Result<()> {
    let result = if status_only {
        None
    } else {
        Some(app.session().flush().await)
    };
    let status = app.session().sync_status();

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "status": status,
                "flush": result,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            if let Some(result) = &result {
                println!(
                    "Pushed {} deck(s), {} failed ({} ms)",
                    result.decks_pushed, result.decks_failed, result.duration_ms
                );
            }
            println!("Status:  {}", sync_state_label(status.status, use_color));
            println!("Pending: {}", status.pending_changes);
            if let Some(last_sync) = status.last_sync {
                println!("Last:    {}", last_sync.to_rfc3339());
            }
            if let Some(error) = &status.error {
                println!("Error:   {}", error);
            }
        }
    }

    Ok(())
}
