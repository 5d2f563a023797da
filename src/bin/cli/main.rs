mod app;
mod commands;
mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cogni-cli", about = "Spaced-repetition scheduler CLI", version)]
struct Cli {
    /// Config file (default: <config dir>/cogni/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Pretend the current time is this (RFC 3339 or YYYY-MM-DD)
    #[arg(long, global = true)]
    now: Option<String>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Grade one card
    Grade {
        deck: String,
        /// Card index within the deck
        card: usize,
        /// again, hard, good, easy (or 1-4)
        grade: String,
    },

    /// Show due cards
    Due {
        /// Deck id (omit with --all)
        deck: Option<String>,
        /// Every configured deck
        #[arg(long)]
        all: bool,
    },

    /// Build an interleaved session across every configured deck
    Interleave {
        /// Seed for a reproducible order
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Set or clear a deck's exam date
    Exam {
        deck: String,
        /// RFC 3339 or YYYY-MM-DD (end of that day, UTC)
        date: Option<String>,
        /// Remove the exam date
        #[arg(long, conflicts_with = "date")]
        clear: bool,
    },

    /// Stop scheduling a deck
    Cancel { deck: String },

    /// Resume a cancelled deck
    Revive { deck: String },

    /// Show when each grade would schedule a card
    Preview { deck: String, card: usize },

    /// Push pending changes and show sync status
    Sync {
        /// Only show status
        #[arg(long)]
        status: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let use_color = !cli.no_color && atty_check();
    let app = app::App::new(cli.config.as_deref(), cli.now.as_deref())?;

    let result = match cli.command {
        Command::Grade { deck, card, grade } => {
            commands::grade::run(&app, &deck, card, &grade, &cli.format, use_color).await
        }
        Command::Due { deck, all } => {
            commands::due::run(&app, deck.as_deref(), all, &cli.format, use_color).await
        }
        Command::Interleave { seed } => {
            commands::interleave::run(&app, seed, &cli.format, use_color).await
        }
        Command::Exam { deck, date, clear } => {
            commands::deck::run_exam(&app, &deck, date.as_deref(), clear, &cli.format).await
        }
        Command::Cancel { deck } => commands::deck::run_cancel(&app, &deck, &cli.format).await,
        Command::Revive { deck } => commands::deck::run_revive(&app, &deck, &cli.format).await,
        Command::Preview { deck, card } => {
            commands::preview::run(&app, &deck, card, &cli.format, use_color).await
        }
        Command::Sync { status } => commands::sync::run(&app, status, &cli.format, use_color).await,
    };

    app.shutdown().await;
    result
}

/// Check if stdout is a terminal (for color support)
fn atty_check() -> bool {
    use std::io::IsTerminal;
    std::io::stdout().is_terminal()
}
