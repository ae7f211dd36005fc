//! formtwo-store - command-line access to the day file store
//!
//! Starts survey records, merges answers into them and prints day files.
//! Day file names default to today's date (`YYYY-MM-DD.json`).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use formtwo_common::config::{ensure_survey_dir, resolve_survey_dir, TomlConfig};
use formtwo_common::events::EventBus;
use formtwo_common::logging;
use formtwo_store::{answers_from_value, SurveyStore};
use tracing::info;

/// Command-line arguments for formtwo-store
#[derive(Parser, Debug)]
#[command(name = "formtwo-store")]
#[command(about = "Local survey day file store")]
#[command(version)]
struct Args {
    /// Path to formtwo.toml
    #[arg(short, long, env = "FORMTWO_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the day files
    #[arg(short, long)]
    survey_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new survey record
    New {
        survey_number: String,
        /// Day file name (defaults to today's)
        #[arg(short, long)]
        file: Option<String>,
    },
    /// Merge answers into a survey record
    Answer {
        survey_number: String,
        /// JSON array of answers, or an object whose values are answers
        answers: String,
        #[arg(short, long)]
        file: Option<String>,
    },
    /// Print a day file
    Show {
        #[arg(short, long)]
        file: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    logging::init(&config.logging).context("Failed to initialize logging")?;
    info!("Starting FormTwo survey store (formtwo-store) v{}", env!("CARGO_PKG_VERSION"));

    let survey_dir = resolve_survey_dir(args.survey_dir.as_deref(), &config);
    ensure_survey_dir(&survey_dir)?;
    info!("Survey directory: {}", survey_dir.display());

    let events = EventBus::default();
    let mut notifications = events.subscribe();
    let store = SurveyStore::new(survey_dir, events);

    match args.command {
        Command::New { survey_number, file } => {
            let file = file.unwrap_or_else(|| store.today_file_name());
            store
                .create_survey(&file, &survey_number)
                .await
                .with_context(|| format!("Failed to create survey {}", survey_number))?;
        }
        Command::Answer {
            survey_number,
            answers,
            file,
        } => {
            let file = file.unwrap_or_else(|| store.today_file_name());
            let value = serde_json::from_str(&answers).context("Answers are not valid JSON")?;
            let answers = answers_from_value(value).context("Every answer needs a qId")?;
            store
                .upsert_responses(&file, answers, &survey_number)
                .await
                .context("Failed to save data")?;
        }
        Command::Show { file } => {
            let file = file.unwrap_or_else(|| store.today_file_name());
            let doc = store
                .read_document(&file)
                .await
                .with_context(|| format!("Failed to read {}", file))?;
            println!("{}", doc.to_pretty_json()?);
        }
    }

    while let Ok(event) = notifications.try_recv() {
        println!("{}", event.message());
    }

    Ok(())
}
