//! formtwo-upload - send stored day files to the remote collector
//!
//! `list` shows the documents found in the survey directory. `submit` selects
//! documents by name and uploads them as one batch.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use formtwo_common::config::{resolve_survey_dir, DiscoveryPolicy, TomlConfig};
use formtwo_common::events::EventBus;
use formtwo_common::logging;
use formtwo_upload::UploadPipeline;
use tracing::info;

/// Command-line arguments for formtwo-upload
#[derive(Parser, Debug)]
#[command(name = "formtwo-upload")]
#[command(about = "Batch upload of survey day files")]
#[command(version)]
struct Args {
    /// Path to formtwo.toml
    #[arg(short, long, env = "FORMTWO_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the day files
    #[arg(short, long)]
    survey_dir: Option<PathBuf>,

    /// Collector URL (overrides upload.collector_url)
    #[arg(long, env = "FORMTWO_COLLECTOR_URL")]
    collector_url: Option<String>,

    /// List unreadable files instead of failing discovery
    #[arg(long)]
    skip_invalid: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List discovered day files
    List,
    /// Upload the named day files
    Submit {
        #[arg(required = true)]
        files: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    logging::init(&config.logging).context("Failed to initialize logging")?;
    info!("Starting FormTwo uploader (formtwo-upload) v{}", env!("CARGO_PKG_VERSION"));

    if let Some(url) = args.collector_url {
        config.upload.collector_url = url;
    }
    if args.skip_invalid {
        config.upload.discovery = DiscoveryPolicy::SkipInvalid;
    }

    let survey_dir = resolve_survey_dir(args.survey_dir.as_deref(), &config);
    info!("Survey directory: {}", survey_dir.display());
    info!("Collector: {}", config.upload.collector_url);

    let events = EventBus::default();
    let mut notifications = events.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = notifications.recv().await {
            println!("{}", event.message());
        }
    });

    let mut pipeline = UploadPipeline::from_config(&survey_dir, &config.upload, events)
        .context("Failed to set up upload pipeline")?;

    let outcome = run(&mut pipeline, args.command).await;

    // Closing the bus ends the printer once queued notifications are shown
    drop(pipeline);
    let _ = printer.await;

    outcome
}

async fn run(pipeline: &mut UploadPipeline, command: Command) -> Result<()> {
    let documents = pipeline.discover().await?;

    match command {
        Command::List => {
            for document in documents {
                println!("{}", document.name);
            }
            for skipped in pipeline.skipped() {
                println!("{} (unreadable: {})", skipped.name, skipped.message);
            }
        }
        Command::Submit { files } => {
            for file in &files {
                let index = pipeline
                    .documents()
                    .iter()
                    .position(|d| &d.name == file)
                    .with_context(|| format!("{} not found in survey directory", file))?;
                if !pipeline.documents()[index].selected {
                    pipeline.toggle_selection(index)?;
                }
            }

            let report = pipeline.submit_selected().await?;
            if report.failed() > 0 {
                bail!(
                    "{} of {} survey document(s) failed to upload",
                    report.failed(),
                    report.outcomes.len()
                );
            }
        }
    }

    Ok(())
}
