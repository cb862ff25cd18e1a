//! Large Point - command-line host for the clustered viewport index
//!
//! Loads a CSV file, logs load progress to stderr and prints a JSON report answering the
//! viewport, lookup, expansion and leaves requests given on the command line.

mod logging;
mod output;
mod settings;

use clap::Parser;
use large_point_lib::{CsvRowSource, DataError, LoadEvent, LoadOutcome, SessionManager};
use output::Report;
use settings::Settings;
use std::io::Write;

/// Failures that end the program with a non-zero exit code
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("Failed to write report: {0}")]
    Output(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Load was superseded before it completed")]
    Superseded,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::setup_logging();

    let settings = Settings::parse();
    if let Err(err) = run(&settings).await {
        tracing::error!("{}", err);
        return Err(err.into());
    }
    Ok(())
}

async fn run(settings: &Settings) -> Result<(), CliError> {
    let manager = SessionManager::new(settings.to_config())?;
    let source = CsvRowSource::from_path(&settings.csv)?;

    let path = settings.csv.display();
    let outcome = manager
        .load(source, |event| match event {
            LoadEvent::Started => tracing::info!("Loading {}", path),
            LoadEvent::Progress(rows) => tracing::info!("{} rows processed", rows),
            LoadEvent::Completed(points) => tracing::info!("{} points ready", points),
            LoadEvent::Failed(message) => tracing::error!("Loading {} failed: {}", path, message),
        })
        .await?;

    let session = match outcome {
        LoadOutcome::Published(session) => session,
        LoadOutcome::Superseded => return Err(CliError::Superseded),
    };

    let nodes = session.query(&settings.viewport(), settings.zoom);
    let report = Report::new(&session, &nodes, settings);

    let mut stdout = std::io::stdout().lock();
    if settings.pretty {
        serde_json::to_writer_pretty(&mut stdout, &report)?;
    } else {
        serde_json::to_writer(&mut stdout, &report)?;
    }
    writeln!(stdout)?;
    Ok(())
}
