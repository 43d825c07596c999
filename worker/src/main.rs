//! Agent core worker
//!
//! Reads one JSON command per line from stdin (`{"ask": {...}}` or
//! `{"poll": {...}}`), prints one JSON answer per line, and prints
//! streamed chunks as they are published. On end of input it waits for
//! queued executions to finish.

mod agents;
mod engine;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ace_runner::EngineConfig;

use crate::engine::{print_frames, Engine};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ace_worker=debug,ace_runner=debug,ace_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = EngineConfig::from_env()?;
    tracing::info!("Using data directory: {:?}", config.data_dir);

    let agents = match std::env::var("ACE_AGENTS") {
        Ok(path) if !path.trim().is_empty() => agents::load_agents(&PathBuf::from(path)).await?,
        _ => Vec::new(),
    };

    let engine = Engine::start(config, agents).await?;

    // Print published frames as they arrive
    let printer = tokio::spawn(print_frames(
        engine.publisher().subscribe(),
        std::io::stdout(),
    ));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let answer = engine.handle_line(&line).await;
        println!("{}", answer);
    }

    tracing::info!("Input closed, waiting for queued executions");
    engine.shutdown().await?;
    // The printer drains buffered frames and stops once every publisher is dropped
    let printed = printer.await.context("Frame printer panicked")?;
    tracing::info!("Printed {} frames", printed);
    Ok(())
}
