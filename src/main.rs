use anyhow::{Context, Result};
use clap::Parser;
use node_console::archive::ResponseArchive;
use node_console::command::{
    build_batch, BatchReport, CommandQueue, QueueEvent, SequentialCommandProcessor, TemplateGenerator,
};
use node_console::config::ConsoleConfig;
use node_console::session::{RemoteSession, SessionConfig};
use node_console::transport::{TcpConnector, TransportConnector};
use node_console_shared::{CommandStatus, TokenType};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Run the diagnostic command batch for one node
#[derive(Parser, Debug)]
#[command(name = "node-console", version)]
struct Args {
    /// JSON config with the node inventory and session settings
    #[arg(short, long)]
    config: PathBuf,

    /// Node to query, by inventory name
    #[arg(short, long)]
    node: String,

    /// Restrict the batch to these token types (FBC, RPC, LOG, LIS)
    #[arg(short = 't', long = "type")]
    types: Vec<TokenType>,

    /// Directory for the JSON-lines response archive
    #[arg(short, long)]
    archive: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = ConsoleConfig::load(&args.config)?;

    let entry = config
        .node(&args.node)
        .with_context(|| format!("Node {} is not in the inventory", args.node))?;
    let address = entry
        .address()
        .with_context(|| format!("Node {} has no address and no tokens", args.node))?;

    let connector = TcpConnector::for_node(address, entry.port);
    info!("Console starting for {} at {}", entry.node.name, connector.describe());

    let session_config = SessionConfig {
        node_name: entry.node.name.clone(),
        ..config.session.clone()
    };
    let session = RemoteSession::new(connector, session_config)?;
    let queue = Arc::new(CommandQueue::new(session, config.queue.clone()));

    // Spawn queue event logger
    let events = queue.subscribe();
    tokio::spawn(async move {
        log_queue_events(events).await;
    });

    let items = build_batch(&entry.node, &args.types, &TemplateGenerator::default());
    if items.is_empty() {
        warn!("No commands generated for {}", entry.node.name);
    }

    let processor = SequentialCommandProcessor::new(queue.clone());
    let report = processor.run(&entry.node.name, items).await;
    log_report(&report);

    if let Some(dir) = args.archive.or_else(|| config.archive_dir.clone()) {
        match ResponseArchive::new(dir).append(&entry.node.name, &report).await {
            Ok(path) => info!("Archived {} outcomes to {}", report.outcomes.len(), path.display()),
            Err(e) => error!("Failed to archive responses: {:#}", e),
        }
    }

    queue.shutdown().await;

    if report.failed() > 0 {
        warn!(
            "{} of {} commands failed on {}",
            report.failed(),
            report.outcomes.len(),
            entry.node.name
        );
    }
    Ok(())
}

fn log_report(report: &BatchReport) {
    for outcome in &report.outcomes {
        match outcome.status {
            CommandStatus::Completed => info!(
                "{} {} -> {}",
                outcome.token_ref,
                outcome.text,
                outcome.result.as_deref().unwrap_or_default()
            ),
            _ => warn!(
                "{} {} failed: {}",
                outcome.token_ref,
                outcome.text,
                outcome
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| outcome.status.to_string())
            ),
        }
    }
}

async fn log_queue_events(mut events: broadcast::Receiver<QueueEvent>) {
    loop {
        match events.recv().await {
            Ok(QueueEvent::Enqueued { id, token_ref }) => match token_ref {
                Some(token_ref) => debug!("Queued {} for {}", id, token_ref),
                None => debug!("Queued {}", id),
            },
            Ok(QueueEvent::Started { id }) => debug!("Running {}", id),
            Ok(QueueEvent::Completed { id, elapsed_ms }) => debug!("{} done in {}ms", id, elapsed_ms),
            Ok(QueueEvent::Failed { id, error }) => debug!("{} failed ({})", id, error.kind()),
            Ok(QueueEvent::CleanedUp { ids }) => debug!("Reclaimed {} commands", ids.len()),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Queue event logger lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
