//! Ingest one NF-e file into a SQLite database and print the outcome.
//!
//! ```text
//! cargo run --example ingest_file --features store -- nota.xml [settings.toml] [--force]
//! RUST_LOG=nfe_ingest=debug cargo run --example ingest_file --features store -- nota.xml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use nfe_ingest::config::Settings;
use nfe_ingest::store::{
    BroadcastNotifier, DocumentStore, InMemoryCache, IngestRequest, IngestionPipeline,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nfe_ingest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut force = false;
    let mut paths = Vec::new();
    for arg in std::env::args().skip(1) {
        if arg == "--force" {
            force = true;
        } else {
            paths.push(PathBuf::from(arg));
        }
    }
    let Some(input) = paths.first() else {
        eprintln!("usage: ingest_file <nfe.xml> [settings.toml] [--force]");
        std::process::exit(2);
    };
    let settings = match paths.get(1) {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    let store = DocumentStore::connect(&settings.store).await?;
    let notifier = Arc::new(BroadcastNotifier::new(16));
    let mut events = notifier.subscribe();
    let pipeline = IngestionPipeline::new(store, settings.ingest)
        .with_cache(Arc::new(InMemoryCache::new()))
        .with_notifier(notifier);

    let bytes = std::fs::read(input)?;
    info!(file = %input.display(), bytes = bytes.len(), "ingesting");
    let outcome = pipeline
        .ingest(IngestRequest::new(bytes).force_replace(force))
        .await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    while let Ok(event) = events.try_recv() {
        info!(action = ?event.action, id = %event.id, "change event");
    }
    Ok(())
}
