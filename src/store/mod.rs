//! Persistence and orchestration: the SQLite document store, duplicate
//! resolution, post-commit hooks and the ingestion pipeline tying them
//! together.
//!
//! # Example
//!
//! ```no_run
//! use nfe_ingest::config::IngestConfig;
//! use nfe_ingest::store::{DocumentStore, IngestOutcome, IngestRequest, IngestionPipeline};
//!
//! # async fn run(bytes: Vec<u8>) -> Result<(), nfe_ingest::IngestError> {
//! let store = DocumentStore::in_memory().await?;
//! let pipeline = IngestionPipeline::new(store, IngestConfig::default());
//!
//! match pipeline.ingest(IngestRequest::new(bytes)).await? {
//!     IngestOutcome::Committed(receipt) => println!("stored {}", receipt.id),
//!     IngestOutcome::ConfirmationRequired(pending) => {
//!         println!("already stored as {}", pending.existing.id)
//!     }
//!     IngestOutcome::Invalid(report) => println!("{:?}", report.error_messages()),
//!     IngestOutcome::Cancelled => {}
//! }
//! # Ok(())
//! # }
//! ```

mod db;
mod duplicate;
mod hooks;
mod pipeline;

pub use db::{DocumentStore, classify};
pub use duplicate::{DuplicateConflict, DuplicateResolver, Resolution};
pub use hooks::{
    BroadcastNotifier, CacheInvalidationHook, ChangeAction, ChangeEvent, ChangeNotifier,
    DocumentCache, HookChain, HookError, InMemoryCache, NotificationHook, PostCommitHook,
};
pub use pipeline::{
    Confirmation, IncomingSummary, IngestOutcome, IngestReceipt, IngestRequest, IngestionPipeline,
    PendingIngestion,
};
