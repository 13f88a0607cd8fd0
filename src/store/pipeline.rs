use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use serde::ser::{SerializeStruct, Serializer};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::db::DocumentStore;
use super::duplicate::{DuplicateResolver, Resolution};
use super::hooks::{
    CacheInvalidationHook, ChangeAction, ChangeEvent, ChangeNotifier, DocumentCache, HookChain,
    NotificationHook, PostCommitHook,
};
use crate::config::IngestConfig;
use crate::core::*;
use crate::nfe::{self, ValidationReport};

/// One inbound document.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub bytes: Vec<u8>,
    /// Id to store under; a fresh UUID when absent.
    pub id: Option<String>,
    /// Write even when the access key is already stored under another id.
    pub force_replace: bool,
    /// Pricing settings. When absent, a stored document keeps its own and a
    /// new one gets the configured default.
    pub pricing: Option<PricingConfig>,
}

impl IngestRequest {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            id: None,
            force_replace: false,
            pricing: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn force_replace(mut self, force: bool) -> Self {
        self.force_replace = force;
        self
    }

    pub fn pricing(mut self, pricing: PricingConfig) -> Self {
        self.pricing = Some(pricing);
        self
    }
}

/// Incoming side of a duplicate prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingSummary {
    pub number: Option<u64>,
    pub counterparty: String,
    pub value: Decimal,
}

/// A document held back because its access key is already stored under
/// another id. Hand it to [`IngestionPipeline::resolve`] once the user has
/// decided.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingIngestion {
    pub existing: DocumentSummary,
    pub incoming: IncomingSummary,
    /// Fully extracted and allocated document, ready to commit.
    pub document: Document,
    pub warnings: Vec<ValidationError>,
    /// Whether the request carried its own pricing.
    pub pricing_supplied: bool,
}

impl Serialize for PendingIngestion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("PendingIngestion", 4)?;
        s.serialize_field("isDuplicate", &true)?;
        s.serialize_field("confirmationRequired", &true)?;
        s.serialize_field("existing", &self.existing)?;
        s.serialize_field("incoming", &self.incoming)?;
        s.end()
    }
}

/// What a committed ingestion reports back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    pub number: Option<u64>,
    pub counterparty: String,
    pub value: Decimal,
    pub line_count: usize,
    pub warnings: Vec<ValidationError>,
}

/// Result of [`IngestionPipeline::ingest`] and [`IngestionPipeline::resolve`].
///
/// Serializes without a tag, as the bare report, prompt or receipt.
/// `Cancelled` serializes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IngestOutcome {
    /// Structural errors; nothing was written.
    Invalid(ValidationReport),
    /// Duplicate access key; nothing was written.
    ConfirmationRequired(PendingIngestion),
    Committed(IngestReceipt),
    /// The caller declined a pending replacement.
    Cancelled,
}

impl IngestOutcome {
    pub fn receipt(&self) -> Option<&IngestReceipt> {
        match self {
            Self::Committed(receipt) => Some(receipt),
            _ => None,
        }
    }
}

/// The caller's answer to a duplicate prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Replace,
    Cancel,
}

/// Parse, validate, extract, allocate, deduplicate, persist, fan out.
pub struct IngestionPipeline {
    store: DocumentStore,
    hooks: HookChain,
    config: IngestConfig,
}

impl IngestionPipeline {
    pub fn new(store: DocumentStore, config: IngestConfig) -> Self {
        Self {
            store,
            hooks: HookChain::new(),
            config,
        }
    }

    /// Append a post-commit hook.
    pub fn with_hook(mut self, hook: Arc<dyn PostCommitHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Invalidate `cache` under the configured namespace after each write.
    pub fn with_cache(self, cache: Arc<dyn DocumentCache>) -> Self {
        let namespace = self.config.cache_namespace.clone();
        self.with_hook(Arc::new(CacheInvalidationHook::new(cache, namespace)))
    }

    /// Emit a [`ChangeEvent`] through `notifier` after each write.
    pub fn with_notifier(self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.with_hook(Arc::new(NotificationHook::new(notifier)))
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingest one document.
    ///
    /// Unparseable bytes and store failures are errors; structural
    /// violations and duplicate prompts are outcomes.
    #[instrument(skip_all, fields(bytes = request.bytes.len(), force = request.force_replace))]
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome, IngestError> {
        let tree = nfe::parse_tree(&request.bytes)?;

        let report = nfe::validate_structure(&tree, &self.config);
        if !report.is_valid {
            warn!(errors = report.errors.len(), "document rejected");
            return Ok(IngestOutcome::Invalid(report));
        }

        let id = request.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let nfe::Extraction { mut document, gaps } =
            nfe::extract_document(&tree, id, &self.config);
        let pricing_supplied = request.pricing.is_some();
        if let Some(pricing) = request.pricing {
            document.pricing = pricing;
        }

        let mut warnings = report.warnings;
        warnings.extend(gaps);

        let resolution = DuplicateResolver::new(&self.store)
            .resolve(&document, request.force_replace)
            .await?;
        if matches!(resolution, Resolution::SameIdUpdate) {
            self.carry_over_settings(&mut document, pricing_supplied).await?;
        }
        allocate(&mut document);

        let action = match resolution {
            Resolution::ConfirmationRequired(conflict) => {
                info!(
                    id = %document.id,
                    existing = %conflict.existing.id,
                    "duplicate access key; awaiting confirmation"
                );
                let incoming = IncomingSummary {
                    number: document.number,
                    counterparty: document.counterparty_name.clone(),
                    value: document.declared_net_total,
                };
                return Ok(IngestOutcome::ConfirmationRequired(PendingIngestion {
                    existing: conflict.existing,
                    incoming,
                    document,
                    warnings,
                    pricing_supplied,
                }));
            }
            Resolution::SameIdUpdate => ChangeAction::Updated,
            Resolution::New | Resolution::ForcedReplace { .. } => ChangeAction::Created,
        };

        self.commit(document, action, warnings).await
    }

    /// Continue a held-back ingestion.
    ///
    /// `Replace` writes the pending document under its own id and leaves the
    /// existing record untouched.
    #[instrument(skip(self, pending), fields(id = %pending.document.id))]
    pub async fn resolve(
        &self,
        pending: PendingIngestion,
        confirmation: Confirmation,
    ) -> Result<IngestOutcome, IngestError> {
        if confirmation == Confirmation::Cancel {
            info!("pending ingestion cancelled");
            return Ok(IngestOutcome::Cancelled);
        }

        let PendingIngestion {
            mut document,
            warnings,
            pricing_supplied,
            ..
        } = pending;

        // the store may have moved on since the prompt
        let action = match DuplicateResolver::new(&self.store)
            .resolve(&document, true)
            .await?
        {
            Resolution::SameIdUpdate => {
                self.carry_over_settings(&mut document, pricing_supplied).await?;
                allocate(&mut document);
                ChangeAction::Updated
            }
            _ => ChangeAction::Created,
        };
        self.commit(document, action, warnings).await
    }

    /// Delete a stored document and its line items.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<bool, IngestError> {
        let Some(summary) = self.store.find_by_id(id).await? else {
            return Ok(false);
        };
        if !self.store.delete_document(id).await? {
            return Ok(false);
        }

        let event = ChangeEvent {
            action: ChangeAction::Deleted,
            id: id.to_string(),
            summary,
        };
        self.hooks.run(&event).await;
        Ok(true)
    }

    /// Keep the stored document's hidden lines and pricing across a
    /// same-id update. Pricing supplied with the request still wins.
    async fn carry_over_settings(
        &self,
        document: &mut Document,
        pricing_supplied: bool,
    ) -> Result<(), IngestError> {
        let Some(mut stored) = self.store.load_settings(&document.id).await? else {
            return Ok(());
        };
        if pricing_supplied {
            stored.pricing = document.pricing.clone();
        }
        document.apply_settings(stored);
        Ok(())
    }

    async fn commit(
        &self,
        document: Document,
        action: ChangeAction,
        warnings: Vec<ValidationError>,
    ) -> Result<IngestOutcome, IngestError> {
        // the stored key wins over the incoming one
        let summary = self.store.replace_document(&document).await?;
        let id = summary.id.clone();

        let event = ChangeEvent {
            action,
            id: id.clone(),
            summary: summary.clone(),
        };
        let failed = self.hooks.run(&event).await;
        if !warnings.is_empty() {
            warn!(id = %id, warnings = warnings.len(), "document stored with warnings");
        }
        info!(id = %id, ?action, hooks_failed = failed, "ingestion committed");

        Ok(IngestOutcome::Committed(IngestReceipt {
            id,
            access_key: summary.access_key,
            number: summary.number,
            counterparty: summary.counterparty,
            value: summary.value,
            line_count: document.lines.len(),
            warnings,
        }))
    }
}

/// Spread the declared discount, then the configured freight, over the lines.
fn allocate(document: &mut Document) {
    allocate_discount(&mut document.lines, document.declared_net_total);
    allocate_freight(
        &mut document.lines,
        document.pricing.freight,
        document.pricing.entry_tax_rate,
    );
}
