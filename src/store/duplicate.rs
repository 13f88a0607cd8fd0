use serde::Serialize;
use tracing::{debug, warn};

use super::db::DocumentStore;
use crate::core::{Document, DocumentSummary, IngestError};

/// A stored document sharing the incoming access key under another id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateConflict {
    pub existing: DocumentSummary,
    pub incoming: DocumentSummary,
}

/// What to do with an incoming document, given what is already stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Nothing stored under this id or access key.
    New,
    /// The id is already stored; overwrite it.
    SameIdUpdate,
    /// The key is stored under another id and the caller forced the write.
    /// The other record stays as it is.
    ForcedReplace { replaced: DocumentSummary },
    /// The key is stored under another id; nothing may be written until the
    /// caller confirms.
    ConfirmationRequired(DuplicateConflict),
}

impl Resolution {
    /// Whether the pipeline may go on to persist.
    pub fn may_persist(&self) -> bool {
        !matches!(self, Self::ConfirmationRequired(_))
    }
}

/// Looks up an incoming document against the store.
pub struct DuplicateResolver<'a> {
    store: &'a DocumentStore,
}

impl<'a> DuplicateResolver<'a> {
    pub fn new(store: &'a DocumentStore) -> Self {
        Self { store }
    }

    /// Decide how `incoming` relates to stored documents.
    ///
    /// An id match wins over a key match. Without an access key only the id
    /// is compared.
    pub async fn resolve(
        &self,
        incoming: &Document,
        force_replace: bool,
    ) -> Result<Resolution, IngestError> {
        if let Some(stored) = self.store.find_by_id(&incoming.id).await? {
            if stored.access_key.is_some() && stored.access_key != incoming.access_key {
                warn!(
                    id = %incoming.id,
                    stored_key = ?stored.access_key,
                    incoming_key = ?incoming.access_key,
                    "access key differs from stored record; stored key is kept"
                );
            }
            debug!(id = %incoming.id, "same-id update");
            return Ok(Resolution::SameIdUpdate);
        }

        let Some(key) = incoming.access_key.as_deref() else {
            debug!(id = %incoming.id, "no access key; treated as new");
            return Ok(Resolution::New);
        };

        match self.store.find_by_access_key(key).await? {
            None => {
                debug!(id = %incoming.id, "new document");
                Ok(Resolution::New)
            }
            Some(existing) if force_replace => {
                debug!(id = %incoming.id, replaced = %existing.id, "forced replace");
                Ok(Resolution::ForcedReplace { replaced: existing })
            }
            Some(existing) => {
                debug!(id = %incoming.id, existing = %existing.id, "confirmation required");
                Ok(Resolution::ConfirmationRequired(DuplicateConflict {
                    existing,
                    incoming: incoming.summary(),
                }))
            }
        }
    }
}
