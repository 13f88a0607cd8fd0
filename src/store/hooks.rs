//! Best-effort work that runs after a committed write: read-cache
//! invalidation and change notifications.
//!
//! Hooks never influence the ingestion result. [`HookChain::run`] logs a
//! failing hook and moves on to the next one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::core::DocumentSummary;

/// Errors raised by post-commit collaborators.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HookError {
    #[error("cache unavailable: {0}")]
    Cache(String),

    #[error("notification failed: {0}")]
    Notify(String),
}

/// Kind of committed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

/// One fan-out event per committed create/update/delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub action: ChangeAction,
    pub id: String,
    pub summary: DocumentSummary,
}

/// Read cache in front of the document store.
#[async_trait]
pub trait DocumentCache: Send + Sync {
    /// Drop every entry whose key matches `pattern` (trailing `*` wildcard).
    async fn invalidate_pattern(&self, pattern: &str) -> Result<(), HookError>;

    /// Drop one entry.
    async fn invalidate_key(&self, key: &str) -> Result<(), HookError>;
}

/// Transport delivering change events to live subscribers.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    /// Deliver `event`; returns how many subscribers received it.
    async fn emit(&self, event: ChangeEvent) -> Result<usize, HookError>;
}

/// Work run once per committed change.
#[async_trait]
pub trait PostCommitHook: Send + Sync {
    fn name(&self) -> &str;

    async fn after_commit(&self, event: &ChangeEvent) -> Result<(), HookError>;
}

/// Invalidates the namespace listing and the per-document detail key.
pub struct CacheInvalidationHook {
    cache: Arc<dyn DocumentCache>,
    namespace: String,
}

impl CacheInvalidationHook {
    pub fn new(cache: Arc<dyn DocumentCache>, namespace: impl Into<String>) -> Self {
        Self {
            cache,
            namespace: namespace.into(),
        }
    }

    /// `"{namespace}:*"`
    pub fn list_pattern(&self) -> String {
        format!("{}:*", self.namespace)
    }

    /// `"{namespace}:{id}"`
    pub fn detail_key(&self, id: &str) -> String {
        format!("{}:{}", self.namespace, id)
    }
}

#[async_trait]
impl PostCommitHook for CacheInvalidationHook {
    fn name(&self) -> &str {
        "cache-invalidation"
    }

    /// Attempts both invalidations; reports the first failure.
    async fn after_commit(&self, event: &ChangeEvent) -> Result<(), HookError> {
        let listing = self.cache.invalidate_pattern(&self.list_pattern()).await;
        let detail = self.cache.invalidate_key(&self.detail_key(&event.id)).await;
        listing.and(detail)
    }
}

/// Forwards every change to a [`ChangeNotifier`].
pub struct NotificationHook {
    notifier: Arc<dyn ChangeNotifier>,
}

impl NotificationHook {
    pub fn new(notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl PostCommitHook for NotificationHook {
    fn name(&self) -> &str {
        "notification"
    }

    async fn after_commit(&self, event: &ChangeEvent) -> Result<(), HookError> {
        let delivered = self.notifier.emit(event.clone()).await?;
        debug!(id = %event.id, delivered, "change event emitted");
        Ok(())
    }
}

/// Ordered list of post-commit hooks.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn PostCommitHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Arc<dyn PostCommitHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook in order. Returns the number that failed.
    pub async fn run(&self, event: &ChangeEvent) -> usize {
        let mut failed = 0;
        for hook in &self.hooks {
            if let Err(e) = hook.after_commit(event).await {
                failed += 1;
                warn!(hook = hook.name(), id = %event.id, error = %e, "post-commit hook failed");
            }
        }
        failed
    }
}

/// Process-local cache, enough for tests and single-node setups.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) -> Result<(), HookError> {
        self.lock()?.insert(key.into(), value.into());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, HookError> {
        Ok(self.lock()?.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, HookError> {
        self.entries
            .lock()
            .map_err(|_| HookError::Cache("cache lock poisoned".into()))
    }
}

#[async_trait]
impl DocumentCache for InMemoryCache {
    async fn invalidate_pattern(&self, pattern: &str) -> Result<(), HookError> {
        let mut entries = self.lock()?;
        match pattern.strip_suffix('*') {
            Some(prefix) => entries.retain(|k, _| !k.starts_with(prefix)),
            None => {
                entries.remove(pattern);
            }
        }
        Ok(())
    }

    async fn invalidate_key(&self, key: &str) -> Result<(), HookError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Fan-out over a tokio broadcast channel. Slow subscribers lag; they never
/// block the sender.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<ChangeEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl ChangeNotifier for BroadcastNotifier {
    async fn emit(&self, event: ChangeEvent) -> Result<usize, HookError> {
        // no live subscribers is not a failure
        Ok(self.tx.send(event).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn event(id: &str) -> ChangeEvent {
        ChangeEvent {
            action: ChangeAction::Created,
            id: id.into(),
            summary: DocumentSummary {
                id: id.into(),
                access_key: None,
                number: Some(1),
                counterparty: "ACME".into(),
                value: dec!(10),
            },
        }
    }

    struct Failing;

    #[async_trait]
    impl PostCommitHook for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn after_commit(&self, _event: &ChangeEvent) -> Result<(), HookError> {
            Err(HookError::Cache("down".into()))
        }
    }

    #[tokio::test]
    async fn invalidation_clears_namespace_only() {
        let cache = Arc::new(InMemoryCache::new());
        cache.put("documents:list", "x").unwrap();
        cache.put("documents:a", "y").unwrap();
        cache.put("suppliers:1", "z").unwrap();

        let hook = CacheInvalidationHook::new(cache.clone(), "documents");
        assert_eq!(hook.detail_key("a"), "documents:a");
        hook.after_commit(&event("a")).await.unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("suppliers:1").unwrap().as_deref(), Some("z"));
    }

    /// Pattern invalidation is down; single keys still work.
    struct NoPatterns(InMemoryCache);

    #[async_trait]
    impl DocumentCache for NoPatterns {
        async fn invalidate_pattern(&self, _pattern: &str) -> Result<(), HookError> {
            Err(HookError::Cache("SCAN unsupported".into()))
        }

        async fn invalidate_key(&self, key: &str) -> Result<(), HookError> {
            self.0.invalidate_key(key).await
        }
    }

    #[tokio::test]
    async fn detail_key_cleared_when_pattern_fails() {
        let cache = Arc::new(NoPatterns(InMemoryCache::new()));
        cache.0.put("documents:list", "x").unwrap();
        cache.0.put("documents:a", "y").unwrap();

        let hook = CacheInvalidationHook::new(cache.clone(), "documents");
        let err = hook.after_commit(&event("a")).await.unwrap_err();

        assert!(matches!(err, HookError::Cache(_)));
        assert_eq!(cache.0.get("documents:a").unwrap(), None);
        assert_eq!(cache.0.get("documents:list").unwrap().as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn chain_continues_past_failures() {
        let notifier = Arc::new(BroadcastNotifier::new(8));
        let mut rx = notifier.subscribe();

        let mut chain = HookChain::new();
        chain.push(Arc::new(Failing));
        chain.push(Arc::new(NotificationHook::new(notifier.clone())));

        assert_eq!(chain.run(&event("a")).await, 1);
        assert_eq!(rx.recv().await.unwrap().id, "a");
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_ok() {
        let notifier = BroadcastNotifier::new(4);
        assert_eq!(notifier.emit(event("a")).await.unwrap(), 0);
    }
}
