use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use docbench::codec::{DocumentId, DocumentKey, DocumentRecord};
use docbench::error::{BenchError, Result};
use docbench::storage::{DocumentStore, MemoryStore};
use docbench::types::{
    Cas, DropOutcome, GetOutcome, IndexDefinition, IndexedQuery, ViewDefinition, ViewQuery,
    ViewRow, WriteOutcome,
};

/// Wraps a [`MemoryStore`] and injects failures on chosen operations.
pub struct FaultyStore {
    pub inner: Arc<MemoryStore>,
    /// Identifiers whose insert fails outright.
    pub failing_inserts: HashSet<DocumentId>,
    /// Identifiers whose replace always reports a CAS conflict.
    pub conflicting_replaces: HashSet<DocumentId>,
    pub fail_drops: bool,
    /// Zero-based index of the `create_index` call that fails.
    pub fail_create_index_at: Option<usize>,
    /// Extra delay on every lookup.
    pub lookup_delay: Duration,
    create_index_calls: AtomicUsize,
    pub lookups: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing_inserts: HashSet::new(),
            conflicting_replaces: HashSet::new(),
            fail_drops: false,
            fail_create_index_at: None,
            lookup_delay: Duration::ZERO,
            create_index_calls: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
        }
    }

    fn injected(operation: &str) -> BenchError {
        BenchError::Status {
            operation: operation.to_string(),
            status: 503,
            body: "injected fault".into(),
        }
    }

    async fn lookup_pause(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if !self.lookup_delay.is_zero() {
            tokio::time::sleep(self.lookup_delay).await;
        }
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    async fn insert(&self, key: &DocumentKey, record: &DocumentRecord) -> Result<WriteOutcome> {
        if key.id().is_some_and(|id| self.failing_inserts.contains(&id)) {
            return Err(Self::injected("insert"));
        }
        self.inner.insert(key, record).await
    }

    async fn replace(
        &self,
        key: &DocumentKey,
        record: &DocumentRecord,
        cas: &Cas,
    ) -> Result<WriteOutcome> {
        if key
            .id()
            .is_some_and(|id| self.conflicting_replaces.contains(&id))
        {
            return Ok(WriteOutcome::Conflict);
        }
        self.inner.replace(key, record, cas).await
    }

    async fn get(&self, key: &DocumentKey) -> Result<GetOutcome> {
        self.inner.get(key).await
    }

    async fn execute_view(&self, query: &ViewQuery) -> Result<Vec<ViewRow>> {
        self.lookup_pause().await;
        self.inner.execute_view(query).await
    }

    async fn execute_indexed_query(&self, query: &IndexedQuery) -> Result<Vec<serde_json::Value>> {
        self.lookup_pause().await;
        self.inner.execute_indexed_query(query).await
    }

    async fn create_view(&self, definition: &ViewDefinition) -> Result<()> {
        self.inner.create_view(definition).await
    }

    async fn create_index(&self, definition: &IndexDefinition) -> Result<()> {
        let call = self.create_index_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_create_index_at == Some(call) {
            return Err(Self::injected("create index"));
        }
        self.inner.create_index(definition).await
    }

    async fn drop_index(&self, name: &str) -> Result<DropOutcome> {
        if self.fail_drops {
            return Err(Self::injected("drop index"));
        }
        self.inner.drop_index(name).await
    }

    async fn create_primary_index(&self) -> Result<()> {
        self.inner.create_primary_index().await
    }
}
