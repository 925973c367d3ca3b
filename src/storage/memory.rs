use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::{DocumentStore, INDEX_EXISTS, NO_INDEX_AVAILABLE};
use crate::codec::{DocumentKey, DocumentRecord};
use crate::error::{BenchError, Result};
use crate::types::{
    Cas, DropOutcome, GetOutcome, IndexDefinition, IndexedQuery, ViewDefinition, ViewQuery,
    ViewRow, WriteOutcome,
};

struct StoredDoc {
    record: DocumentRecord,
    cas: u64,
}

/// In-process store with the same conflict, view and index semantics the
/// benchmark relies on. Used for dry runs (`backend = "memory"`) and tests.
pub struct MemoryStore {
    bucket: String,
    docs: DashMap<String, StoredDoc>,
    views: DashMap<String, ViewDefinition>,
    indexes: DashMap<String, IndexDefinition>,
    primary_index: AtomicBool,
    next_cas: AtomicU64,
    latency: Duration,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            docs: DashMap::new(),
            views: DashMap::new(),
            indexes: DashMap::new(),
            primary_index: AtomicBool::new(false),
            next_cas: AtomicU64::new(1),
            latency: Duration::ZERO,
        }
    }

    /// Delay every operation by `latency` to simulate a remote round trip.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.docs.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn record(&self, key: &str) -> Option<DocumentRecord> {
        self.docs.get(key).map(|d| d.record.clone())
    }

    pub fn emails(&self) -> Vec<String> {
        let mut emails: Vec<String> = self.docs.iter().map(|e| e.record.email.clone()).collect();
        emails.sort();
        emails
    }

    pub fn view(&self, design_doc: &str) -> Option<ViewDefinition> {
        self.views.get(design_doc).map(|v| v.clone())
    }

    pub fn index(&self, name: &str) -> Option<IndexDefinition> {
        self.indexes.get(name).map(|i| i.clone())
    }

    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn has_primary_index(&self) -> bool {
        self.primary_index.load(Ordering::Relaxed)
    }

    fn cas(&self) -> u64 {
        self.next_cas.fetch_add(1, Ordering::Relaxed)
    }

    /// Every operation suspends at least once, like a network call would.
    async fn round_trip(&self) {
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn index_covers(&self, email: &str) -> bool {
        self.indexes
            .iter()
            .any(|i| i.lower_email.as_str() <= email && email < i.upper_email.as_str())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn insert(&self, key: &DocumentKey, record: &DocumentRecord) -> Result<WriteOutcome> {
        self.round_trip().await;
        match self.docs.entry(key.as_str().to_string()) {
            Entry::Occupied(_) => Ok(WriteOutcome::Conflict),
            Entry::Vacant(slot) => {
                let cas = self.cas();
                slot.insert(StoredDoc {
                    record: record.clone(),
                    cas,
                });
                Ok(WriteOutcome::Stored(Cas::new(cas.to_string())))
            }
        }
    }

    async fn replace(
        &self,
        key: &DocumentKey,
        record: &DocumentRecord,
        cas: &Cas,
    ) -> Result<WriteOutcome> {
        self.round_trip().await;
        let Some(mut doc) = self.docs.get_mut(key.as_str()) else {
            return Ok(WriteOutcome::NotFound);
        };
        if doc.cas.to_string() != cas.as_str() {
            return Ok(WriteOutcome::Conflict);
        }
        let next = self.cas();
        doc.record = record.clone();
        doc.cas = next;
        Ok(WriteOutcome::Stored(Cas::new(next.to_string())))
    }

    async fn get(&self, key: &DocumentKey) -> Result<GetOutcome> {
        self.round_trip().await;
        Ok(match self.docs.get(key.as_str()) {
            Some(doc) => GetOutcome::Found {
                record: doc.record.clone(),
                cas: Cas::new(doc.cas.to_string()),
            },
            None => GetOutcome::NotFound,
        })
    }

    async fn execute_view(&self, query: &ViewQuery) -> Result<Vec<ViewRow>> {
        self.round_trip().await;
        let exists = self
            .views
            .get(&query.design_doc)
            .map(|v| v.view == query.view)
            .unwrap_or(false);
        if !exists {
            return Err(BenchError::Status {
                operation: "view query".into(),
                status: 404,
                body: format!("missing view {}/{}", query.design_doc, query.view),
            });
        }
        let mut rows: Vec<ViewRow> = self
            .docs
            .iter()
            .filter(|e| e.record.email == query.key)
            .map(|e| ViewRow {
                id: Some(e.key().clone()),
                key: serde_json::Value::String(e.record.email.clone()),
                value: serde_json::json!([e.key(), e.record.name]),
            })
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    /// Supports the single-parameter `email = $1` lookup the benchmark issues.
    async fn execute_indexed_query(&self, query: &IndexedQuery) -> Result<Vec<serde_json::Value>> {
        self.round_trip().await;
        let email = query
            .args
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| BenchError::Query {
                operation: "indexed query".into(),
                code: 5000,
                message: "expected one string argument".into(),
            })?;
        if !self.has_primary_index() && !self.index_covers(email) {
            return Err(BenchError::Query {
                operation: "indexed query".into(),
                code: NO_INDEX_AVAILABLE,
                message: format!("No index available on keyspace {}", self.bucket),
            });
        }
        let mut results: Vec<(String, serde_json::Value)> = self
            .docs
            .iter()
            .filter(|e| e.record.email == email)
            .map(|e| {
                let mut row = serde_json::Map::new();
                row.insert(
                    self.bucket.clone(),
                    serde_json::json!({ "email": e.record.email, "name": e.record.name }),
                );
                (e.key().clone(), serde_json::Value::Object(row))
            })
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results.into_iter().map(|(_, v)| v).collect())
    }

    async fn create_view(&self, definition: &ViewDefinition) -> Result<()> {
        self.round_trip().await;
        self.views
            .insert(definition.design_doc.clone(), definition.clone());
        Ok(())
    }

    async fn create_index(&self, definition: &IndexDefinition) -> Result<()> {
        self.round_trip().await;
        match self.indexes.entry(definition.name.clone()) {
            Entry::Occupied(_) => Err(BenchError::Query {
                operation: "create index".into(),
                code: INDEX_EXISTS,
                message: format!("The index {} already exists", definition.name),
            }),
            Entry::Vacant(slot) => {
                debug!(index = %definition.name, node = %definition.node, "memory index created");
                slot.insert(definition.clone());
                Ok(())
            }
        }
    }

    async fn drop_index(&self, name: &str) -> Result<DropOutcome> {
        self.round_trip().await;
        Ok(match self.indexes.remove(name) {
            Some(_) => DropOutcome::Dropped,
            None => DropOutcome::NotFound,
        })
    }

    async fn create_primary_index(&self) -> Result<()> {
        self.round_trip().await;
        self.primary_index.store(true, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(email: &str, name: &str) -> DocumentRecord {
        DocumentRecord {
            email: email.into(),
            name: name.into(),
        }
    }

    #[tokio::test]
    async fn test_insert_conflicts_on_existing_key() {
        let store = MemoryStore::new("benchmark");
        let key = DocumentKey::new(1).unwrap();
        let first = store.insert(&key, &record("a@x", "n1")).await.unwrap();
        assert!(matches!(first, WriteOutcome::Stored(_)));
        let second = store.insert(&key, &record("a@x", "n2")).await.unwrap();
        assert_eq!(second, WriteOutcome::Conflict);
        assert_eq!(store.record(key.as_str()).unwrap().name, "n1");
    }

    #[tokio::test]
    async fn test_replace_requires_current_cas() {
        let store = MemoryStore::new("benchmark");
        let key = DocumentKey::new(2).unwrap();
        let WriteOutcome::Stored(cas) = store.insert(&key, &record("b@x", "old")).await.unwrap()
        else {
            panic!("insert should store");
        };

        let stale = Cas::new("999999");
        assert_eq!(
            store.replace(&key, &record("b@x", "new"), &stale).await.unwrap(),
            WriteOutcome::Conflict
        );

        let out = store.replace(&key, &record("b@x", "new"), &cas).await.unwrap();
        assert!(matches!(out, WriteOutcome::Stored(ref c) if c != &cas));
        assert_eq!(store.record(key.as_str()).unwrap().name, "new");
    }

    #[tokio::test]
    async fn test_replace_missing_key() {
        let store = MemoryStore::new("benchmark");
        let out = store
            .replace(&DocumentKey::new(3).unwrap(), &record("c@x", "n"), &Cas::new("1"))
            .await
            .unwrap();
        assert_eq!(out, WriteOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_view_query_requires_view() {
        let store = MemoryStore::new("benchmark");
        let query = ViewQuery {
            design_doc: "viewByEmail".into(),
            view: "byEmail".into(),
            key: "a@x".into(),
        };
        assert!(store.execute_view(&query).await.is_err());

        store
            .create_view(&ViewDefinition {
                design_doc: "viewByEmail".into(),
                view: "byEmail".into(),
                map: String::new(),
            })
            .await
            .unwrap();
        store
            .insert(&DocumentKey::new(0).unwrap(), &record("a@x", "alice"))
            .await
            .unwrap();
        let rows = store.execute_view(&query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value[1], "alice");
    }

    #[tokio::test]
    async fn test_indexed_query_needs_covering_index() {
        let store = MemoryStore::new("benchmark");
        store
            .insert(&DocumentKey::new(0).unwrap(), &record("m@x", "mallory"))
            .await
            .unwrap();
        let query = IndexedQuery {
            statement: super::super::email_lookup_statement("benchmark"),
            args: vec![serde_json::json!("m@x")],
        };
        let err = store.execute_indexed_query(&query).await.unwrap_err();
        assert!(matches!(err, BenchError::Query { code, .. } if code == NO_INDEX_AVAILABLE));

        store
            .create_index(&IndexDefinition {
                name: "idx".into(),
                lower_email: "a@x".into(),
                upper_email: "z@x".into(),
                node: "n:8091".into(),
            })
            .await
            .unwrap();
        let rows = store.execute_indexed_query(&query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["benchmark"]["name"], "mallory");
    }

    #[tokio::test]
    async fn test_create_index_twice_fails_and_drop_reports_missing() {
        let store = MemoryStore::new("benchmark");
        let def = IndexDefinition {
            name: "idx".into(),
            lower_email: "a".into(),
            upper_email: "b".into(),
            node: "n:8091".into(),
        };
        store.create_index(&def).await.unwrap();
        assert!(store.create_index(&def).await.is_err());
        assert_eq!(store.drop_index("idx").await.unwrap(), DropOutcome::Dropped);
        assert_eq!(store.drop_index("idx").await.unwrap(), DropOutcome::NotFound);
    }
}
