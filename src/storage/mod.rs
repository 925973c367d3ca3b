//! Typed client boundary to the document store.
//!
//! [`DocumentStore`] is the only way the loader, provisioner and query pool
//! talk to the cluster. Implementations must be safe to share across tasks
//! without extra locking.

pub mod http;
pub mod memory;

pub use http::ClusterHandle;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::codec::{DocumentKey, DocumentRecord};
use crate::error::{BenchError, Result};
use crate::types::{
    Cas, DropOutcome, GetOutcome, IndexDefinition, IndexedQuery, ViewDefinition, ViewQuery,
    ViewRow, WriteOutcome,
};

/// Error code the query service reports when an index does not exist.
pub const INDEX_NOT_FOUND: u32 = 12016;
/// Error code the query service reports when an index name is taken.
pub const INDEX_EXISTS: u32 = 4300;
/// Error code the query service reports when no index can serve a statement.
pub const NO_INDEX_AVAILABLE: u32 = 4000;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Keyspace (bucket) all operations target.
    fn bucket(&self) -> &str;

    /// Create `key` only if it does not exist yet.
    async fn insert(&self, key: &DocumentKey, record: &DocumentRecord) -> Result<WriteOutcome>;

    /// Overwrite `key` if its current CAS still equals `cas`.
    async fn replace(
        &self,
        key: &DocumentKey,
        record: &DocumentRecord,
        cas: &Cas,
    ) -> Result<WriteOutcome>;

    async fn get(&self, key: &DocumentKey) -> Result<GetOutcome>;

    async fn execute_view(&self, query: &ViewQuery) -> Result<Vec<ViewRow>>;

    async fn execute_indexed_query(&self, query: &IndexedQuery) -> Result<Vec<serde_json::Value>>;

    /// Create or overwrite a design document.
    async fn create_view(&self, definition: &ViewDefinition) -> Result<()>;

    async fn create_index(&self, definition: &IndexDefinition) -> Result<()>;

    async fn drop_index(&self, name: &str) -> Result<DropOutcome>;

    /// Create the keyspace's primary index. An existing one is not an error.
    async fn create_primary_index(&self) -> Result<()>;
}

/// Whether `err` is the query service saying an index does not exist.
pub fn is_index_not_found(err: &BenchError) -> bool {
    matches!(err, BenchError::Query { code, .. } if *code == INDEX_NOT_FOUND)
}

/// Whether `err` is the query service saying an index already exists.
pub fn is_index_exists(err: &BenchError) -> bool {
    matches!(err, BenchError::Query { code, .. } if *code == INDEX_EXISTS)
}

/// `SELECT` statement used for indexed email lookups.
pub fn email_lookup_statement(bucket: &str) -> String {
    format!("SELECT * FROM `{bucket}` WHERE email = $1")
}

/// `CREATE INDEX` statement for a node-pinned email range.
pub fn create_index_statement(bucket: &str, definition: &IndexDefinition) -> String {
    format!(
        "CREATE INDEX `{name}` ON `{bucket}`(email) WHERE email >= \"{lo}\" AND email < \"{hi}\" USING GSI WITH {{\"nodes\": [\"{node}\"]}}",
        name = definition.name,
        lo = definition.lower_email,
        hi = definition.upper_email,
        node = definition.node,
    )
}

pub fn drop_index_statement(bucket: &str, name: &str) -> String {
    format!("DROP INDEX `{bucket}`.`{name}`")
}

pub fn create_primary_index_statement(bucket: &str) -> String {
    format!("CREATE PRIMARY INDEX ON `{bucket}`")
}
