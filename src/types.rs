use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{DocumentId, DocumentRecord};

/// Address of one cluster member, as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque compare-and-swap token returned by the store on every write and read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cas(String);

impl Cas {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored(Cas),
    /// Insert: the key already exists. Replace: the CAS no longer matches.
    Conflict,
    /// Replace only: the key does not exist.
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOutcome {
    Found { record: DocumentRecord, cas: Cas },
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    Dropped,
    NotFound,
}

/// A contiguous, half-open identifier range assigned to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPartition {
    pub node_index: usize,
    pub lower_bound: DocumentId,
    pub upper_bound: DocumentId,
    pub pinned_node: NodeAddress,
}

impl IndexPartition {
    pub fn contains(&self, id: DocumentId) -> bool {
        self.lower_bound <= id && id < self.upper_bound
    }

    pub fn len(&self) -> DocumentId {
        self.upper_bound.saturating_sub(self.lower_bound)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Design document holding the email lookup view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDefinition {
    pub design_doc: String,
    pub view: String,
    pub map: String,
}

impl ViewDefinition {
    /// Request body for a design document PUT.
    pub fn to_design_doc(&self) -> serde_json::Value {
        let mut views = serde_json::Map::new();
        views.insert(self.view.clone(), serde_json::json!({ "map": self.map }));
        serde_json::json!({ "views": views })
    }
}

/// A node-pinned secondary index over a half-open email range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub lower_email: String,
    pub upper_email: String,
    /// `host:port` the index is placed on.
    pub node: String,
}

/// Point lookup against the email view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewQuery {
    pub design_doc: String,
    pub view: String,
    pub key: String,
}

/// One row of a view response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRow {
    #[serde(default)]
    pub id: Option<String>,
    pub key: serde_json::Value,
    pub value: serde_json::Value,
}

/// Parameterized N1QL statement.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedQuery {
    pub statement: String,
    pub args: Vec<serde_json::Value>,
}
