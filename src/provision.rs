//! View and partitioned-index provisioning.
//!
//! The identifier keyspace `[0, max_docs)` is split into one contiguous range
//! per node. Because emails sort like identifiers, each range maps to a
//! half-open email range, and one index per range is pinned to its node.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec::{Codec, DocumentId};
use crate::config::{Config, PartitionPolicy, QueryConfig};
use crate::error::{BenchError, Result};
use crate::storage::DocumentStore;
use crate::timing::Timer;
use crate::types::{DropOutcome, IndexDefinition, IndexPartition, NodeAddress, ViewDefinition};

/// Map function of the email view: `email -> [id, name]`.
pub const EMAIL_VIEW_MAP: &str = "function (doc, meta) {emit(doc.email, [meta.id, doc.name]);}";

/// Split `[0, max_docs)` into one partition per node.
///
/// `step = max_docs / nodes.len()`; partition `i` covers `[i*step, (i+1)*step)`.
/// Under [`PartitionPolicy::CoverAll`] the last partition ends at `max_docs`.
/// Returns an empty list when there are no nodes.
pub fn partition_keyspace(
    max_docs: DocumentId,
    nodes: &[NodeAddress],
    policy: PartitionPolicy,
) -> Vec<IndexPartition> {
    if nodes.is_empty() {
        return Vec::new();
    }
    let count = nodes.len() as DocumentId;
    let step = max_docs / count;
    nodes
        .iter()
        .enumerate()
        .map(|(node_index, node)| {
            let i = node_index as DocumentId;
            let lower_bound = i * step;
            let last = i + 1 == count;
            let upper_bound = match policy {
                PartitionPolicy::CoverAll if last => max_docs,
                _ => (i + 1) * step,
            };
            IndexPartition {
                node_index,
                lower_bound,
                upper_bound,
                pinned_node: node.clone(),
            }
        })
        .collect()
}

pub fn index_name(prefix: &str, node_index: usize) -> String {
    format!("{prefix}_{node_index}")
}

pub fn email_view(query: &QueryConfig) -> ViewDefinition {
    ViewDefinition {
        design_doc: query.design_doc.clone(),
        view: query.view_name.clone(),
        map: EMAIL_VIEW_MAP.to_string(),
    }
}

/// Index over the partition's email range, placed on `node:admin_port`.
///
/// Fails when a bound has no 20-digit key.
pub fn index_definition(
    codec: &Codec,
    partition: &IndexPartition,
    prefix: &str,
    admin_port: u16,
) -> Result<IndexDefinition> {
    Ok(IndexDefinition {
        name: index_name(prefix, partition.node_index),
        lower_email: codec.email(partition.lower_bound)?,
        upper_email: codec.email(partition.upper_bound)?,
        node: format!("{}:{}", partition.pinned_node, admin_port),
    })
}

/// What provisioning created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub view: ViewDefinition,
    pub indexes: Vec<IndexDefinition>,
}

pub struct Provisioner {
    store: Arc<dyn DocumentStore>,
    nodes: Vec<NodeAddress>,
    codec: Codec,
    timer: Timer,
    max_docs: DocumentId,
    admin_port: u16,
    query: QueryConfig,
}

impl Provisioner {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        nodes: Vec<NodeAddress>,
        config: &Config,
        timer: Timer,
    ) -> Self {
        Self {
            store,
            nodes,
            codec: Codec::from_config(&config.bench),
            timer,
            max_docs: config.bench.max_docs,
            admin_port: config.cluster.admin_port,
            query: config.query.clone(),
        }
    }

    pub fn partitions(&self) -> Vec<IndexPartition> {
        partition_keyspace(self.max_docs, &self.nodes, self.query.partition_policy)
    }

    /// Create the view, then drop and recreate one index per node.
    ///
    /// A failed drop is logged and ignored; any failed create aborts.
    pub async fn run(&self) -> Result<ProvisionReport> {
        if self.nodes.is_empty() {
            return Err(BenchError::Provision("no nodes to place indexes on".into()));
        }

        let view = email_view(&self.query);
        self.timer
            .measure(
                format!("createView:{}", view.design_doc),
                self.store.create_view(&view),
            )
            .await
            .map_err(|e| {
                BenchError::Provision(format!("create view {}: {e}", view.design_doc))
            })?;
        info!(design_doc = %view.design_doc, view = %view.view, "view created");

        if self.query.create_primary_index {
            self.timer
                .measure("createPrimaryIndex", self.store.create_primary_index())
                .await
                .map_err(|e| BenchError::Provision(format!("create primary index: {e}")))?;
            info!(bucket = %self.store.bucket(), "primary index ready");
        }

        let partitions = self.partitions();
        if self.query.partition_policy == PartitionPolicy::FloorOnly {
            if let Some(last) = partitions.last() {
                if last.upper_bound < self.max_docs {
                    warn!(
                        uncovered_from = %last.upper_bound,
                        max_docs = %self.max_docs,
                        "trailing identifiers are not covered by any index"
                    );
                }
            }
        }

        let mut indexes = Vec::with_capacity(partitions.len());
        for partition in &partitions {
            let definition =
                index_definition(&self.codec, partition, &self.query.index_prefix, self.admin_port)
                    .map_err(|e| BenchError::Provision(format!("index bounds: {e}")))?;

            let dropped = self
                .timer
                .measure(
                    format!("dropIndex:{}", definition.name),
                    self.store.drop_index(&definition.name),
                )
                .await;
            match dropped {
                Ok(DropOutcome::Dropped) => debug!(index = %definition.name, "dropped existing index"),
                Ok(DropOutcome::NotFound) => {}
                Err(e) => debug!(index = %definition.name, error = %e, "drop index failed, continuing"),
            }

            self.timer
                .measure(
                    format!("createIndex:{}", definition.name),
                    self.store.create_index(&definition),
                )
                .await
                .map_err(|e| BenchError::Provision(format!("create index {}: {e}", definition.name)))?;
            info!(
                index = %definition.name,
                node = %definition.node,
                lower = %partition.lower_bound,
                upper = %partition.upper_bound,
                "index created"
            );
            indexes.push(definition);
        }

        Ok(ProvisionReport { view, indexes })
    }
}
