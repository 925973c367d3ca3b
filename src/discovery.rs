//! Cluster node discovery.
//!
//! Nodes come either from a static list in the configuration or from the
//! Consul catalog (`GET /v1/catalog/service/<name>`). The result is fetched
//! once per run and never refreshed.

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::error::{BenchError, Result};
use crate::types::NodeAddress;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogEntry {
    #[serde(default)]
    address: String,
    #[serde(default)]
    service_address: String,
}

impl CatalogEntry {
    /// Consul leaves `ServiceAddress` empty when the service uses the node address.
    fn node_address(&self) -> Option<&str> {
        if !self.service_address.is_empty() {
            Some(&self.service_address)
        } else if !self.address.is_empty() {
            Some(&self.address)
        } else {
            None
        }
    }
}

/// Resolve the ordered node list for this run.
pub async fn discover_nodes(config: &ClusterConfig) -> Result<Vec<NodeAddress>> {
    let nodes = if config.nodes.is_empty() {
        consul_catalog(&config.consul_address, &config.service, config).await?
    } else {
        debug!(count = config.nodes.len(), "using static node list");
        dedup(config.nodes.iter().map(String::as_str))
    };
    if nodes.is_empty() {
        return Err(BenchError::NoNodes {
            service: config.service.clone(),
        });
    }
    info!(
        service = %config.service,
        nodes = ?nodes.iter().map(NodeAddress::as_str).collect::<Vec<_>>(),
        "discovered cluster nodes"
    );
    Ok(nodes)
}

/// Query the Consul catalog for every instance of `service`.
pub async fn consul_catalog(
    consul_address: &str,
    service: &str,
    config: &ClusterConfig,
) -> Result<Vec<NodeAddress>> {
    let base = if consul_address.contains("://") {
        consul_address.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", consul_address.trim_end_matches('/'))
    };
    let url = format!("{base}/v1/catalog/service/{service}");
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| BenchError::Discovery(e.to_string()))?;

    let resp = client
        .get(&url)
        .send()
        .await
        .map_err(|e| BenchError::Discovery(format!("{url}: {e}")))?;
    if !resp.status().is_success() {
        return Err(BenchError::Discovery(format!(
            "{url} returned {}",
            resp.status()
        )));
    }
    let entries: Vec<CatalogEntry> = resp
        .json()
        .await
        .map_err(|e| BenchError::Discovery(format!("malformed catalog response: {e}")))?;
    Ok(dedup(entries.iter().filter_map(CatalogEntry::node_address)))
}

/// Keep the first occurrence of each address, preserving order.
fn dedup<'a>(addrs: impl Iterator<Item = &'a str>) -> Vec<NodeAddress> {
    let mut out: Vec<NodeAddress> = Vec::new();
    for addr in addrs {
        let node = NodeAddress::new(addr.trim());
        if !node.as_str().is_empty() && !out.contains(&node) {
            out.push(node);
        }
    }
    out
}
