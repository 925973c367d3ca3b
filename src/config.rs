use crate::codec::{DocumentId, KEY_SPACE};
use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bench: BenchConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default = "default_max_docs", with = "document_count")]
    pub max_docs: DocumentId,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_email_domain")]
    pub email_domain: String,
    #[serde(default = "default_name_length")]
    pub name_length: usize,
    #[serde(default)]
    pub debug: bool,
}

/// Which store implementation the dispatcher opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Http,
    Memory,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Http => write!(f, "http"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(StoreBackend::Http),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_consul_address")]
    pub consul_address: String,
    #[serde(default = "default_service")]
    pub service: String,
    /// Static node list; when non-empty Consul is not consulted.
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
    #[serde(default = "default_doc_port")]
    pub doc_port: u16,
    #[serde(default = "default_view_port")]
    pub view_port: u16,
    #[serde(default = "default_query_port")]
    pub query_port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

// Keep the password out of logs.
impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("backend", &self.backend)
            .field("consul_address", &self.consul_address)
            .field("service", &self.service)
            .field("nodes", &self.nodes)
            .field("scheme", &self.scheme)
            .field("admin_port", &self.admin_port)
            .field("doc_port", &self.doc_port)
            .field("view_port", &self.view_port)
            .field("query_port", &self.query_port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

/// How the identifier keyspace is split when it does not divide evenly
/// across the nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionPolicy {
    /// The last partition absorbs the remainder so `[0, max_docs)` is fully covered.
    #[default]
    CoverAll,
    /// Every partition is exactly `step` wide; trailing identifiers are left out.
    FloorOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
    #[serde(default = "default_design_doc")]
    pub design_doc: String,
    #[serde(default = "default_view_name")]
    pub view_name: String,
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,
    #[serde(default)]
    pub partition_policy: PartitionPolicy,
    #[serde(default)]
    pub create_primary_index: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// TOML integers stop at `i64::MAX`, so larger document counts are written as strings.
mod document_count {
    use crate::codec::DocumentId;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &DocumentId, s: S) -> Result<S::Ok, S::Error> {
        match i64::try_from(*value) {
            Ok(n) => s.serialize_i64(n),
            Err(_) => s.serialize_str(&value.to_string()),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DocumentId, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Int(n) => Ok(DocumentId::from(n)),
            Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
        }
    }
}

// Default value functions
fn default_max_docs() -> DocumentId {
    std::env::var("DOCBENCH_MAX_DOCS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1000)
}
fn default_concurrency() -> usize {
    std::env::var("DOCBENCH_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10)
}
fn default_bucket() -> String {
    std::env::var("DOCBENCH_BUCKET").unwrap_or_else(|_| "benchmark".to_string())
}
fn default_email_domain() -> String {
    "joyent.com".to_string()
}
fn default_name_length() -> usize {
    20
}
fn default_consul_address() -> String {
    std::env::var("DOCBENCH_CONSUL_ADDRESS").unwrap_or_else(|_| "consul:8500".to_string())
}
fn default_service() -> String {
    std::env::var("DOCBENCH_SERVICE").unwrap_or_else(|_| "couchbase".to_string())
}
fn default_scheme() -> String {
    "http".to_string()
}
fn default_admin_port() -> u16 {
    8091
}
fn default_doc_port() -> u16 {
    8091
}
fn default_view_port() -> u16 {
    8092
}
fn default_query_port() -> u16 {
    8093
}
fn default_username() -> String {
    std::env::var("DOCBENCH_USERNAME").unwrap_or_else(|_| "Administrator".to_string())
}
fn default_password() -> String {
    std::env::var("DOCBENCH_PASSWORD").unwrap_or_else(|_| "password".to_string())
}
fn default_request_timeout_ms() -> u64 {
    std::env::var("DOCBENCH_REQUEST_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30_000)
}
fn default_op_timeout_ms() -> u64 {
    std::env::var("DOCBENCH_OP_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10_000)
}
fn default_design_doc() -> String {
    "viewByEmail".to_string()
}
fn default_view_name() -> String {
    "byEmail".to_string()
}
fn default_index_prefix() -> String {
    "idx_email".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    std::env::var("DOCBENCH_LOG_FORMAT").unwrap_or_else(|_| "text".to_string())
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            max_docs: default_max_docs(),
            concurrency: default_concurrency(),
            bucket: default_bucket(),
            email_domain: default_email_domain(),
            name_length: default_name_length(),
            debug: false,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            consul_address: default_consul_address(),
            service: default_service(),
            nodes: Vec::new(),
            scheme: default_scheme(),
            admin_port: default_admin_port(),
            doc_port: default_doc_port(),
            view_port: default_view_port(),
            query_port: default_query_port(),
            username: default_username(),
            password: default_password(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            op_timeout_ms: default_op_timeout_ms(),
            design_doc: default_design_doc(),
            view_name: default_view_name(),
            index_prefix: default_index_prefix(),
            partition_policy: PartitionPolicy::default(),
            create_primary_index: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ClusterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl QueryConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl Config {
    /// Load config from a TOML file, falling back to defaults.
    /// After loading, env var overrides are applied so that:
    /// env var > TOML file > defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p).map_err(|e| {
                    BenchError::Config(format!("failed to read config file {p}: {e}"))
                })?;
                toml::from_str(&content)
                    .map_err(|e| BenchError::Config(format!("failed to parse config: {e}")))?
            }
            None => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.bench.max_docs >= KEY_SPACE {
            return Err(BenchError::Validation(format!(
                "max_docs must be below {KEY_SPACE} so every key fits in 20 digits"
            )));
        }
        if self.bench.concurrency == 0 {
            return Err(BenchError::Validation(
                "concurrency must be greater than 0".into(),
            ));
        }
        if self.bench.name_length == 0 {
            return Err(BenchError::Validation(
                "name_length must be greater than 0".into(),
            ));
        }
        if self.bench.bucket.is_empty() {
            return Err(BenchError::Validation("bucket must not be empty".into()));
        }
        if self.query.op_timeout_ms == 0 || self.cluster.request_timeout_ms == 0 {
            return Err(BenchError::Validation(
                "timeouts must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides on top of file/default values.
    fn apply_env_overrides(&mut self) {
        // Bench
        if let Some(v) = std::env::var("DOCBENCH_MAX_DOCS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.bench.max_docs = v;
        }
        if let Some(v) = std::env::var("DOCBENCH_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.bench.concurrency = v;
        }
        if let Ok(v) = std::env::var("DOCBENCH_BUCKET") {
            self.bench.bucket = v;
        }

        // Cluster
        if let Some(v) = std::env::var("DOCBENCH_BACKEND")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.cluster.backend = v;
        }
        if let Ok(v) = std::env::var("DOCBENCH_CONSUL_ADDRESS") {
            self.cluster.consul_address = v;
        }
        if let Ok(v) = std::env::var("DOCBENCH_SERVICE") {
            self.cluster.service = v;
        }
        if let Some(v) = std::env::var("DOCBENCH_NODES")
            .ok()
            .filter(|s| !s.is_empty())
        {
            self.cluster.nodes = split_nodes(&v);
        }
        if let Ok(v) = std::env::var("DOCBENCH_USERNAME") {
            self.cluster.username = v;
        }
        if let Ok(v) = std::env::var("DOCBENCH_PASSWORD") {
            self.cluster.password = v;
        }
        if let Some(v) = std::env::var("DOCBENCH_REQUEST_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.cluster.request_timeout_ms = v;
        }

        // Query
        if let Some(v) = std::env::var("DOCBENCH_OP_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.query.op_timeout_ms = v;
        }

        // Logging
        if let Ok(v) = std::env::var("DOCBENCH_LOG_FORMAT") {
            self.logging.format = v;
        }
    }
}

/// Split a comma-separated node list, dropping blanks.
pub fn split_nodes(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
