//! Command-line surface.

use clap::Parser;

use crate::codec::DocumentId;
use crate::config::{split_nodes, Config, StoreBackend};

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "docbench",
    about = "Load, index and query-benchmark a document cluster"
)]
pub struct Args {
    /// Load synthetic documents into the keyspace
    #[arg(long)]
    pub load: bool,

    /// Create the email view and the per-node partitioned indexes
    #[arg(long)]
    pub provision: bool,

    /// Run random lookups through the email view until interrupted
    #[arg(long = "view-query-test")]
    pub view_query_test: bool,

    /// Run random lookups through the partitioned indexes until interrupted
    #[arg(long = "indexed-query-test")]
    pub indexed_query_test: bool,

    /// Number of documents [default: 1000]
    #[arg(short = 'i', long = "docs")]
    pub max_docs: Option<DocumentId>,

    /// Concurrent workers [default: 10]
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// Keyspace (bucket) name [default: benchmark]
    #[arg(short = 'b', long)]
    pub bucket: Option<String>,

    /// Log at debug level, including first rows of lookups
    #[arg(long)]
    pub debug: bool,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<String>,

    /// Consul agent address used for node discovery
    #[arg(long)]
    pub consul: Option<String>,

    /// Comma-separated node list; skips Consul
    #[arg(long)]
    pub nodes: Option<String>,

    /// Store backend: "http" or "memory"
    #[arg(long)]
    pub backend: Option<StoreBackend>,

    /// Per-lookup timeout in milliseconds
    #[arg(long = "op-timeout-ms")]
    pub op_timeout_ms: Option<u64>,
}

/// The single phase a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Load,
    Provision,
    ViewQueryTest,
    IndexedQueryTest,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Load => "load",
            Mode::Provision => "provision",
            Mode::ViewQueryTest => "view-query-test",
            Mode::IndexedQueryTest => "indexed-query-test",
        }
    }

    /// Query tests run until a signal; the other modes exit when done.
    pub fn runs_until_signal(&self) -> bool {
        matches!(self, Mode::ViewQueryTest | Mode::IndexedQueryTest)
    }
}

impl Args {
    /// Pick the mode. When several flags are set, the first of
    /// load, provision, view-query-test, indexed-query-test wins.
    pub fn mode(&self) -> Option<Mode> {
        if self.load {
            Some(Mode::Load)
        } else if self.provision {
            Some(Mode::Provision)
        } else if self.view_query_test {
            Some(Mode::ViewQueryTest)
        } else if self.indexed_query_test {
            Some(Mode::IndexedQueryTest)
        } else {
            None
        }
    }

    /// Overlay explicitly given flags onto `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(v) = self.max_docs {
            config.bench.max_docs = v;
        }
        if let Some(v) = self.concurrency {
            config.bench.concurrency = v;
        }
        if let Some(v) = &self.bucket {
            config.bench.bucket = v.clone();
        }
        if self.debug {
            config.bench.debug = true;
        }
        if let Some(v) = &self.username {
            config.cluster.username = v.clone();
        }
        if let Some(v) = &self.password {
            config.cluster.password = v.clone();
        }
        if let Some(v) = &self.consul {
            config.cluster.consul_address = v.clone();
        }
        if let Some(v) = &self.nodes {
            config.cluster.nodes = split_nodes(v);
        }
        if let Some(v) = self.backend {
            config.cluster.backend = v;
        }
        if let Some(v) = self.op_timeout_ms {
            config.query.op_timeout_ms = v;
        }
    }
}
