//! Random point-lookup load against the email view or the partitioned indexes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::codec::{Codec, DocumentId, KEY_SPACE};
use crate::config::{Config, QueryConfig};
use crate::error::{BenchError, Result};
use crate::storage::{email_lookup_statement, DocumentStore};
use crate::timing::Timer;
use crate::types::{IndexedQuery, ViewQuery};

/// One way of finding a document by email.
#[async_trait]
pub trait QueryStrategy: Send + Sync {
    /// Short name used in metrics and logs.
    fn name(&self) -> &'static str;

    /// Timing label for a lookup of `email`.
    fn label(&self, email: &str) -> String;

    /// Issue one lookup and return the first matching row, if any.
    async fn lookup(&self, store: &dyn DocumentStore, email: &str) -> Result<Option<Value>>;
}

/// Lookup through the `email -> [id, name]` view.
#[derive(Debug, Clone)]
pub struct ViewLookup {
    pub design_doc: String,
    pub view: String,
}

impl ViewLookup {
    pub fn from_config(query: &QueryConfig) -> Self {
        Self {
            design_doc: query.design_doc.clone(),
            view: query.view_name.clone(),
        }
    }
}

#[async_trait]
impl QueryStrategy for ViewLookup {
    fn name(&self) -> &'static str {
        "view"
    }

    fn label(&self, email: &str) -> String {
        format!("viewQuery:{email}")
    }

    async fn lookup(&self, store: &dyn DocumentStore, email: &str) -> Result<Option<Value>> {
        let query = ViewQuery {
            design_doc: self.design_doc.clone(),
            view: self.view.clone(),
            key: email.to_string(),
        };
        let rows = store.execute_view(&query).await?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(serde_json::to_value(row)?)),
            None => Ok(None),
        }
    }
}

/// Parameterized `SELECT` served by the partitioned secondary indexes.
#[derive(Debug, Clone)]
pub struct IndexedLookup {
    statement: String,
}

impl IndexedLookup {
    pub fn new(bucket: &str) -> Self {
        Self {
            statement: email_lookup_statement(bucket),
        }
    }

    pub fn query(&self, email: &str) -> IndexedQuery {
        IndexedQuery {
            statement: self.statement.clone(),
            args: vec![Value::String(email.to_string())],
        }
    }
}

#[async_trait]
impl QueryStrategy for IndexedLookup {
    fn name(&self) -> &'static str {
        "indexed"
    }

    fn label(&self, email: &str) -> String {
        format!("n1qlquery:{email}")
    }

    async fn lookup(&self, store: &dyn DocumentStore, email: &str) -> Result<Option<Value>> {
        let results = store.execute_indexed_query(&self.query(email)).await?;
        Ok(results.into_iter().next())
    }
}

/// Counts accumulated by a query run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryReport {
    pub lookups: u64,
    pub hits: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
struct QueryCounters {
    lookups: AtomicU64,
    hits: AtomicU64,
    errors: AtomicU64,
}

/// Runs `concurrency` lookup loops until told to stop.
pub struct QueryWorkerPool {
    store: Arc<dyn DocumentStore>,
    strategy: Arc<dyn QueryStrategy>,
    codec: Codec,
    timer: Timer,
    max_docs: DocumentId,
    concurrency: usize,
    op_timeout: Duration,
}

impl QueryWorkerPool {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        strategy: Arc<dyn QueryStrategy>,
        config: &Config,
        timer: Timer,
    ) -> Self {
        Self {
            store,
            strategy,
            codec: Codec::from_config(&config.bench),
            timer,
            max_docs: config.bench.max_docs,
            concurrency: config.bench.concurrency,
            op_timeout: config.query.op_timeout(),
        }
    }

    /// Loop until `shutdown` flips to `true` or its sender goes away.
    ///
    /// Shutdown is checked between lookups; a lookup already in flight runs to
    /// completion or to the per-operation timeout, whichever comes first.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<QueryReport> {
        if self.max_docs == 0 {
            return Err(BenchError::Validation(
                "query tests need at least one document (max_docs > 0)".into(),
            ));
        }
        if self.max_docs > KEY_SPACE {
            return Err(BenchError::Validation(format!(
                "max_docs must not exceed {KEY_SPACE}"
            )));
        }
        if self.concurrency == 0 {
            return Err(BenchError::Validation(
                "concurrency must be greater than 0".into(),
            ));
        }
        info!(
            strategy = self.strategy.name(),
            concurrency = self.concurrency,
            max_docs = %self.max_docs,
            "starting query workers"
        );

        let counters = Arc::new(QueryCounters::default());
        let mut workers = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency {
            let worker = QueryWorker {
                id: worker_id,
                store: self.store.clone(),
                strategy: self.strategy.clone(),
                codec: self.codec.clone(),
                timer: self.timer.clone(),
                max_docs: self.max_docs,
                op_timeout: self.op_timeout,
                counters: counters.clone(),
            };
            let shutdown = shutdown.clone();
            workers.push(tokio::spawn(worker.run(shutdown)));
        }

        for joined in futures::future::join_all(workers).await {
            if let Err(e) = joined {
                if e.is_panic() {
                    std::panic::resume_unwind(e.into_panic());
                }
            }
        }

        let report = QueryReport {
            lookups: counters.lookups.load(Ordering::Relaxed),
            hits: counters.hits.load(Ordering::Relaxed),
            errors: counters.errors.load(Ordering::Relaxed),
        };
        info!(
            strategy = self.strategy.name(),
            lookups = report.lookups,
            hits = report.hits,
            errors = report.errors,
            "query workers stopped"
        );
        Ok(report)
    }
}

struct QueryWorker {
    id: usize,
    store: Arc<dyn DocumentStore>,
    strategy: Arc<dyn QueryStrategy>,
    codec: Codec,
    timer: Timer,
    max_docs: DocumentId,
    op_timeout: Duration,
    counters: Arc<QueryCounters>,
}

impl QueryWorker {
    async fn run(self, shutdown: watch::Receiver<bool>) {
        let _active = crate::metrics::track(&crate::metrics::ACTIVE_WORKERS);
        let mut rng = StdRng::from_entropy();
        let strategy = self.strategy.name();
        loop {
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                debug!(worker = self.id, "query worker shutting down");
                break;
            }

            let email = match self.codec.random_email(&mut rng, self.max_docs) {
                Ok((_, email)) => email,
                Err(e) => {
                    warn!(worker = self.id, error = %e, "cannot draw an identifier");
                    break;
                }
            };
            let lookup = tokio::time::timeout(
                self.op_timeout,
                self.strategy.lookup(self.store.as_ref(), &email),
            );
            let outcome = match self.timer.measure(self.strategy.label(&email), lookup).await {
                Ok(result) => result,
                Err(_) => Err(BenchError::Timeout {
                    operation: format!("{strategy} lookup"),
                    millis: self.op_timeout.as_millis() as u64,
                }),
            };

            self.counters.lookups.fetch_add(1, Ordering::Relaxed);
            match outcome {
                Ok(Some(row)) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::LOOKUPS_TOTAL
                        .with_label_values(&[strategy, "hit"])
                        .inc();
                    debug!(worker = self.id, email = %email, row = %row, "lookup hit");
                }
                Ok(None) => {
                    crate::metrics::LOOKUPS_TOTAL
                        .with_label_values(&[strategy, "miss"])
                        .inc();
                    debug!(worker = self.id, email = %email, "lookup returned no rows");
                }
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::LOOKUPS_TOTAL
                        .with_label_values(&[strategy, "error"])
                        .inc();
                    debug!(worker = self.id, email = %email, error = %e, "lookup failed");
                }
            }
        }
    }
}
