//! Bulk loader.
//!
//! One generator task pushes identifiers `0..max_docs` into a bounded queue
//! and then closes it. Exactly `concurrency` workers pull from the queue until
//! it is closed *and* drained, so every identifier reaches exactly one worker.
//! Failures are per identifier: they are logged and counted, never fatal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::codec::{Codec, DocumentId, DocumentKey, DocumentRecord};
use crate::config::Config;
use crate::error::{BenchError, Result};
use crate::storage::DocumentStore;
use crate::timing::Timer;
use crate::types::{GetOutcome, WriteOutcome};

/// Counts of what happened to each identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub inserted: u64,
    pub replaced: u64,
    pub skipped: u64,
}

impl LoadReport {
    /// Identifiers that ended up stored.
    pub fn loaded(&self) -> u64 {
        self.inserted + self.replaced
    }

    pub fn total(&self) -> u64 {
        self.loaded() + self.skipped
    }
}

#[derive(Debug, Default)]
struct LoadCounters {
    inserted: AtomicU64,
    replaced: AtomicU64,
    skipped: AtomicU64,
}

impl LoadCounters {
    fn report(&self) -> LoadReport {
        LoadReport {
            inserted: self.inserted.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Loaded {
    Inserted,
    Replaced,
}

/// Fan-out loader over a [`DocumentStore`].
pub struct Loader {
    store: Arc<dyn DocumentStore>,
    codec: Codec,
    timer: Timer,
    max_docs: DocumentId,
    concurrency: usize,
}

impl Loader {
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config, timer: Timer) -> Self {
        Self {
            store,
            codec: Codec::from_config(&config.bench),
            timer,
            max_docs: config.bench.max_docs,
            concurrency: config.bench.concurrency,
        }
    }

    /// Load every identifier once and return the per-outcome counts.
    ///
    /// Records one `preload` timing for the whole phase.
    pub async fn run(&self) -> Result<LoadReport> {
        if self.concurrency == 0 {
            return Err(BenchError::Validation(
                "concurrency must be greater than 0".into(),
            ));
        }
        info!(
            max_docs = %self.max_docs,
            concurrency = self.concurrency,
            bucket = %self.store.bucket(),
            "loading documents"
        );
        let phase = self.timer.start("preload");

        let (tx, rx) = async_channel::bounded::<DocumentId>(self.concurrency);
        let max_docs = self.max_docs;
        let generator = tokio::spawn(async move {
            for id in 0..max_docs {
                if tx.send(id).await.is_err() {
                    // Every worker is gone; nothing left to feed.
                    break;
                }
            }
            // Dropping `tx` closes the queue; workers drain what is left.
        });

        let counters = Arc::new(LoadCounters::default());
        let mut workers = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency {
            let rx = rx.clone();
            let store = self.store.clone();
            let codec = self.codec.clone();
            let timer = self.timer.clone();
            let counters = counters.clone();
            workers.push(tokio::spawn(async move {
                let _active = crate::metrics::track(&crate::metrics::ACTIVE_WORKERS);
                let mut rng = StdRng::from_entropy();
                while let Ok(id) = rx.recv().await {
                    let loaded = match codec.record(id, &mut rng) {
                        Ok((key, record)) => {
                            load_document(store.as_ref(), &timer, &key, &record).await
                        }
                        Err(e) => Err(e),
                    };
                    match loaded {
                        Ok(Loaded::Inserted) => {
                            counters.inserted.fetch_add(1, Ordering::Relaxed);
                            crate::metrics::DOCUMENTS_TOTAL
                                .with_label_values(&["inserted"])
                                .inc();
                        }
                        Ok(Loaded::Replaced) => {
                            counters.replaced.fetch_add(1, Ordering::Relaxed);
                            crate::metrics::DOCUMENTS_TOTAL
                                .with_label_values(&["replaced"])
                                .inc();
                        }
                        Err(e) => {
                            counters.skipped.fetch_add(1, Ordering::Relaxed);
                            crate::metrics::DOCUMENTS_TOTAL
                                .with_label_values(&["skipped"])
                                .inc();
                            debug!(worker = worker_id, id = %id, error = %e, "skipping document");
                        }
                    }
                }
            }));
        }
        drop(rx);

        for joined in futures::future::join_all(workers).await {
            if let Err(e) = joined {
                if e.is_panic() {
                    std::panic::resume_unwind(e.into_panic());
                }
            }
        }
        if let Err(e) = generator.await {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
        }
        drop(phase);

        let report = counters.report();
        if report.skipped > 0 {
            warn!(
                skipped = report.skipped,
                loaded = report.loaded(),
                "some documents could not be loaded"
            );
        }
        info!(
            inserted = report.inserted,
            replaced = report.replaced,
            skipped = report.skipped,
            "load complete"
        );
        Ok(report)
    }
}

/// Insert `record`; on conflict, read the current CAS and replace with it.
async fn load_document(
    store: &dyn DocumentStore,
    timer: &Timer,
    key: &DocumentKey,
    record: &DocumentRecord,
) -> Result<Loaded> {
    let inserted = timer
        .measure(format!("insert:{key}"), store.insert(key, record))
        .await?;
    match inserted {
        WriteOutcome::Stored(_) => return Ok(Loaded::Inserted),
        WriteOutcome::Conflict | WriteOutcome::NotFound => {}
    }

    let cas = match store.get(key).await? {
        GetOutcome::Found { cas, .. } => cas,
        // Deleted between the insert and the read.
        GetOutcome::NotFound => {
            return Err(BenchError::Conflict {
                key: key.to_string(),
            })
        }
    };
    match store.replace(key, record, &cas).await? {
        WriteOutcome::Stored(_) => Ok(Loaded::Replaced),
        WriteOutcome::Conflict | WriteOutcome::NotFound => Err(BenchError::Conflict {
            key: key.to_string(),
        }),
    }
}
