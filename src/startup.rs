//! Process bootstrap and mode dispatch.
//!
//! Kept out of `main.rs` so every step can be driven from tests with the
//! memory backend and a hand-made shutdown channel.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, Mode};
use crate::config::{Config, StoreBackend};
use crate::discovery::discover_nodes;
use crate::error::{BenchError, Result};
use crate::load::{LoadReport, Loader};
use crate::provision::{ProvisionReport, Provisioner};
use crate::query::{IndexedLookup, QueryReport, QueryStrategy, QueryWorkerPool, ViewLookup};
use crate::storage::{ClusterHandle, DocumentStore, MemoryStore};
use crate::timing::Timer;
use crate::types::NodeAddress;

/// Resolve the configuration file path.
///
/// Priority:
/// 1. `--config`
/// 2. `DOCBENCH_CONFIG` environment variable
/// 3. `./docbench.toml` if it exists
/// 4. None (use defaults)
pub fn resolve_config_path(cli: Option<&str>) -> Option<String> {
    cli.map(str::to_string)
        .or_else(|| std::env::var("DOCBENCH_CONFIG").ok())
        .or_else(|| {
            let default = "docbench.toml";
            std::path::Path::new(default)
                .exists()
                .then(|| default.to_string())
        })
}

/// Build the final configuration: file, then env, then command-line flags.
pub fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(resolve_config_path(args.config.as_deref()).as_deref())?;
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Initialize tracing subscriber from logging config.
///
/// `RUST_LOG` wins when set; otherwise `config.logging.level`, forced to
/// `debug` when the debug flag is on.
pub fn init_logging(config: &Config) {
    let level = if config.bench.debug {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match config.logging.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

/// Spawn a task that flips the returned receiver to `true` on the first signal.
pub fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tx.send(true);
    });
    rx
}

/// Everything a mode needs, built once per process.
pub struct RunContext {
    pub config: Arc<Config>,
    pub nodes: Vec<NodeAddress>,
    pub store: Arc<dyn DocumentStore>,
    pub timer: Timer,
}

/// Discover the cluster and open the configured store backend.
pub async fn connect(config: Arc<Config>, timer: Timer) -> Result<RunContext> {
    let (nodes, store): (Vec<NodeAddress>, Arc<dyn DocumentStore>) = match config.cluster.backend {
        StoreBackend::Http => {
            let nodes = discover_nodes(&config.cluster).await?;
            let handle: Arc<dyn DocumentStore> = Arc::new(
                ClusterHandle::open(nodes.clone(), &config.bench.bucket, &config.cluster).await?,
            );
            (nodes, handle)
        }
        StoreBackend::Memory => {
            // Dry runs need node names for index placement but no cluster.
            let nodes = if config.cluster.nodes.is_empty() {
                vec![NodeAddress::new("localhost")]
            } else {
                config.cluster.nodes.iter().map(NodeAddress::new).collect()
            };
            let store: Arc<dyn DocumentStore> =
                Arc::new(MemoryStore::new(config.bench.bucket.clone()));
            (nodes, store)
        }
    };
    tracing::info!(
        backend = %config.cluster.backend,
        bucket = %config.bench.bucket,
        nodes = nodes.len(),
        "cluster handle ready"
    );
    Ok(RunContext {
        config,
        nodes,
        store,
        timer,
    })
}

/// Outcome of one mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunSummary {
    Loaded(LoadReport),
    Provisioned(ProvisionReport),
    Queried(QueryReport),
}

/// Run `mode` to completion (or, for query tests, until `shutdown` fires).
pub async fn dispatch(
    mode: Mode,
    ctx: &RunContext,
    shutdown: watch::Receiver<bool>,
) -> Result<RunSummary> {
    tracing::info!(mode = mode.as_str(), "starting");
    match mode {
        Mode::Load => {
            let loader = Loader::new(ctx.store.clone(), &ctx.config, ctx.timer.clone());
            Ok(RunSummary::Loaded(loader.run().await?))
        }
        Mode::Provision => {
            let provisioner = Provisioner::new(
                ctx.store.clone(),
                ctx.nodes.clone(),
                &ctx.config,
                ctx.timer.clone(),
            );
            Ok(RunSummary::Provisioned(provisioner.run().await?))
        }
        Mode::ViewQueryTest | Mode::IndexedQueryTest => {
            let strategy: Arc<dyn QueryStrategy> = if mode == Mode::ViewQueryTest {
                Arc::new(ViewLookup::from_config(&ctx.config.query))
            } else {
                Arc::new(IndexedLookup::new(&ctx.config.bench.bucket))
            };
            let pool = QueryWorkerPool::new(
                ctx.store.clone(),
                strategy,
                &ctx.config,
                ctx.timer.clone(),
            );
            Ok(RunSummary::Queried(pool.run(shutdown).await?))
        }
    }
}

/// Query tests need data loaded by an earlier process, which a memory store
/// never has.
pub fn ensure_mode_supported(mode: Mode, config: &Config) -> Result<()> {
    if mode.runs_until_signal() && config.cluster.backend == StoreBackend::Memory {
        return Err(BenchError::Validation(format!(
            "--{} needs a cluster; the memory backend starts empty",
            mode.as_str()
        )));
    }
    Ok(())
}

/// Report a fatal error once and return the process exit code.
///
/// Goes through tracing when a subscriber is installed, otherwise to stderr.
pub fn report_fatal(err: &BenchError) -> i32 {
    if tracing::dispatcher::has_been_set() {
        tracing::error!(error = %err, fatal = err.is_fatal(), "run failed");
    } else {
        eprintln!("docbench: {err}");
    }
    err.exit_code()
}

/// Full run after argument parsing: config, logging, connect, dispatch.
pub async fn run(args: Args, mode: Mode) -> Result<RunSummary> {
    let config = Arc::new(load_config(&args)?);
    ensure_mode_supported(mode, &config)?;
    init_logging(&config);
    crate::metrics::init();
    tracing::debug!(config = ?config, "configuration loaded");

    let ctx = connect(config, Timer::default()).await?;
    // Load and provision run to completion and never look at the channel.
    let (_idle, idle) = watch::channel(false);
    let shutdown = if mode.runs_until_signal() {
        shutdown_channel()
    } else {
        idle
    };
    let summary = dispatch(mode, &ctx, shutdown).await?;
    tracing::info!(mode = mode.as_str(), summary = ?summary, "finished");
    tracing::debug!(metrics = %crate::metrics::render(), "final metrics");
    Ok(summary)
}
