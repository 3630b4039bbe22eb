//! Axon CLI
//!
//! The `axon` command boots the agent runtime and inspects its state.
//!
//! ## Commands
//!
//! - `topics`: List the registered review topics and their payload fields
//! - `check`: Validate an agent config file without starting anything
//! - `serve`: Run the reconciliation loop against a config file
//! - `review`: Submit one review request in-process and print the summary
//! - `snapshots`: List workflow snapshots persisted on disk

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use axon_core::review::{self, ReviewDomain};
use axon_core::runtime::{AgentPlan, RuntimeSettings};
use axon_core::{
    AgentRuntime, ConfigSource, PublishOptions, SignalBus, Summary, TopicRegistry,
};
use axon_state::{FsSnapshotStore, MemorySnapshotStore, SnapshotStatus, SnapshotStore};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "axon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Declarative multi-agent orchestration runtime", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered topics
    Topics,

    /// Validate an agent config file (JSON or TOML)
    Check {
        #[arg(short, long, env = "AXON_CONFIG")]
        config: PathBuf,
    },

    /// Run agents from a config file until Ctrl-C
    ///
    /// Summaries are printed to stdout as JSON lines. With `--stdin`, wire
    /// signals read from stdin (one JSON object per line) are ingested.
    Serve {
        #[arg(short, long, env = "AXON_CONFIG")]
        config: PathBuf,

        /// Reconciliation interval in milliseconds
        #[arg(long, default_value = "250")]
        interval_ms: u64,

        /// Persist workflow snapshots under this directory
        #[arg(long, env = "AXON_SNAPSHOTS")]
        snapshots: Option<PathBuf>,

        /// Ingest wire signals from stdin
        #[arg(long)]
        stdin: bool,
    },

    /// Submit one review request and print its summary
    Review {
        /// Number of files in the change
        #[arg(long)]
        files_changed: i64,

        #[arg(long, default_value = "change")]
        intent: String,

        /// Risk labels (repeatable)
        #[arg(long = "label")]
        labels: Vec<String>,

        /// Unified diff to scan
        #[arg(long)]
        diff_file: Option<PathBuf>,

        /// Agent config (defaults to the built-in review agents)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Specialist collection timeout in milliseconds
        #[arg(long, default_value = "2000")]
        timeout_ms: u64,
    },

    /// List persisted workflow snapshots
    Snapshots {
        #[arg(long, env = "AXON_SNAPSHOTS")]
        dir: PathBuf,

        /// Only show snapshots in this status
        #[arg(long)]
        status: Option<SnapshotStatus>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    axon_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Topics => cmd_topics(),
        Commands::Check { config } => cmd_check(&config),
        Commands::Serve {
            config,
            interval_ms,
            snapshots,
            stdin,
        } => cmd_serve(config, interval_ms, snapshots.as_deref(), stdin).await,
        Commands::Review {
            files_changed,
            intent,
            labels,
            diff_file,
            config,
            timeout_ms,
        } => {
            cmd_review(
                files_changed,
                &intent,
                labels,
                diff_file.as_deref(),
                config,
                timeout_ms,
            )
            .await
        }
        Commands::Snapshots { dir, status } => cmd_snapshots(&dir, status).await,
    }
}

fn review_bus() -> Result<Arc<SignalBus>> {
    let registry = Arc::new(TopicRegistry::new());
    registry
        .register_domain(&ReviewDomain)
        .context("Failed to register review topics")?;
    Ok(Arc::new(SignalBus::new(registry)))
}

fn snapshot_store(dir: Option<&Path>) -> Result<Arc<dyn SnapshotStore>> {
    Ok(match dir {
        Some(dir) => Arc::new(
            FsSnapshotStore::new(dir)
                .with_context(|| format!("Failed to open snapshot store at {dir:?}"))?,
        ),
        None => Arc::new(MemorySnapshotStore::new()),
    })
}

fn build_runtime(
    bus: &Arc<SignalBus>,
    source: ConfigSource,
    store: Arc<dyn SnapshotStore>,
    settings: RuntimeSettings,
) -> Result<AgentRuntime> {
    Ok(AgentRuntime::builder(Arc::clone(bus), source)
        .domain(&ReviewDomain)?
        .store(store)
        .settings(settings)
        .build())
}

fn cmd_topics() -> Result<()> {
    let bus = review_bus()?;
    for topic in bus.registry().list() {
        let fields: Vec<String> = topic
            .schema
            .fields
            .iter()
            .map(|f| {
                let marker = if f.required { "" } else { "?" };
                format!("{}{marker}: {}", f.name, f.field_type)
            })
            .collect();
        println!("{:<16} type={:<16} {{{}}}", topic.name, topic.wire_type, fields.join(", "));
    }
    Ok(())
}

fn cmd_check(config: &Path) -> Result<()> {
    let bus = review_bus()?;
    let runtime = build_runtime(
        &bus,
        ConfigSource::File(config.to_path_buf()),
        Arc::new(MemorySnapshotStore::new()),
        RuntimeSettings::default(),
    )?;
    let agents = runtime
        .desired()
        .with_context(|| format!("Invalid agent config {config:?}"))?;

    println!("{} agent(s) in {:?}", agents.len(), config);
    for agent in &agents {
        let detail = match &agent.plan {
            AgentPlan::Specialist(plan) => format!(
                "{} -> {} ({} action(s))",
                plan.request_topic,
                plan.result_topic,
                plan.workflow.steps().len()
            ),
            AgentPlan::Orchestrator(plan) => format!(
                "{} -> {} via {} [{}]",
                plan.request_topic,
                plan.summary_topic,
                plan.dispatch_topic,
                plan.specialists.join(", ")
            ),
        };
        println!(
            "  {:<24} {:<12} {}  {}",
            agent.config.id,
            agent.config.kind.as_str(),
            agent.digest.short(),
            detail
        );
    }
    Ok(())
}

async fn cmd_serve(
    config: PathBuf,
    interval_ms: u64,
    snapshots: Option<&Path>,
    stdin: bool,
) -> Result<()> {
    let bus = review_bus()?;
    let settings = RuntimeSettings {
        reconcile_interval: Duration::from_millis(interval_ms.max(1)),
        ..RuntimeSettings::default()
    };
    let runtime = Arc::new(build_runtime(
        &bus,
        ConfigSource::File(config.clone()),
        snapshot_store(snapshots)?,
        settings,
    )?);

    // Fail fast on a broken config at startup; later reloads keep the last good population.
    let report = runtime
        .reconcile()
        .await
        .with_context(|| format!("Invalid agent config {config:?}"))?;
    info!(agents = ?report.spawned, config = ?config, "Axon runtime started");

    let mut summaries = bus.subscribe(review::SUMMARY)?;
    tokio::spawn(async move {
        while let Some(signal) = summaries.recv().await {
            match serde_json::to_string(&signal) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(error = %err, "Failed to encode summary"),
            }
        }
    });

    if stdin {
        let bus = Arc::clone(&bus);
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let ingested = serde_json::from_str::<Value>(&line)
                    .map_err(axon_core::SignalError::from)
                    .and_then(|wire| bus.ingest(wire));
                if let Err(err) = ingested {
                    warn!(error = %err, "Rejected input signal");
                }
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_runtime = Arc::clone(&runtime);
    let reconciler = tokio::spawn(async move { loop_runtime.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    reconciler.await.context("Reconciler task failed")?;
    Ok(())
}

async fn cmd_review(
    files_changed: i64,
    intent: &str,
    labels: Vec<String>,
    diff_file: Option<&Path>,
    config: Option<PathBuf>,
    timeout_ms: u64,
) -> Result<()> {
    let diff = match diff_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read diff {path:?}"))?,
        None => String::new(),
    };
    let source = match config {
        Some(path) => ConfigSource::File(path),
        None => ConfigSource::Static(review::default_agents()),
    };

    let bus = review_bus()?;
    let collect_timeout = Duration::from_millis(timeout_ms);
    let runtime = build_runtime(
        &bus,
        source,
        snapshot_store(None)?,
        RuntimeSettings {
            collect_timeout,
            ..RuntimeSettings::default()
        },
    )?;
    runtime.reconcile().await?;

    let mut summaries = bus.subscribe(review::SUMMARY)?;
    let request = bus.publish(
        review::REQUEST,
        json!({
            "files_changed": files_changed,
            "intent": intent,
            "labels": labels,
            "diff": diff,
        }),
        PublishOptions::from_source("axon-cli"),
    )?;

    // Give the orchestrator its own deadline plus headroom to publish.
    let wait = collect_timeout + Duration::from_secs(5);
    let summary = tokio::time::timeout(wait, async {
        while let Some(signal) = summaries.recv().await {
            let summary = Summary::from_signal(&signal)?;
            if summary.request_id == request.id {
                return Ok(Some(summary));
            }
        }
        Ok::<_, serde_json::Error>(None)
    })
    .await
    .context("Timed out waiting for review summary")??;
    runtime.shutdown().await;

    let Some(summary) = summary else {
        bail!("Summary topic closed before request {} finished", request.id);
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn cmd_snapshots(dir: &Path, status: Option<SnapshotStatus>) -> Result<()> {
    let store = FsSnapshotStore::new(dir)
        .with_context(|| format!("Failed to open snapshot store at {dir:?}"))?;
    let snapshots = store.list_snapshots(status).await?;

    if snapshots.is_empty() {
        println!("No snapshots found in {:?}", dir);
        return Ok(());
    }
    for snapshot in snapshots {
        println!(
            "{:<40} {:<10} {:<24} steps={} updated={}{}",
            snapshot.request_id,
            snapshot.status,
            snapshot.spec_name,
            snapshot.audit_trail.len(),
            snapshot.updated_at.to_rfc3339(),
            snapshot
                .error
                .map(|e| format!(" error={e}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}
