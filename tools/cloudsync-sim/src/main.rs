//! # cloudsync-sim
//!
//! Drives cloudsync pipelines against an in-memory cloud and prints what
//! ends up in the cache.
//!
//! - `scan` - Seed demo resources, run full-scan cycles, print cycle reports
//! - `upsert` - Apply a load balancer upsert, refresh, reconcile, print the result
//! - `watch` - Run the scheduler until a timeout or Ctrl-C

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cloudsync_testing::InMemoryCloud;
use nebucloud_cloudsync::core::keys;
use nebucloud_cloudsync::prelude::*;
use serde_json::json;
use tracing::{info, warn};

mod fixture;

/// Simulator for cloudsync pipelines
#[derive(Parser, Debug)]
#[command(name = "cloudsync-sim")]
#[command(about = "Run cloudsync pipelines against an in-memory cloud", long_about = None)]
struct Args {
    /// JSON sync configuration; defaults to one demo account in one region
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Server groups seeded per application and scope
    #[arg(short, long, default_value_t = 2, global = true)]
    groups: usize,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run full-scan cycles and print the reports
    Scan {
        /// Cycles per scope
        #[arg(long, default_value_t = 1)]
        cycles: u32,
    },
    /// Upsert a load balancer, then reconcile the refresh into the cache
    Upsert {
        /// JSON upsert request; defaults to a demo listener change
        request: Option<PathBuf>,
    },
    /// Run the scheduler until the timeout elapses or Ctrl-C
    Watch {
        /// Seconds to run
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(args.config.as_deref())?;
    config.validate()?;

    let cloud = Arc::new(InMemoryCloud::new());
    for scope in config.scopes() {
        fixture::seed(&cloud, &scope, args.groups);
    }
    let pipelines: Vec<Arc<Pipeline>> = config
        .scopes()
        .into_iter()
        .map(|scope| {
            Arc::new(
                Pipeline::new(scope, Arc::new(ProviderCache::new()), cloud.clone())
                    .on_demand_enabled(config.on_demand_enabled),
            )
        })
        .collect();
    info!(scopes = pipelines.len(), "seeded in-memory cloud");

    match args.command {
        Command::Scan { cycles } => scan(&pipelines, cycles).await,
        Command::Upsert { request } => upsert(&config, &cloud, &pipelines, request.as_deref()).await,
        Command::Watch { seconds } => watch(&config, pipelines, seconds).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let Some(path) = path else {
        return Ok(SyncConfig::new()
            .account("demo", ["region1"])
            .scan_interval(Duration::from_secs(2))
            .task_poll(Duration::from_millis(50), 20));
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

fn namespace_counts(cache: &ProviderCache) -> BTreeMap<&'static str, usize> {
    cache
        .namespaces()
        .into_iter()
        .map(|ns| (ns.as_str(), cache.keys(ns).len()))
        .collect()
}

fn print(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn scan(pipelines: &[Arc<Pipeline>], cycles: u32) -> Result<()> {
    let mut reports = Vec::new();
    for _ in 0..cycles {
        for pipeline in pipelines {
            reports.push(pipeline.run_cycle().await);
        }
    }

    let caches: BTreeMap<String, _> = pipelines
        .iter()
        .map(|p| (p.scope().to_string(), namespace_counts(p.cache())))
        .collect();
    print(&json!({ "reports": reports, "caches": caches }))
}

fn demo_request(scope: &Scope) -> UpsertLoadBalancerRequest {
    UpsertLoadBalancerRequest::new(&scope.account, &scope.region, "")
        .with_id("lb-web")
        .listener(
            Listener::layer4(L4Protocol::Tcp, 80)
                .with_id("lbl-web")
                .with_target(Target::new("ins-web-0-0", 8080).weight(20)),
        )
        .listener(
            Listener::layer7(L7Protocol::Http, 8080).with_rule(
                Rule::new("web.example.com", "/")
                    .with_target(Target::new("ins-web-0-1", 8080)),
            ),
        )
}

async fn upsert(
    config: &SyncConfig,
    cloud: &Arc<InMemoryCloud>,
    pipelines: &[Arc<Pipeline>],
    request: Option<&Path>,
) -> Result<()> {
    let Some(first) = pipelines.first() else {
        bail!("no scopes configured");
    };
    let request = match request {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading request {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing request {}", path.display()))?
        }
        None => demo_request(first.scope()),
    };
    let scope = request.scope();
    let Some(pipeline) = pipelines.iter().find(|p| p.scope() == &scope) else {
        bail!("request targets {scope}, which is not configured");
    };

    pipeline.run_cycle().await;
    cloud.task_latency(2);

    let log = TaskLog::new();
    let upserter = LoadBalancerUpserter::new(cloud.clone(), cloud.clone())
        .with_poller(TaskPoller::from_config(&config.task_poll))
        .with_trigger(pipeline.clone());
    let outcome = upserter.upsert(&request, &log).await?;
    if !outcome.is_success() {
        warn!(problems = outcome.problems().count(), "upsert finished with problems");
    }

    let pending = pipeline.pending_on_demand_requests();
    let report = pipeline.run_cycle().await;
    let key = keys::load_balancer(&scope.account, &scope.region, &outcome.load_balancer_id)?;
    let cached = pipeline.cache().get(Namespace::LoadBalancers, &key);

    print(&json!({
        "outcome": outcome,
        "progress": log.lines().iter().map(|l| &l.message).collect::<Vec<_>>(),
        "pendingBeforeCycle": pending,
        "cycle": report,
        "loadBalancer": cached,
    }))
}

async fn watch(config: &SyncConfig, pipelines: Vec<Arc<Pipeline>>, seconds: u64) -> Result<()> {
    let watched = pipelines.clone();
    let scheduler = Scheduler::from_config(config, pipelines)?;
    info!(pipelines = scheduler.len(), seconds, "scheduler running");

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl-C")?;
            info!("interrupted");
        }
    }
    scheduler.shutdown().await;

    let summary: BTreeMap<String, _> = watched
        .iter()
        .map(|p| {
            let stats = p.cache().stats();
            (
                p.scope().to_string(),
                json!({
                    "namespaces": namespace_counts(p.cache()),
                    "installs": stats.namespaces_installed(),
                    "onDemandStored": stats.on_demand_stored(),
                    "onDemandEvicted": stats.on_demand_evicted(),
                }),
            )
        })
        .collect();
    print(&json!(summary))
}
