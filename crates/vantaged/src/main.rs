//! vantaged — runs a calculation cycle on a local node pool.
//!
//! Usage: `vantaged <cycle.json>`. Results are written to stdout as wire
//! frames, one per line, each preceded by any identifier registrations it
//! needs.

use std::sync::Arc;

use anyhow::{Context, Result};

use vantage_core::config::VantageConfig;
use vantage_services::{
    node_id_with, next_node_id, CalculationNode, EmptyBlacklist, FunctionBlacklistMaintainer,
    FunctionBlacklistQuery, FunctionRepository, InMemoryBlacklist, InMemoryFunctionRepository, JobDispatcher,
    LocalNodeInvoker, ViewComputationCacheSource,
};

mod builtins;
mod cycle;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Load config
    if let Err(e) = VantageConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = VantageConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        VantageConfig::default()
    });

    let cycle_path = std::env::args()
        .nth(1)
        .context("usage: vantaged <cycle.json>")?;
    let cycle = cycle::CycleFile::load(std::path::Path::new(&cycle_path))?;

    // Functions
    let functions = Arc::new(InMemoryFunctionRepository::new());
    builtins::register_all(&functions);
    tracing::info!(functions = ?functions.function_ids(), "function repository loaded");

    // Node pool
    let caches = Arc::new(ViewComputationCacheSource::default());
    let invoker = Arc::new(LocalNodeInvoker::new("local", config.invoker.tail_policy));
    let (blacklist_query, blacklist_update): (Arc<dyn FunctionBlacklistQuery>, Arc<dyn FunctionBlacklistMaintainer>) =
        if config.node.blacklist_failures {
            let blacklist = Arc::new(InMemoryBlacklist::new());
            (blacklist.clone(), blacklist)
        } else {
            (Arc::new(EmptyBlacklist), Arc::new(EmptyBlacklist))
        };
    let node_count = config.node.effective_node_count();
    for _ in 0..node_count {
        let node_id = if config.node.node_id.is_empty() {
            next_node_id()
        } else {
            let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
            node_id_with(&host, &config.node.node_id)
        };
        invoker.add_node(
            CalculationNode::new(node_id, caches.clone(), functions.clone())
                .with_blacklist(blacklist_query.clone(), blacklist_update.clone()),
        );
    }
    tracing::info!(
        nodes = node_count,
        tail_policy = ?config.invoker.tail_policy,
        blacklist_failures = config.node.blacklist_failures,
        timeout_ms = config.dispatcher.timeout_ms,
        "node pool ready"
    );

    let dispatcher = JobDispatcher::from_config(&config.dispatcher);
    dispatcher.add_invoker(invoker.clone());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let summary = cycle::run(cycle, functions.last_reload(), &dispatcher, &caches, &mut out).await?;

    for s in invoker.statistics().snapshot() {
        tracing::info!(
            calc_config = %s.calc_config_name,
            function_id = %s.function_id,
            invocations = s.invocations,
            mean_us = s.mean().as_micros() as u64,
            input_values = s.input_values,
            "function statistics"
        );
    }
    tracing::info!(
        completed = summary.completed,
        failed = summary.failed,
        stale_jobs = invoker.stale_jobs(),
        "cycle complete"
    );
    Ok(())
}
