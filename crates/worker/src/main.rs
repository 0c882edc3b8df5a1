// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `hermodw`: the Hermod worker.
//!
//! Runs the reconciler against the metadata store until interrupted. Exits 0
//! on graceful shutdown, 1 on initialization failure.

use anyhow::Context;
use clap::Parser;
use hermod_store::{MemoryStore, MetadataStore};
use hermod_worker::{default_state_dir, resolve_guid, startup, EnvConfig, WorkerIdentity};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hermodw", about = "Hermod workflow worker", version)]
struct Args {
    /// Stable worker GUID; generated and persisted when omitted.
    #[arg(long)]
    worker_guid: Option<String>,

    /// Token presented to the platform on registration.
    #[arg(long, default_value = "")]
    worker_token: String,

    /// Shard ordinal of this worker (0-based).
    #[arg(long, default_value_t = 0)]
    worker_id: u32,

    /// Total workers sharing the workflow set.
    #[arg(long, default_value_t = 1)]
    total_workers: u32,

    /// Platform endpoint backing the metadata store.
    #[arg(long, default_value = "")]
    platform_url: String,
}

fn init_tracing(state_dir: &std::path::Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hermod_engine=info,hermod_worker=info"));
    match std::fs::create_dir_all(state_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(state_dir.join("logs"), "hermodw.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let state_dir = default_state_dir();
    let _log_guard = init_tracing(&state_dir);
    let env = EnvConfig::load();

    let guid = resolve_guid(args.worker_guid.as_deref(), &state_dir)
        .context("resolving worker GUID")?;
    if args.worker_id >= args.total_workers.max(1) {
        anyhow::bail!(
            "worker id {} out of range for {} workers",
            args.worker_id,
            args.total_workers
        );
    }

    let identity = WorkerIdentity::new(guid, args.worker_id, args.total_workers)
        .with_token(args.worker_token.clone())
        .with_endpoint(args.platform_url.clone());

    // The embedded store backend. Remote platform backends implement the
    // same trait and are selected by the control plane build.
    let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());

    let worker = startup(store, identity, env).await.context("worker startup")?;
    info!("worker running; Ctrl-C to drain and stop");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    worker.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(err) = run(args).await {
        error!(error = %err, "initialization failed");
        eprintln!("hermodw: {err:#}");
        std::process::exit(1);
    }
}
