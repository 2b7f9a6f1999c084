//! Pangolin ingress controller.
//!
//! Reconciles Ingress-style routes into per-host Pangolin resources,
//! serving health checks while the worker pool runs.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pangolin_ingress_controller::health::{start_health_server, HealthState};
use pangolin_ingress_controller::seed::Seed;
use pangolin_ingress_controller::{
    Config, Controller, LogEventRecorder, MemoryStore, ReconcileError, Reconciler,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::parse();
    config.validate().context("invalid configuration")?;
    let config = Arc::new(config);

    tracing::info!(
        ingress_class = %config.ingress_class,
        default_tunnel = %config.default_tunnel_name,
        workers = config.workers,
        "pic-controller starting"
    );

    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &config.seed {
        Seed::from_path(path)?.apply(&store);
        tracing::info!(routes = store.source_routes().len(), "loaded seed state");
    }

    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        Arc::new(LogEventRecorder),
        config.clone(),
    ));

    if config.once {
        return run_once(&store, &reconciler).await;
    }

    let cancel = CancellationToken::new();
    let health = Arc::new(HealthState::new());
    let health_server = tokio::spawn(start_health_server(
        config.health_addr,
        health.clone(),
        cancel.clone(),
    ));

    let controller = Arc::new(Controller::new(reconciler, &config));
    for route in store.source_routes() {
        controller.enqueue(route.key());
    }

    let workers = {
        let controller = controller.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { controller.run(cancel).await })
    };
    health.set_ready(true);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    health.set_ready(false);
    cancel.cancel();
    workers.await.context("controller task failed")?;
    health_server
        .await
        .context("health server task failed")?
        .context("health server failed")?;

    tracing::info!("pic-controller stopped");
    Ok(())
}

/// Reconciles every stored route once and prints the resulting targets.
async fn run_once(store: &MemoryStore, reconciler: &Reconciler) -> Result<()> {
    let cancel = CancellationToken::new();
    for route in store.source_routes() {
        let key = route.key();
        match reconciler.reconcile(&key, &cancel).await {
            Ok(action) => tracing::debug!(source = %key, ?action, "reconciled"),
            Err(err @ ReconcileError::Cancelled) => return Err(err.into()),
            Err(err) => tracing::warn!(source = %key, error = %err, "reconcile failed"),
        }
    }

    let targets = serde_json::to_string_pretty(&store.targets())?;
    println!("{targets}");
    Ok(())
}
