//! powd: proof-of-work delegation daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use powd_core::config::PowdConfig;
use powd_services::{
    completion_channel, run_completions, ClientRegistry, CommandEngine, CommandHandler,
    DecryptionResolver, IdentityProvider, MaintenanceScheduler, PowRequestHandler,
    ProofOfWorkEngine, ResponseEncoder, TaskStore,
};

mod dispatch;
mod listener;

/// Interval of the task-count stats line.
const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = PowdConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = PowdConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        PowdConfig::default()
    });
    tracing::info!(config = %PowdConfig::file_path().display(), "powd starting");

    // Task store
    let store = TaskStore::open(
        &config.store.path,
        Duration::from_millis(config.store.busy_timeout_ms),
    )
    .with_context(|| format!("failed to open task store {}", config.store.path.display()))?;
    let counts = store.counts()?;
    tracing::info!(
        path = %config.store.path.display(),
        incomplete = counts.incomplete,
        complete = counts.complete,
        "task store ready"
    );

    // Clients
    let clients = ClientRegistry::new();
    match clients.load_list(&config.clients.list_path) {
        Ok(n) => tracing::info!(
            path = %config.clients.list_path.display(),
            count = n,
            "client list loaded"
        ),
        Err(e) => tracing::warn!(error = %e, "failed to load client list"),
    }
    clients.apply_config(&config.clients.keys);
    if clients.is_empty() {
        tracing::warn!("no clients configured, every request will be refused");
    }

    // Identity
    let identity = Arc::new(IdentityProvider::new(&config.identity.keypair_path));
    let keypair = identity.identity().context("server identity unavailable")?;
    tracing::info!(
        address = keypair.address(),
        public_key = hex::encode(keypair.public),
        "server identity ready"
    );

    // Engine and completion delivery
    let command_engine = Arc::new(CommandEngine::new(&config.engine));
    let engine: Arc<dyn ProofOfWorkEngine> = command_engine.clone();
    let (sink, completion_rx) = completion_channel();

    // Command router
    let router = {
        let mut r = dispatch::CommandRouter::new();
        let pow = PowRequestHandler::new(
            DecryptionResolver::new(clients.clone()),
            store.clone(),
            engine.clone(),
            sink.clone(),
            ResponseEncoder::new(identity.clone()),
        );
        r.register(Arc::new(pow) as Arc<dyn CommandHandler>);
        tracing::info!(commands = ?r.tags(), "command handlers registered");
        Arc::new(r)
    };

    // Built before the listener so only inherited tasks are swept.
    let scheduler = Arc::new(
        MaintenanceScheduler::new(store.clone(), engine, sink, config.maintenance.clone())
            .context("failed to read incomplete tasks")?,
    );

    let tcp = TcpListener::bind(&config.network.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.network.listen_addr))?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let completion_task = tokio::spawn(run_completions(
        store.clone(),
        completion_rx,
        shutdown_tx.subscribe(),
    ));

    // Finishes on its own after one pass.
    let _sweep_task = tokio::spawn(scheduler.clone().run_startup_sweep(shutdown_tx.subscribe()));

    let cleanup_task = tokio::spawn(scheduler.run_cleanup(shutdown_tx.subscribe()));

    let listener_task = tokio::spawn(
        listener::CommandListener::new(tcp, router, shutdown_tx.subscribe()).run(),
    );

    let stats_printer = {
        let store = store.clone();
        let clients = clients.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            loop {
                interval.tick().await;
                let store = store.clone();
                match tokio::task::spawn_blocking(move || store.counts()).await {
                    Ok(Ok(counts)) => tracing::info!(
                        incomplete = counts.incomplete,
                        complete = counts.complete,
                        clients = clients.len(),
                        "task stats"
                    ),
                    Ok(Err(e)) => tracing::warn!(error = %e, "failed to read task stats"),
                    Err(e) => tracing::error!(error = %e, "task stats panicked"),
                }
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = completion_task     => tracing::error!("completion listener exited: {:?}", r),
        r = cleanup_task        => tracing::error!("cleanup loop exited: {:?}", r),
        r = listener_task       => tracing::error!("command listener exited: {:?}", r),
        r = stats_printer       => tracing::error!("stats printer exited: {:?}", r),
    }

    command_engine.close();

    Ok(())
}
