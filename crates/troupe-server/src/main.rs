//! `trouped` — the orchestrator daemon.

use std::sync::Arc;

use tracing::{error, info};

use troupe_bus::NoopBus;
use troupe_server::{logging, ServerConfig, TroupeServer};
use troupe_store::{ConnectionConfig, Store};

#[tokio::main]
async fn main() {
    let config = ServerConfig::from_env();
    logging::init_subscriber(&config.log_level);

    if config.master_key_secret.is_empty() {
        error!("TROUPE_MASTER_KEY is required");
        std::process::exit(1);
    }
    if config.worker_token.is_empty() {
        error!("TROUPE_WORKER_TOKEN is required");
        std::process::exit(1);
    }
    if config.api_key_hash.is_empty() {
        error!("TROUPE_API_KEY_HASH is required");
        std::process::exit(1);
    }

    let store = match Store::open(&config.db_path, &ConnectionConfig::default()) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, db_path = %config.db_path, "failed to open store");
            std::process::exit(1);
        }
    };

    // Executions left over from a previous process are unrecoverable; fail
    // them before anything can observe a stale running count.
    match store.recover_stale_executions("Orchestrator restarted while execution was in flight") {
        Ok(0) => {}
        Ok(recovered) => info!(recovered, "failed stale executions from previous run"),
        Err(e) => error!(error = %e, "stale execution recovery failed"),
    }

    // A real broker client replaces this in deployments that fan out
    // externally; without one only the external fan-out is lost.
    let server = TroupeServer::new(config, store, Arc::new(NoopBus));

    let (addr, server_task) = match server.listen().await {
        Ok(bound) => bound,
        Err(e) => {
            error!(error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(addr = %addr, "orchestrator ready");

    wait_for_signal().await;
    info!("shutdown signal received");

    server.stop().await;
    let _ = server_task.await;
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
