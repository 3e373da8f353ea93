use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use buildflow::config::FlowConfig;
use buildflow::history::ActionHistory;
use buildflow::registry::InMemoryRegistry;
use buildflow::remote::OctocrabRemote;
use buildflow::server::{build_router, AppState};
use buildflow::service::DependencyFlow;
use buildflow::store::StateStore;
use buildflow::{reconciler, scanner};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "buildflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = FlowConfig::from_env();

    let token = match std::env::var("BUILDFLOW_GITHUB_TOKEN") {
        Ok(token) => token,
        Err(_) => {
            tracing::error!("BUILDFLOW_GITHUB_TOKEN is not set");
            std::process::exit(1);
        }
    };
    let remote = match OctocrabRemote::from_token(token) {
        Ok(remote) => remote,
        Err(e) => {
            tracing::error!(error = %e, "failed to build the GitHub client");
            std::process::exit(1);
        }
    };

    let store = match StateStore::open(&config.state_path) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, path = %config.state_path.display(),
                "failed to open the state store");
            std::process::exit(1);
        }
    };
    tracing::info!(tracked = store.len(), "loaded in-flight pull request state");

    let history = match ActionHistory::open(&config.history_path) {
        Ok(history) => history,
        Err(e) => {
            tracing::error!(error = %e, path = %config.history_path.display(),
                "failed to open the action history");
            std::process::exit(1);
        }
    };

    // TODO: back this with the relational registry service once its API
    // client lands; builds and subscriptions are registered over HTTP until
    // then.
    let registry = InMemoryRegistry::new();

    let flow = Arc::new(DependencyFlow::new(store, history, remote, registry));
    let cancel = CancellationToken::new();

    let scanner_task = tokio::spawn(scanner::run_scanner(
        Arc::clone(&flow),
        config.with_jitter(config.scan_interval, "scanner"),
        cancel.clone(),
    ));
    let reconciler_task = tokio::spawn(reconciler::run_reconciler(
        Arc::clone(&flow),
        config.with_jitter(config.reconcile_interval, "reconciler"),
        cancel.clone(),
    ));

    let app = build_router(AppState::new(flow));
    let listener = match tokio::net::TcpListener::bind(config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr = %config.listen_addr, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(addr = %config.listen_addr, "listening");

    let shutdown = cancel.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown.cancelled().await;
    });

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    cancel.cancel();
    let _ = scanner_task.await;
    let _ = reconciler_task.await;
    tracing::info!("shutdown complete");
}
