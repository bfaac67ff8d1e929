// main.rs — startup orchestration only. All behavior lives in the modules
// below; main.rs wires them together and owns the process lifecycle.
mod config;
mod coordinator;
mod listener;
mod scanner;
mod verify;
mod web;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use coordinator::Coordinator;
use scanner::CandidateSlot;

/// Build-time version string, embedded the same way the original server
/// took a version via `-ldflags`: a compile-time env var with a fallback.
const VERSION: &str = match option_env!("HANDOFF_VERSION") {
    Some(v) => v,
    None => "dev",
};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let config = config::from_env_and_args();

    let listener = match listener::acquire(&config.addr) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "failed to acquire listening socket");
            std::process::exit(1);
        }
    };
    let listener_fd = listener::hand_off(&listener);

    let candidate = Arc::new(CandidateSlot::new());
    scanner::scan(&config.staging_dir, &candidate);

    let coordinator = Arc::new(Coordinator::new(
        config.staging_dir.clone(),
        Arc::clone(&candidate),
        listener_fd,
    ));

    let app = web::router(web::AppState {
        version: VERSION,
        staging_dir: config.staging_dir.clone(),
        candidate,
        coordinator: Arc::clone(&coordinator),
    });

    let drain_for_main = Arc::clone(&coordinator.drain);
    let drain_for_server = Arc::clone(&coordinator.drain);

    tracing::info!(addr = %config.addr, version = VERSION, "serving");
    let serve_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_trigger(drain_for_server))
            .await
    });

    // The trigger above is awaited a second time here, independently, so we
    // can bound only the *drain* phase — not the server's whole lifetime —
    // with `drain_timeout`. `Notify`/signal futures support multiple
    // concurrent waiters, so this doesn't race the one inside `serve_task`.
    shutdown_trigger(drain_for_main).await;
    tracing::info!(timeout = ?config.drain_timeout, "shutdown requested, draining");

    match tokio::time::timeout(config.drain_timeout, serve_task).await {
        Ok(Ok(Ok(()))) => {
            tracing::info!("drained cleanly, exiting");
            Ok(())
        }
        Ok(Ok(Err(e))) => Err(e.into()),
        Ok(Err(join_err)) => Err(join_err.into()),
        Err(_) => {
            tracing::warn!("drain timed out, exiting anyway");
            Ok(())
        }
    }
}

/// Resolves on the first of: a completed install signalling drain, SIGHUP,
/// or ctrl-c. Built fresh per call so it can be awaited concurrently from
/// two independent places (the server's own graceful-shutdown hook, and
/// `main`'s drain-timeout gate) without the two awaits racing each other.
async fn shutdown_trigger(drain: Arc<tokio::sync::Notify>) {
    tokio::select! {
        _ = drain.notified() => {
            tracing::info!("drain triggered by a completed install");
        }
        _ = sighup() => {
            tracing::info!("drain triggered by SIGHUP");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("drain triggered by ctrl-c");
        }
    }
}

/// Resolves when SIGHUP arrives, or never on platforms without it. An
/// external operator-driven alternative to the coordinator's own `Notify`:
/// a way to force a drain without going through `/install`.
async fn sighup() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not install SIGHUP handler");
            std::future::pending::<()>().await;
        }
    }
}
