use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use glaredb::blob::InMemoryBlobStore;
use glaredb::config::Config;
use glaredb::notify::NotificationEmitter;
use glaredb::store::Store;
use glaredb::types::TypeRegistry;
use glaredb::{build_router, AppState, LifecycleEngine};

const EXIT_BIND_FAILURE: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = Config::from_env();
    let registry = Arc::new(TypeRegistry::bootstrap());
    let store = Store::new();
    let blobs = InMemoryBlobStore::new();
    let (notifier, mut events) = NotificationEmitter::channel();

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(
                artifact_id = %event.artifact_id,
                event_type = ?event.event_type,
                actor = %event.actor,
                "artifact event"
            );
        }
    });

    let engine = Arc::new(LifecycleEngine::from_config(registry, store, blobs, notifier, &config));
    let state = AppState { engine, config: Arc::new(config.clone()) };
    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(address = %config.listen_addr, error = %err, "failed to bind listener");
            return ExitCode::from(EXIT_BIND_FAILURE);
        }
    };

    info!(address = %config.listen_addr, "artifact repository listening");

    if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %err, "server error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("glaredb=debug,tower_http=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
