use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use canal_dispatch::config::Settings;
use canal_dispatch::credentials::CredentialResolver;
use canal_dispatch::db;
use canal_dispatch::dispatch::{
    DispatchPipeline, GraphTransport, SqlClientDirectory, TransportRouter,
};
use canal_dispatch::message::{Channel, MessageStore};
use canal_dispatch::tasks::WorkerTask;
use canal_dispatch::worker::DispatchWorker;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    // Open the message store and run migrations
    let pool = db::connect(&settings.database.url).await?;
    tracing::info!(url = %settings.database.url, "Database ready");

    let store = MessageStore::new(pool.clone());
    let resolver = CredentialResolver::from_config(&settings.credentials, &pool);

    let graph = Arc::new(GraphTransport::new(&settings.transport)?);
    let router = TransportRouter::new()
        .with_transport(Channel::Messenger, graph.clone())
        .with_transport(Channel::Dm, graph);

    let pipeline = Arc::new(DispatchPipeline::new(
        store.clone(),
        resolver,
        router,
        Arc::new(SqlClientDirectory::new(pool)),
    ));
    let worker = Arc::new(DispatchWorker::new(store, pipeline));

    // Start the dispatch worker in background
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let worker_task = WorkerTask::new(settings.worker.clone(), worker, shutdown_rx);
    let worker_handle = tokio::spawn(async move {
        worker_task.run().await;
    });

    // Wait for shutdown signal
    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    tracing::info!("Waiting for background tasks to finish...");
    let _ = worker_handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
