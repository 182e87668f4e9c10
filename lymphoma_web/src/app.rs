use crate::config::Config;
use crate::server::HttpServer;

use lymphoma_classifier::build_model_service;
use std::error::Error;
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let model_service = match build_model_service(&config.model).await {
        Ok(service) => service,
        Err(e) => {
            tracing::error!("Failed to initialize model service: {}", e);
            return Err(Box::new(e));
        }
    };

    tokio::fs::create_dir_all(&config.uploads.dir).await?;

    let server = HttpServer::new(model_service, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    if let Ok(Err(e)) = server_handle.await {
        tracing::error!("Server exited with error: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
