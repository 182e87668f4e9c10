use crate::{config::Config, routes::api_routes, telemetry::Metrics};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use lymphoma_classifier::ModelService;
use std::{path::PathBuf, sync::Arc};
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

#[derive(Clone)]
pub struct SharedState {
    pub model_service: Arc<dyn ModelService>,
    pub uploads_dir: PathBuf,
    pub metrics: Arc<Metrics>,
}

pub fn build_router(state: SharedState, max_upload_bytes: usize) -> Router {
    let metrics_layer = HttpMetricsLayerBuilder::new().build();

    Router::new()
        .merge(api_routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(metrics_layer)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(model_service: Arc<dyn ModelService>, config: &Config) -> anyhow::Result<Self> {
        let addr = config.server.get_address();

        let metrics = Arc::new(Metrics::new()?);

        let app_state = SharedState {
            model_service,
            uploads_dir: config.uploads.dir.clone(),
            metrics,
        };

        let router = build_router(app_state, config.uploads.max_bytes);
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.resubscribe();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                Ok(())
            }
        });

        Ok(server_handle)
    }
}
