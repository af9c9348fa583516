mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::core::lifecycle::LifecycleComponent;
use crate::core::pipeline::Installer;

pub struct ApiServer {
    installer: Installer,
    log_tx: tokio::sync::broadcast::Sender<String>,
    api_host: String,
    api_port: u16,
    server: Option<tokio::task::JoinHandle<()>>,
}

pub struct ApiServerConfig {
    pub installer: Installer,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) installer: Installer,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            installer: config.installer,
            log_tx: config.log_tx,
            api_host: config.api_host,
            api_port: config.api_port,
            server: None,
        }
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

// --- Lifecycle Implementations ---

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server Interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.api_host, self.api_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        let state = AppState {
            installer: self.installer.clone(),
            log_tx: self.log_tx.clone(),
        };
        let app = router::build_api_router(state);

        info!("API Server running at http://{addr}");
        self.server = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server Interface shutting down...");
        if let Some(server) = self.server.take() {
            server.abort();
        }
        Ok(())
    }
}
