//! Roulette display node: round sync over a broadcast channel, with HTTP, SSE
//! and WebSocket surfaces.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dao;
mod display;
mod dto;
mod error;
mod routes;
mod services;
mod state;
mod transport;

use config::AppConfig;
use dao::http::HttpBackend;
use services::node;
use state::SharedState;
use transport::{
    ChannelFactory,
    native::NativeRegistry,
    storage::{FileStorage, MemoryStorage, SharedStorage},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut config = AppConfig::load();
    if let Some(port) = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.listen_port = port;
    }

    let storage: Arc<dyn SharedStorage> = match &config.storage_dir {
        Some(dir) => Arc::new(FileStorage::new(dir.clone())),
        None => Arc::new(MemoryStorage::new()),
    };
    let factory = ChannelFactory::new(
        Arc::new(NativeRegistry::new()),
        storage,
        config.transport_settings(),
    );
    let backend = HttpBackend::new(config.backend_endpoints(), config.backend.request_timeout)
        .context("building backend client")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let app_state = node::start(config, factory, Arc::new(backend)).await;
    let app = build_router(app_state.clone());

    info!(%addr, "starting server");
    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    node::shutdown(&app_state).await;
    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
