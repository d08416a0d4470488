pub mod api;
pub mod dtos;
pub mod error;
pub mod extractors;
pub mod services;
pub mod utils;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    Extension, Router,
    http::{HeaderValue, Method},
    routing::get,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use api::{
    channel_controller::ChannelController,
    health_controller::{health_endpoint, metrics_endpoint},
    proxy_controller::ProxyController,
};
use services::RelayServices;

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

pub fn get_uptime_seconds() -> u64 {
    START_TIME.elapsed().as_secs()
}

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub struct RelayApplicationServer;

impl RelayApplicationServer {
    /// every route with its layers, no listener. Tests drive this directly
    pub fn router(services: RelayServices) -> Router {
        let cors = Self::cors_layer(&services.config.cors_origin);
        let max_connections = services.config.max_connections.max(1);

        Router::new()
            .merge(ChannelController::app())
            .nest("/proxy", ProxyController::app())
            .route("/health", get(health_endpoint))
            .route("/metrics", get(metrics_endpoint))
            .layer(Extension(services))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            // one semaphore shared by every route, not one per route
            .layer(GlobalConcurrencyLimitLayer::new(max_connections))
    }

    pub async fn serve(config: Arc<AppConfig>) -> anyhow::Result<()> {
        // touch it so uptime counts from here
        Lazy::force(&START_TIME);

        let services = RelayServices::new(config.clone())
            .await
            .with_metrics(Self::install_metrics());

        let token = CancellationToken::new();
        let refresher = services.refresher().spawn(token.child_token());

        let app = Self::router(services);

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .with_context(|| format!("binding to {}:{}", config.host, config.port))?;
        let addr: SocketAddr = listener.local_addr().context("reading listen address")?;

        info!("relay listening on http://{}", addr);

        let shutdown_token = token.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                info!("shutdown signal received, draining connections...");
                shutdown_token.cancel();
            })
            .await
            .context("relay server failed")?;

        // server can also stop on its own, the refresher goes with it either way
        token.cancel();
        if let Err(e) = refresher.await {
            error!("background refresh task ended abnormally: {}", e);
        }

        info!("relay stopped");
        Ok(())
    }

    fn install_metrics() -> Option<PrometheusHandle> {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("metrics disabled, could not install recorder: {}", e);
                None
            }
        }
    }

    /// "*" allows anyone, otherwise a comma separated list of origins
    fn cors_layer(cors_origin: &str) -> CorsLayer {
        let base = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);

        if cors_origin.trim() == "*" {
            return base.allow_origin(Any);
        }

        let origins: Vec<HeaderValue> = cors_origin
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("ignoring invalid cors origin {:?}", o);
                    None
                }
            })
            .collect();

        base.allow_origin(AllowOrigin::list(origins))
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to listen for sigterm: {}", e);
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
