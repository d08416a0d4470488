use axum::Extension;
use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use crate::logger::Logger;
use crate::server::dtos::health_dto::{HealthResponse, HealthStatus, ServiceHealthDetails};
use crate::server::services::RelayServices;
use crate::server::{get_app_version, get_uptime_seconds};

/// no outbound checks here, the origin being down is normal and shouldn't fail the probe
pub async fn health_endpoint(
    Extension(services): Extension<RelayServices>,
) -> (StatusCode, Json<HealthResponse>) {
    let channels = services.channels.channels().len();

    let status = if channels == 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    let response = HealthResponse {
        status,
        timestamp: Utc::now(),
        uptime_seconds: get_uptime_seconds(),
        version: get_app_version().to_string(),
        environment: Logger::environment_name(services.config.cargo_env).to_string(),
        services: ServiceHealthDetails {
            channels,
            cache: services.cache.snapshot(),
        },
    };

    (StatusCode::OK, Json(response))
}

/// prometheus text format, 404 when the recorder wasn't installed
pub async fn metrics_endpoint(Extension(services): Extension<RelayServices>) -> Response {
    match &services.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
