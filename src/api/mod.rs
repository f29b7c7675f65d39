//! HTTP surfaces
//!
//! The proxy serves the task API; the requester serves a small monitoring
//! API (health, metrics, server-sent events). Both share the CORS, tracing
//! and OpenAPI plumbing defined here.

use crate::config::ApiConfig;
use crate::db::Database;
use crate::requester::RequesterService;
use crate::submitter::ProxyService;
use crate::{Error, Result};
use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error_response;
pub mod openapi;
pub mod request_id;
pub mod routes;
pub mod state;

pub use openapi::{ProxyApiDoc, RequesterApiDoc};
pub use state::{ProxyState, RequesterState};

/// Create the proxy router
///
/// # Routes
///
/// - `POST /api/v1/tasks` - Submit a task
/// - `GET /api/v1/tasks/:id` - Task record
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Swagger UI (if enabled)
pub fn create_proxy_router(service: Arc<ProxyService>, config: &ApiConfig) -> Router {
    let router = Router::new()
        .route("/api/v1/tasks", post(routes::add_task))
        .route("/api/v1/tasks/:id", get(routes::get_task))
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec));

    // Swagger UI gets its own document path so it never shadows /openapi.json
    let router = if config.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ProxyApiDoc::openapi()))
    } else {
        router
    };

    let router = router
        .with_state(ProxyState::new(service))
        .layer(middleware::from_fn(request_id::assign_request_id));

    finish(router, config)
}

/// Create the requester's monitoring router
///
/// # Routes
///
/// - `GET /health` - 200 while accepting tasks, 503 once shutting down
/// - `GET /metrics` - Prometheus metrics
/// - `GET /events` - Server-sent events stream
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Swagger UI (if enabled)
pub fn create_requester_router(
    service: Arc<RequesterService>,
    db: Database,
    config: &ApiConfig,
) -> Router {
    let router = Router::new()
        .route("/health", get(routes::requester_health))
        .route("/metrics", get(routes::metrics))
        .route("/events", get(routes::event_stream))
        .route("/openapi.json", get(routes::requester_openapi_spec));

    let router = if config.swagger_ui {
        router.merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", RequesterApiDoc::openapi()),
        )
    } else {
        router
    };

    finish(router.with_state(RequesterState::new(service, db)), config)
}

/// Apply the layers shared by both routers
fn finish(router: Router, config: &ApiConfig) -> Router {
    let router = router.layer(TraceLayer::new_for_http());

    if config.cors_enabled {
        router.layer(build_cors_layer(&config.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` (or an empty list) allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Bind `address` for one of the routers
pub async fn bind(address: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(address).await.map_err(|e| {
        Error::ApiServerError(format!("failed to bind {}: {}", address, e))
    })
}

/// Serve `router` on `listener` until `shutdown` is cancelled
///
/// In-flight requests are allowed to finish once shutdown starts.
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) -> Result<()> {
    let address = listener.local_addr().map_err(Error::Io)?;
    tracing::info!(address = %address, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| Error::ApiServerError(e.to_string()))?;

    tracing::info!(address = %address, "API server stopped");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
