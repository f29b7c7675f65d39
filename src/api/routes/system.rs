//! System endpoints: health, OpenAPI, metrics, events

use super::HealthResponse;
use crate::api::RequesterState;
use crate::error::Error;
use crate::metrics::CONTENT_TYPE;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// GET /health - Proxy health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::new("ok"))
}

/// GET /openapi.json - Proxy OpenAPI specification
#[utoipa::path(
    get,
    path = "/openapi.json",
    tag = "system",
    responses(
        (status = 200, description = "OpenAPI specification in JSON format")
    )
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ProxyApiDoc;
    use utoipa::OpenApi;

    Json(ProxyApiDoc::openapi())
}

/// GET /health - Requester health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "requester",
    responses(
        (status = 200, description = "Accepting tasks", body = HealthResponse),
        (status = 503, description = "Shutting down", body = HealthResponse)
    )
)]
pub async fn requester_health(State(state): State<RequesterState>) -> impl IntoResponse {
    if state.service.pool().is_accepting() {
        (StatusCode::OK, Json(HealthResponse::new("ok")))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse::new("shutting_down")),
        )
    }
}

/// GET /openapi.json - Requester OpenAPI specification
#[utoipa::path(
    get,
    path = "/openapi.json",
    tag = "requester",
    responses(
        (status = 200, description = "OpenAPI specification in JSON format")
    )
)]
pub async fn requester_openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::RequesterApiDoc;
    use utoipa::OpenApi;

    Json(RequesterApiDoc::openapi())
}

/// GET /metrics - Prometheus scrape endpoint
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "requester",
    responses(
        (status = 200, description = "Requester metrics in the Prometheus text format", body = String, content_type = "text/plain"),
        (status = 500, description = "Store or encoder failure", body = crate::error::ApiError)
    )
)]
pub async fn metrics(State(state): State<RequesterState>) -> Result<impl IntoResponse, Error> {
    let stored = state.db.count_by_status().await?;
    let text = state.service.render_metrics(&stored)?;

    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE)], text))
}

/// GET /events - Server-sent events stream
#[utoipa::path(
    get,
    path = "/events",
    tag = "requester",
    responses(
        (status = 200, description = "Server-sent events stream (text/event-stream)", content_type = "text/event-stream")
    )
)]
pub async fn event_stream(
    State(state): State<RequesterState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = BroadcastStream::new(state.service.subscribe());

    let sse_stream = stream.filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json_data) => Some(Ok(SseEvent::default()
                .event(event.event_type())
                .data(json_data))),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize event to JSON");
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "SSE client lagged");
            Some(Ok(SseEvent::default().event("error").data(format!(
                r#"{{"error":"lagged","skipped":{}}}"#,
                skipped
            ))))
        }
    });

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}
