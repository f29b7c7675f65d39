//! OpenAPI documentation and schema generation
//!
//! Each process documents only the routes it serves:
//! - [`ProxyApiDoc`] - task submission and lookup
//! - [`RequesterApiDoc`] - health, metrics and the event stream

use utoipa::OpenApi;

/// OpenAPI documentation for the proxy
#[derive(OpenApi)]
#[openapi(
    info(
        title = "task-relay proxy API",
        version = "0.1.0",
        description = "Submit HTTP requests for asynchronous execution and poll their results",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server")
    ),
    paths(
        crate::api::routes::add_task,
        crate::api::routes::get_task,
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        crate::types::TaskId,
        crate::types::Headers,
        crate::types::NewTask,
        crate::types::TaskCreated,
        crate::types::TaskStatus,
        crate::types::TaskResult,
        crate::api::routes::HealthResponse,
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "tasks", description = "Task submission and result lookup"),
        (name = "system", description = "Health checks and the OpenAPI document"),
    )
)]
pub struct ProxyApiDoc;

/// OpenAPI documentation for the requester's monitoring endpoints
#[derive(OpenApi)]
#[openapi(
    info(
        title = "task-relay requester API",
        version = "0.1.0",
        description = "Monitoring surface of the task consumer",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:9090", description = "Local development server")
    ),
    paths(
        crate::api::routes::requester_health,
        crate::api::routes::requester_openapi_spec,
        crate::api::routes::metrics,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        crate::types::TaskId,
        crate::types::Event,
        crate::api::routes::HealthResponse,
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "requester", description = "Health, metrics and lifecycle events of the consumer"),
    )
)]
pub struct RequesterApiDoc;
