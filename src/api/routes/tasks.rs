//! Task submission and lookup handlers

use crate::api::ProxyState;
use crate::error::{ApiError, Error};
use crate::submitter::RequestContext;
use crate::types::{NewTask, TaskCreated, TaskId, TaskResult};
use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};

/// POST /api/v1/tasks - Submit a task
#[utoipa::path(
    post,
    path = "/api/v1/tasks",
    tag = "tasks",
    request_body = NewTask,
    responses(
        (status = 201, description = "Task persisted and queued", body = TaskCreated),
        (status = 400, description = "Invalid url, method, header or body", body = ApiError),
        (status = 500, description = "Store failure", body = ApiError),
        (status = 502, description = "Queue failure", body = ApiError)
    )
)]
pub async fn add_task(
    State(state): State<ProxyState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<NewTask>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskCreated>), Error> {
    let Json(new_task) = payload.map_err(|e| Error::Validation(e.body_text()))?;

    let id = state.service.add_task(&ctx, new_task).await?;
    Ok((StatusCode::CREATED, Json(TaskCreated { id })))
}

/// GET /api/v1/tasks/:id - Current record of a task
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{id}",
    tag = "tasks",
    params(
        ("id" = String, Path, description = "Task ID returned on submission")
    ),
    responses(
        (status = 200, description = "Task record", body = TaskResult),
        (status = 400, description = "Malformed task ID", body = ApiError),
        (status = 404, description = "Unknown task", body = ApiError)
    )
)]
pub async fn get_task(
    State(state): State<ProxyState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<TaskResult>, Error> {
    let id: TaskId = id
        .parse()
        .map_err(|_| Error::Validation(format!("invalid task id '{id}'")))?;

    let info = state.service.get_task_info(&ctx, id).await?;
    Ok(Json(info))
}
