//! Task intake and polling endpoints.

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::common::TaskId;
use crate::domains::tasks::activities::{create_task, CreateTaskError, NewTask};
use crate::domains::tasks::{Task, TaskStoreError};
use crate::server::app::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub message: &'static str,
    pub task: Task,
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub task: Task,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTasksParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ListTasksResponse {
    pub tasks: Vec<Task>,
    pub pagination: Pagination,
}

/// JSON error body: `{"error": "...", "message": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    message: Option<String>,
}

impl ApiError {
    fn bad_request(error: impl ToString) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: error.to_string(),
            message: None,
        }
    }

    fn internal(error: &str, cause: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: error.to_string(),
            message: Some(cause.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({ "error": self.error });
        if let Some(message) = self.message {
            body["message"] = serde_json::Value::String(message);
        }
        (self.status, Json(body)).into_response()
    }
}

/// POST /api/tasks
pub async fn create_task_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ApiError> {
    let new_task = NewTask::validate(
        request.url.as_deref().unwrap_or_default(),
        request.question.as_deref().unwrap_or_default(),
    )
    .map_err(ApiError::bad_request)?;

    let task = create_task(new_task, &state.deps).await.map_err(|e| match e {
        CreateTaskError::Validation(v) => ApiError::bad_request(v),
        other => {
            error!(error = %other, "failed to create task");
            ApiError::internal("Failed to create task", other)
        }
    })?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTaskResponse {
            message: "Task created successfully",
            task,
        }),
    ))
}

/// GET /api/tasks/:id
pub async fn get_task_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let id: TaskId = id
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid task ID"))?;

    match state.deps.tasks.get(id).await {
        Ok(task) => Ok(Json(TaskResponse { task })),
        Err(TaskStoreError::NotFound(_)) => Err(ApiError {
            status: StatusCode::NOT_FOUND,
            error: "Task not found".to_string(),
            message: None,
        }),
        Err(e) => {
            error!(task_id = %id, error = %e, "failed to fetch task");
            Err(ApiError::internal("Failed to fetch task", e))
        }
    }
}

/// GET /api/tasks?limit=&offset=
pub async fn list_tasks_handler(
    Extension(state): Extension<AppState>,
    Query(params): Query<ListTasksParams>,
) -> Result<Json<ListTasksResponse>, ApiError> {
    let limit = match params.limit {
        Some(limit) if limit > 0 => limit.min(MAX_PAGE_SIZE),
        _ => DEFAULT_PAGE_SIZE,
    };
    let offset = params.offset.unwrap_or(0).max(0);

    let tasks = state.deps.tasks.list(limit, offset).await.map_err(|e| {
        error!(error = %e, "failed to list tasks");
        ApiError::internal("Failed to fetch tasks", e)
    })?;

    Ok(Json(ListTasksResponse {
        pagination: Pagination {
            limit,
            offset,
            total: tasks.len(),
        },
        tasks,
    }))
}
