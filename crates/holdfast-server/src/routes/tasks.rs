use axum::extract::{Query, State};
use axum::Json;
use holdfast_core::types::ActorKey;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TasksQuery {
    /// `kind/id`; all tasks when absent.
    #[serde(default)]
    pub actor: Option<String>,
}

/// GET /api/tasks: scheduled tasks, newest first.
pub async fn list_tasks(
    State(app): State<AppState>,
    Query(query): Query<TasksQuery>,
) -> Result<Json<Value>, AppError> {
    let actor = query
        .actor
        .as_deref()
        .map(str::parse::<ActorKey>)
        .transpose()?;

    let host = app.host.clone();
    let tasks = tokio::task::spawn_blocking(move || match actor {
        Some(key) => host.tasks().list_for_actor(&key),
        None => host.tasks().list_all(),
    })
    .await
    .map_err(AppError::join)??;

    Ok(Json(serde_json::json!({ "tasks": tasks })))
}
