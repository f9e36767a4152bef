use axum::extract::{Path, Query, State};
use axum::Json;
use holdfast_core::HoldfastError;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InterveneQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// POST /api/intervene/{kind}/{id}?token=…: out-of-band review command.
///
/// The body is a gate command (`{"type": "proceed"}`, `{"type": "override",
/// "data": …}` or `{"type": "abort"}`). Returns the resulting review session.
pub async fn intervene(
    State(app): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    Query(query): Query<InterveneQuery>,
    Json(command): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| HoldfastError::TokenInvalid("missing token".into()))?;

    let host = app.host.clone();
    let review = tokio::task::spawn_blocking(move || {
        let key = host.actor_key(&kind, &id)?;
        host.intervene(&key, &token, command)?;
        Ok::<_, HoldfastError>(host.status(&key)?.review)
    })
    .await
    .map_err(AppError::join)??;

    Ok(Json(serde_json::json!({ "review": review })))
}
