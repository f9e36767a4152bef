use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;

use crate::error::AppError;
use crate::state::AppState;

fn parse_body(body: &Bytes) -> Result<Value, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::bad_request(format!("request body is not valid JSON: {e}")))
}

/// POST /api/actors/{kind}/{id}/call/{method}: dispatch a call to an actor.
///
/// An empty body is treated as `{}`.
pub async fn call_actor(
    State(app): State<AppState>,
    Path((kind, id, method)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let payload = parse_body(&body)?;
    let host = app.host.clone();
    let result = tokio::task::spawn_blocking(move || {
        let key = host.actor_key(&kind, &id)?;
        host.call(&key, &method, payload)
    })
    .await
    .map_err(AppError::join)??;

    Ok(Json(result))
}

/// GET /api/actors/{kind}/{id}: inspection snapshot, readable even when locked.
pub async fn get_actor(
    State(app): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let host = app.host.clone();
    let status = tokio::task::spawn_blocking(move || {
        let key = host.actor_key(&kind, &id)?;
        host.status(&key)
    })
    .await
    .map_err(AppError::join)??;

    Ok(Json(serde_json::to_value(status)?))
}
