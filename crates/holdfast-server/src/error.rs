use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use holdfast_core::HoldfastError;

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
///
/// Body shape: `{"error": "...", "kind": "...", "actor": "kind/id"?}`.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(HoldfastError::Validation(msg.into()).into())
    }

    pub(crate) fn join(err: tokio::task::JoinError) -> Self {
        Self(anyhow::anyhow!("task join error: {err}"))
    }
}

fn status_for(err: &HoldfastError) -> StatusCode {
    match err {
        HoldfastError::Validation(_) | HoldfastError::UnknownMethod { .. } => {
            StatusCode::BAD_REQUEST
        }
        HoldfastError::TokenInvalid(_) => StatusCode::UNAUTHORIZED,
        HoldfastError::NotFound(_) | HoldfastError::UnknownActorKind(_) => StatusCode::NOT_FOUND,
        HoldfastError::Conflict { .. } | HoldfastError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        HoldfastError::InstanceLocked { .. } => StatusCode::LOCKED,
        HoldfastError::TaskAborted { .. }
        | HoldfastError::Store(_)
        | HoldfastError::Io(_)
        | HoldfastError::Yaml(_)
        | HoldfastError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self.0.downcast_ref::<HoldfastError>() {
            Some(e) => {
                let mut body = serde_json::json!({
                    "error": e.to_string(),
                    "kind": e.kind(),
                });
                if let Some(actor) = e.actor() {
                    body["actor"] = actor.into();
                }
                (status_for(e), body)
            }
            None => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": format!("{:#}", self.0), "kind": "internal" }),
            ),
        };
        if status.is_server_error() {
            tracing::error!(error = %format!("{:#}", self.0), "request failed");
        }
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
