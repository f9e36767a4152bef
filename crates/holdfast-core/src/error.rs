use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum HoldfastError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("actor '{actor}' is locked: {message}")]
    InstanceLocked { actor: String, message: String },

    #[error("actor '{actor}' already has an outstanding task: {task_id}")]
    Conflict { actor: String, task_id: Uuid },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("task '{method}' on actor '{actor}' aborted at attempt {attempt_count}")]
    TaskAborted {
        actor: String,
        method: String,
        attempt_count: u32,
    },

    #[error("intervention token rejected: {0}")]
    TokenInvalid(String),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("unknown actor kind: {0}")]
    UnknownActorKind(String),

    #[error("actor kind '{kind}' has no method '{method}'")]
    UnknownMethod { kind: String, method: String },

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HoldfastError {
    /// Stable snake_case tag, used in API responses and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InstanceLocked { .. } => "instance_locked",
            Self::Conflict { .. } => "conflict",
            Self::NotFound(_) => "not_found",
            Self::TaskAborted { .. } => "task_aborted",
            Self::TokenInvalid(_) => "token_invalid",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::UnknownActorKind(_) => "unknown_actor_kind",
            Self::UnknownMethod { .. } => "unknown_method",
            Self::Store(_) => "store_error",
            Self::Io(_) => "io_error",
            Self::Yaml(_) => "yaml_error",
            Self::Json(_) => "json_error",
        }
    }

    /// The actor identity the error is about, where there is one.
    pub fn actor(&self) -> Option<&str> {
        match self {
            Self::InstanceLocked { actor, .. }
            | Self::Conflict { actor, .. }
            | Self::TaskAborted { actor, .. } => Some(actor),
            _ => None,
        }
    }

    pub(crate) fn store<E: std::fmt::Display>(err: E) -> Self {
        Self::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HoldfastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_error_carries_actor_and_message() {
        let err = HoldfastError::InstanceLocked {
            actor: "approval/order-1".into(),
            message: "migration failed".into(),
        };
        assert_eq!(err.kind(), "instance_locked");
        assert_eq!(err.actor(), Some("approval/order-1"));
        assert!(err.to_string().contains("migration failed"));
    }

    #[test]
    fn validation_has_no_actor() {
        let err = HoldfastError::Validation("bad id".into());
        assert_eq!(err.actor(), None);
        assert_eq!(err.kind(), "validation_error");
    }
}
