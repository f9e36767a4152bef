use holdfast_core::{ActorHost, HoldfastError};
use serde_json::Value;
use std::path::Path;

use crate::output::print_json;

/// Results are always printed as JSON; they are whatever the actor returned.
pub fn run(
    root: &Path,
    kind: &str,
    id: &str,
    method: &str,
    payload: Option<&str>,
) -> anyhow::Result<()> {
    let payload: Value = match payload {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| HoldfastError::Validation(format!("--payload is not valid JSON: {e}")))?,
        None => Value::Object(Default::default()),
    };

    let host = ActorHost::open(root)?;
    let key = host.actor_key(kind, id)?;
    let result = host.call(&key, method, payload)?;
    print_json(&result)
}
