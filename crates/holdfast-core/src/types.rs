use crate::error::{HoldfastError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// ActorId
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Regex> = OnceLock::new();
static KIND_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]{0,127}$").unwrap())
}

fn kind_re() -> &'static Regex {
    KIND_RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").unwrap())
}

/// Opaque actor name. Unique within one actor kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if !id_re().is_match(&id) {
            return Err(HoldfastError::Validation(format!(
                "invalid actor id '{id}': 1-128 chars of [A-Za-z0-9._-], starting alphanumeric"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ActorId {
    type Error = HoldfastError;
    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<ActorId> for String {
    fn from(id: ActorId) -> Self {
        id.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ActorKey
// ---------------------------------------------------------------------------

/// Full address of an actor: its kind tag plus its identity. Rendered `kind/id`.
///
/// Every piece of persisted data (state slots, rows, scheduled tasks, locks)
/// is scoped to exactly one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActorKey {
    kind: String,
    id: ActorId,
}

impl ActorKey {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let kind = kind.into();
        if !kind_re().is_match(&kind) {
            return Err(HoldfastError::Validation(format!(
                "invalid actor kind '{kind}': must be lowercase snake_case"
            )));
        }
        Ok(Self {
            kind,
            id: ActorId::new(id)?,
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }
}

impl fmt::Display for ActorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

impl std::str::FromStr for ActorKey {
    type Err = HoldfastError;
    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s.split_once('/').ok_or_else(|| {
            HoldfastError::Validation(format!("invalid actor key '{s}': expected kind/id"))
        })?;
        Self::new(kind, id)
    }
}

impl TryFrom<String> for ActorKey {
    type Error = HoldfastError;
    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ActorKey> for String {
    fn from(key: ActorKey) -> Self {
        key.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ids() {
        for id in ["a", "order-1", "Order_2.v3", "7"] {
            ActorId::new(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_ids() {
        let long = "x".repeat(129);
        for id in ["", "-leading", "has space", "slash/inside", long.as_str()] {
            assert!(
                matches!(ActorId::new(id), Err(HoldfastError::Validation(_))),
                "expected invalid: {id}"
            );
        }
    }

    #[test]
    fn key_display_and_parse_agree() {
        let key = ActorKey::new("approval", "order-1").unwrap();
        assert_eq!(key.to_string(), "approval/order-1");
        let parsed: ActorKey = "approval/order-1".parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn key_rejects_bad_kind() {
        assert!(ActorKey::new("Approval", "x").is_err());
        assert!("no-slash".parse::<ActorKey>().is_err());
    }

    #[test]
    fn key_serializes_as_string() {
        let key = ActorKey::new("retry", "job-9").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"retry/job-9\"");
        let back: ActorKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
