//! Intervention tokens. Signed, expiring capabilities for a human decision.
//!
//! Wire format:
//! ```text
//! base64url(claims JSON) "." base64url(HMAC-SHA256(secret, first segment))
//! ```
//!
//! The signing secret comes from `HOLDFAST_SIGNING_KEY` if set, otherwise from
//! `.holdfast/signing.key` (generated on first use).

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::Path;

use crate::error::{HoldfastError, Result};
use crate::types::ActorKey;
use crate::{io, paths};

type HmacSha256 = Hmac<Sha256>;

/// The only purpose tag this crate mints or accepts.
pub const INTERVENTION_PURPOSE: &str = "intervention";

const SECRET_LEN: usize = 32;
const NONCE_LEN: usize = 16;

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionClaims {
    pub actor: ActorKey,
    pub purpose: String,
    /// Unix seconds.
    pub issued_at: i64,
    /// Unix seconds; the token is invalid from this instant on.
    pub expires_at: i64,
    /// Random per-token value. A review session records the nonce of the
    /// token it handed out and accepts no other.
    pub nonce: String,
}

impl InterventionClaims {
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expires_at, 0)
    }
}

// ---------------------------------------------------------------------------
// TokenSigner
// ---------------------------------------------------------------------------

pub struct TokenSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Resolve the signing secret for a project root.
    ///
    /// Priority: `HOLDFAST_SIGNING_KEY` env var, then `.holdfast/signing.key`,
    /// then a freshly generated key written to that file.
    pub fn load_or_create(root: &Path) -> Result<Self> {
        if let Ok(key) = std::env::var(paths::SIGNING_KEY_ENV) {
            if !key.trim().is_empty() {
                return Ok(Self::new(key.trim().as_bytes().to_vec()));
            }
        }

        let path = paths::signing_key_path(root);
        let fresh = random_bytes(SECRET_LEN);
        if io::write_if_missing(&path, STANDARD.encode(&fresh).as_bytes())? {
            tracing::info!(path = %path.display(), "generated new signing key");
            return Ok(Self::new(fresh));
        }

        let encoded = std::fs::read_to_string(&path)?;
        let secret = STANDARD.decode(encoded.trim()).map_err(|e| {
            HoldfastError::Validation(format!("corrupt signing key {}: {e}", path.display()))
        })?;
        Ok(Self::new(secret))
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| HoldfastError::TokenInvalid(format!("signing key unusable: {e}")))
    }

    /// Mint a token bound to `actor`, valid for `ttl_seconds` from `now`.
    pub fn mint(
        &self,
        actor: &ActorKey,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<(String, InterventionClaims)> {
        let issued_at = now.timestamp();
        let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        let claims = InterventionClaims {
            actor: actor.clone(),
            purpose: INTERVENTION_PURPOSE.to_string(),
            issued_at,
            expires_at: issued_at.saturating_add(ttl),
            nonce: URL_SAFE_NO_PAD.encode(random_bytes(NONCE_LEN)),
        };
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok((format!("{body}.{sig}"), claims))
    }

    /// Verify signature, purpose, actor binding and expiry, in that order.
    pub fn verify(
        &self,
        token: &str,
        expected: &ActorKey,
        now: DateTime<Utc>,
    ) -> Result<InterventionClaims> {
        let (body, sig) = token
            .split_once('.')
            .ok_or_else(|| HoldfastError::TokenInvalid("malformed token".into()))?;
        let sig = URL_SAFE_NO_PAD
            .decode(sig)
            .map_err(|_| HoldfastError::TokenInvalid("malformed signature".into()))?;

        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        mac.verify_slice(&sig)
            .map_err(|_| HoldfastError::TokenInvalid("bad signature".into()))?;

        let raw = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| HoldfastError::TokenInvalid("malformed claims".into()))?;
        let claims: InterventionClaims = serde_json::from_slice(&raw)
            .map_err(|_| HoldfastError::TokenInvalid("malformed claims".into()))?;

        if claims.purpose != INTERVENTION_PURPOSE {
            return Err(HoldfastError::TokenInvalid(format!(
                "wrong purpose '{}'",
                claims.purpose
            )));
        }
        if &claims.actor != expected {
            return Err(HoldfastError::TokenInvalid(format!(
                "token is bound to '{}', not '{expected}'",
                claims.actor
            )));
        }
        if now.timestamp() >= claims.expires_at {
            return Err(HoldfastError::TokenInvalid("token expired".into()));
        }
        Ok(claims)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn signer() -> TokenSigner {
        TokenSigner::new(b"test-secret-test-secret".to_vec())
    }

    fn key(id: &str) -> ActorKey {
        ActorKey::new("approval", id).unwrap()
    }

    fn reason(err: HoldfastError) -> String {
        match err {
            HoldfastError::TokenInvalid(r) => r,
            other => panic!("expected TokenInvalid, got {other:?}"),
        }
    }

    #[test]
    fn minted_token_verifies_for_its_actor() {
        let now = Utc::now();
        let (token, claims) = signer().mint(&key("order-1"), 3600, now).unwrap();
        let verified = signer().verify(&token, &key("order-1"), now).unwrap();
        assert_eq!(verified, claims);
        assert_eq!(verified.purpose, INTERVENTION_PURPOSE);
    }

    #[test]
    fn each_token_gets_its_own_nonce() {
        let now = Utc::now();
        let (_, a) = signer().mint(&key("order-1"), 3600, now).unwrap();
        let (_, b) = signer().mint(&key("order-1"), 3600, now).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert!(!a.nonce.is_empty());
    }

    #[test]
    fn expired_token_rejected() {
        let now = Utc::now();
        let (token, _) = signer().mint(&key("order-1"), 3600, now).unwrap();
        let later = now + Duration::seconds(3600);
        assert!(reason(signer().verify(&token, &key("order-1"), later).unwrap_err())
            .contains("expired"));
    }

    #[test]
    fn token_for_other_actor_rejected() {
        let now = Utc::now();
        let (token, _) = signer().mint(&key("order-1"), 3600, now).unwrap();
        assert!(reason(signer().verify(&token, &key("order-2"), now).unwrap_err())
            .contains("bound to"));
    }

    #[test]
    fn tampered_claims_rejected() {
        let now = Utc::now();
        let (token, _) = signer().mint(&key("order-1"), 3600, now).unwrap();
        let (_, sig) = token.split_once('.').unwrap();
        let forged_claims = InterventionClaims {
            actor: key("order-1"),
            purpose: INTERVENTION_PURPOSE.into(),
            issued_at: now.timestamp(),
            expires_at: now.timestamp() + 999_999,
            nonce: "forged".into(),
        };
        let forged_body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        let forged = format!("{forged_body}.{sig}");
        assert!(reason(signer().verify(&forged, &key("order-1"), now).unwrap_err())
            .contains("signature"));
    }

    #[test]
    fn other_secret_rejected() {
        let now = Utc::now();
        let (token, _) = signer().mint(&key("order-1"), 3600, now).unwrap();
        let other = TokenSigner::new(b"another-secret".to_vec());
        assert!(other.verify(&token, &key("order-1"), now).is_err());
    }

    #[test]
    fn wrong_purpose_rejected() {
        let now = Utc::now();
        let s = signer();
        let claims = InterventionClaims {
            actor: key("order-1"),
            purpose: "login".into(),
            issued_at: now.timestamp(),
            expires_at: now.timestamp() + 60,
            nonce: "n".into(),
        };
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let mut mac = s.mac().unwrap();
        mac.update(body.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        let token = format!("{body}.{sig}");
        assert!(reason(s.verify(&token, &key("order-1"), now).unwrap_err()).contains("purpose"));
    }

    #[test]
    fn garbage_rejected() {
        for token in ["", "no-dot", "a.b", "..."] {
            assert!(signer().verify(token, &key("x"), Utc::now()).is_err());
        }
    }

    #[test]
    fn load_or_create_persists_generated_key() {
        let dir = TempDir::new().unwrap();
        if std::env::var(paths::SIGNING_KEY_ENV).is_ok() {
            return;
        }
        let first = TokenSigner::load_or_create(dir.path()).unwrap();
        assert!(paths::signing_key_path(dir.path()).exists());
        let second = TokenSigner::load_or_create(dir.path()).unwrap();

        let now = Utc::now();
        let (token, _) = first.mint(&key("a"), 60, now).unwrap();
        second.verify(&token, &key("a"), now).unwrap();
    }

    #[test]
    fn load_or_create_keeps_existing_key_file() {
        if std::env::var(paths::SIGNING_KEY_ENV).is_ok() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let path = paths::signing_key_path(dir.path());
        let encoded = STANDARD.encode(b"existing-secret");
        io::atomic_write(&path, encoded.as_bytes()).unwrap();

        let loaded = TokenSigner::load_or_create(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), encoded);

        let now = Utc::now();
        let (token, _) = TokenSigner::new(b"existing-secret".to_vec())
            .mint(&key("a"), 60, now)
            .unwrap();
        loaded.verify(&token, &key("a"), now).unwrap();
    }
}
