//! Provider authentication tokens for the APNs HTTP/2 API.
//!
//! A provider token is a JWT signed with ES256:
//!
//! ```text
//! base64url({"alg":"ES256","kid":<key id>})
//!   . base64url({"iss":<team id>,"iat":<unix seconds>})
//!   . base64url(r || s)      ECDSA P-256 over SHA-256 of the first two parts
//! ```
//!
//! The signing key is Apple's `.p8` file (PKCS#8 PEM). Minted tokens are
//! reused for [`JWT_REFRESH_INTERVAL`] before a fresh one is signed.

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use p256::ecdsa::{signature::DigestSigner, Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::constants::JWT_REFRESH_INTERVAL;
use crate::error::{DispatchError, Result};

#[derive(Serialize)]
struct Header<'a> {
    alg: &'a str,
    kid: &'a str,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    iat: i64,
}

struct CachedToken {
    jwt: String,
    minted_at: Instant,
}

/// Signs and caches provider tokens.
pub struct ProviderTokenSigner {
    signing_key: SigningKey,
    key_id: String,
    team_id: String,
    cached: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for ProviderTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTokenSigner")
            .field("key_id", &self.key_id)
            .field("team_id", &self.team_id)
            .finish_non_exhaustive()
    }
}

impl ProviderTokenSigner {
    /// Wrap an already-parsed key.
    pub fn new(signing_key: SigningKey, key_id: impl Into<String>, team_id: impl Into<String>) -> Self {
        Self {
            signing_key,
            key_id: key_id.into(),
            team_id: team_id.into(),
            cached: Mutex::new(None),
        }
    }

    /// Load the `.p8` key at `path`.
    ///
    /// A missing, unreadable or non-P-256 key is a configuration error.
    pub fn from_pem_file(path: &Path, key_id: impl Into<String>, team_id: impl Into<String>) -> Result<Self> {
        let invalid = |reason: String| DispatchError::InvalidSigningKey {
            path: path.to_path_buf(),
            reason,
        };

        let pem = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        if pem.trim().is_empty() {
            return Err(invalid("file is empty".into()));
        }
        let signing_key = SigningKey::from_pkcs8_pem(&pem).map_err(|e| invalid(e.to_string()))?;

        Ok(Self::new(signing_key, key_id, team_id))
    }

    /// Sign a token issued at `issued_at` (unix seconds).
    pub fn mint(&self, issued_at: i64) -> String {
        let header = Header {
            alg: "ES256",
            kid: &self.key_id,
        };
        let claims = Claims {
            iss: &self.team_id,
            iat: issued_at,
        };

        let signing_input = format!("{}.{}", encode_json(&header), encode_json(&claims));
        let signature: Signature = self
            .signing_key
            .sign_digest(Sha256::new_with_prefix(signing_input.as_bytes()));

        format!("{signing_input}.{}", BASE64URL.encode(signature.to_bytes()))
    }

    /// The current token, re-signing when the cached one is too old.
    pub fn current(&self) -> String {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = cached.as_ref() {
            if token.minted_at.elapsed() < JWT_REFRESH_INTERVAL {
                return token.jwt.clone();
            }
        }

        let jwt = self.mint(chrono::Utc::now().timestamp());
        log::debug!("[ApnsHttp] Minted provider token for key {}", self.key_id);
        *cached = Some(CachedToken {
            jwt: jwt.clone(),
            minted_at: Instant::now(),
        });
        jwt
    }

    /// Drop the cached token so the next call signs a fresh one.
    pub fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

fn encode_json<T: Serialize>(value: &T) -> String {
    // Serializing these plain structs cannot fail.
    BASE64URL.encode(serde_json::to_vec(value).unwrap_or_default())
}
