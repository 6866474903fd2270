//! Short-lived signed links for objects served by the API's `/media` route.
//!
//! A link token is an HS256 JWT whose subject is the storage key, so a token
//! minted for one object cannot be replayed against another.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::storage::StorageError;

/// Audience claim that separates link tokens from session tokens.
const LINK_AUDIENCE: &str = "media";

#[derive(Debug, Serialize, Deserialize)]
struct LinkClaims {
    sub: String,
    aud: String,
    exp: u64,
}

/// Mints and checks link tokens with one shared secret.
pub struct LinkSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl LinkSigner {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[LINK_AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "sub", "aud"]);
        validation.leeway = 5;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// A token granting read access to `key` for `ttl`.
    pub fn sign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let exp = SystemTime::now()
            .checked_add(ttl)
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.sign_until(key, exp)
    }

    fn sign_until(&self, key: &str, exp: u64) -> Result<String, StorageError> {
        let claims = LinkClaims {
            sub: key.to_string(),
            aud: LINK_AUDIENCE.to_string(),
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| StorageError::InvalidLink(e.to_string()))
    }

    /// Accept `token` only if it is unexpired and was minted for `key`.
    pub fn verify(&self, token: &str, key: &str) -> Result<(), StorageError> {
        let data = decode::<LinkClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| StorageError::InvalidLink(e.to_string()))?;
        if data.claims.sub != key {
            return Err(StorageError::InvalidLink(format!(
                "token was issued for '{}'",
                data.claims.sub
            )));
        }
        Ok(())
    }
}
