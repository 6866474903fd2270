//! Session tokens.
//!
//! Sessions are issued by the account service as HS256 JWTs whose subject is
//! the player's database id. This server verifies them with [`SessionKeys`],
//! built once at startup; [`SessionKeys::issue`] exists for tooling and
//! integration tests.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use kingz_core::types::DbId;
use serde::{Deserialize, Serialize};

/// Accepted clock skew between this server and the account service.
const CLOCK_SKEW_SECS: u64 = 30;

/// Default session lifetime in minutes.
const DEFAULT_ACCESS_EXPIRY_MINS: i64 = 60;

/// Payload of a session token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// The player's database id.
    pub sub: DbId,
    pub exp: i64,
    pub iat: i64,
}

/// Secret and lifetime of session tokens.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expiry_mins: i64,
}

impl JwtConfig {
    /// Load JWT configuration from environment variables.
    ///
    /// | Env Var                  | Required | Default |
    /// |--------------------------|----------|---------|
    /// | `JWT_SECRET`             | **yes**  | --      |
    /// | `JWT_ACCESS_EXPIRY_MINS` | no       | `60`    |
    ///
    /// # Panics
    ///
    /// Panics if `JWT_SECRET` is not set or is empty.
    pub fn from_env() -> Self {
        let secret =
            std::env::var("JWT_SECRET").expect("JWT_SECRET must be set in the environment");
        assert!(!secret.is_empty(), "JWT_SECRET must not be empty");

        let access_token_expiry_mins: i64 = std::env::var("JWT_ACCESS_EXPIRY_MINS")
            .unwrap_or_else(|_| DEFAULT_ACCESS_EXPIRY_MINS.to_string())
            .parse()
            .expect("JWT_ACCESS_EXPIRY_MINS must be a valid i64");

        Self {
            secret,
            access_token_expiry_mins,
        }
    }
}

/// Keys and validation rules for session tokens, derived once from
/// [`JwtConfig`] and shared through the app state.
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    lifetime_secs: i64,
}

impl SessionKeys {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation.leeway = CLOCK_SKEW_SECS;

        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            lifetime_secs: config.access_token_expiry_mins * 60,
        }
    }

    /// Mint a session token for `user_id`.
    pub fn issue(&self, user_id: DbId) -> Result<String, jsonwebtoken::errors::Error> {
        let now = chrono::Utc::now().timestamp();
        self.encode_claims(&Claims {
            sub: user_id,
            exp: now + self.lifetime_secs,
            iat: now,
        })
    }

    /// The claims of a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding, &self.validation).map(|data| data.claims)
    }

    fn encode_claims(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
    }
}
