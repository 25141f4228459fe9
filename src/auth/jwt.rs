//! JWT verification for authenticated profile updates.
//!
//! Tokens are issued by the upstream auth service; this service only
//! verifies them and matches the subject against the target user.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{LedgerError, Result};

/// Claims carried in an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID the token was issued for
    pub sub: String,

    /// Expiry as a unix timestamp
    pub exp: u64,
}

/// Verifies bearer tokens against the shared secret.
#[derive(Clone)]
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    /// Validator backed by the shared HMAC secret.
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Development-mode validator that accepts unsigned and expired tokens.
    pub fn new_dev() -> Self {
        warn!("JWT validation running in dev mode, signatures are not checked");
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        Self {
            decoding_key: DecodingKey::from_secret(&[]),
            validation,
        }
    }

    /// Decode and verify a token, returning its claims.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| LedgerError::Validation(format!("Invalid token: {}", e)))
    }
}

/// Pull the bearer token out of an Authorization header value.
pub fn extract_token_from_header(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
