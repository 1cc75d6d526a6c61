//! Token validation
//!
//! Authentication is delegated to a collaborator behind the `TokenValidator`
//! trait: the connection handler only learns "valid as principal X" or
//! "invalid". The default implementation checks HS256 JWTs signed with the
//! secret from configuration. Token issuance happens elsewhere (the HTTP
//! login endpoint of the dashboard); this subsystem only verifies.

use jsonwebtoken::{DecodingKey, Validation, decode};

use crate::transport::message::Claims;

/// Outcome of a failed validation. Not fatal for the connection: most
/// read-only topics do not require authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthError(pub String);

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "authentication failed: {}", self.0)
    }
}

impl std::error::Error for AuthError {}

/// Validates a bearer token, returning the principal identifier on success.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<String, AuthError>;
}

/// HS256 JWT validator keyed by the configured shared secret.
pub struct JwtValidator {
    secret: String,
}

impl JwtValidator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<String, AuthError> {
        let validation = Validation::default();
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_ref()),
            &validation,
        )
        .map(|data| data.claims.sub)
        .map_err(|e| AuthError(e.to_string()))
    }
}
