//! HS256 session-token encoding and verification.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token encoding failed: {0}")]
    Encode(String),

    #[error("token decoding failed: {0}")]
    Decode(String),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),
}

/// Verifies a bearer token into claims.
///
/// A trait so the HTTP layer can be exercised with alternative validators in
/// tests without touching key material.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenError>;
}

/// Symmetric HS256 codec for session tokens.
pub struct Hs256TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Hs256TokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Issue a signed token for the given claims.
    pub fn issue(&self, claims: &JwtClaims) -> Result<String, TokenError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }
}

impl TokenValidator for Hs256TokenCodec {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenError> {
        // Claims carry RFC3339 timestamps rather than numeric exp/iat, so the
        // library's registered-claim checks are disabled and the time window
        // is validated explicitly below.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.decoding, &validation)
            .map_err(|e| TokenError::Decode(e.to_string()))?;

        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}
