//! JWT minting and verification
//!
//! Tokens are HS256-signed with the single process-wide secret. The claims
//! shape is shared between the issuer (login, refresh) and the verifier.

use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::Role;
use crate::types::HealthdeskError;

/// Literal scheme prefix of the Authorization header, including the space
pub const BEARER_PREFIX: &str = "Bearer ";

/// Decoded, verified token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Primary key of the user record
    #[serde(rename = "sub")]
    pub subject_id: String,
    pub email: String,
    pub role: Role,
    /// Seconds since the Unix epoch
    #[serde(rename = "iat")]
    pub issued_at: u64,
    /// Seconds since the Unix epoch
    #[serde(rename = "exp")]
    pub expires_at: u64,
}

/// What the issuer needs to know about the principal
#[derive(Debug, Clone)]
pub struct TokenInput {
    pub subject_id: String,
    pub email: String,
    pub role: Role,
}

/// Why a token failed verification
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// Signs and verifies tokens with one symmetric key
#[derive(Clone)]
pub struct JwtValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    expiry_seconds: u64,
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator")
            .field("expiry_seconds", &self.expiry_seconds)
            .finish_non_exhaustive()
    }
}

impl JwtValidator {
    pub fn new(secret: &str, expiry_seconds: u64) -> Result<Self, HealthdeskError> {
        if secret.is_empty() {
            return Err(HealthdeskError::Config("JWT secret must not be empty".into()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            expiry_seconds,
        })
    }

    pub fn expiry_seconds(&self) -> u64 {
        self.expiry_seconds
    }

    /// Mint a token valid from now for the configured window
    pub fn generate_token(&self, input: TokenInput) -> Result<String, HealthdeskError> {
        self.generate_token_at(input, unix_now())
    }

    /// Mint a token as if the current time were `now`
    pub fn generate_token_at(&self, input: TokenInput, now: u64) -> Result<String, HealthdeskError> {
        let claims = Claims {
            subject_id: input.subject_id,
            email: input.email,
            role: input.role,
            issued_at: now,
            expires_at: now.saturating_add(self.expiry_seconds),
        };
        self.sign(&claims)
    }

    /// Sign an explicit claims set
    pub fn sign(&self, claims: &Claims) -> Result<String, HealthdeskError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| HealthdeskError::Auth(format!("Failed to sign token: {e}")))
    }

    /// Verify signature, expiry and claim shape
    pub fn verify_token(&self, token: &str) -> Result<Claims, TokenError> {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => Err(TokenError::Expired),
            Err(e) => Err(TokenError::Invalid(e)),
        }
    }
}

/// Extract the token from an Authorization header value.
///
/// The scheme is matched case-sensitively with exactly one space.
pub fn extract_token_from_header(header: Option<&str>) -> Option<&str> {
    header.and_then(|h| h.strip_prefix(BEARER_PREFIX))
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
