//! Request authorizer
//!
//! `authenticate` turns an Authorization header into verified [`Claims`];
//! `authorize` checks the claimed role against an allowed set. Both are pure
//! and never log token contents.

use hyper::header::AUTHORIZATION;
use hyper::{HeaderMap, StatusCode};
use tracing::debug;

use crate::auth::jwt::{extract_token_from_header, Claims, JwtValidator, TokenError, TokenInput};
use crate::auth::policy::Access;
use crate::auth::Role;
use crate::types::HealthdeskError;

/// Terminal authentication/authorization failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Missing or malformed Authorization header
    #[error("Authentication required")]
    Unauthenticated,
    /// Bad signature, malformed or expired token
    #[error("Invalid or expired token")]
    InvalidToken,
    /// Valid principal, insufficient role
    #[error("Insufficient permissions")]
    Forbidden,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Unauthenticated | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Unauthenticated => "UNAUTHENTICATED",
            AuthError::InvalidToken => "INVALID_TOKEN",
            AuthError::Forbidden => "FORBIDDEN",
        }
    }
}

/// Verifies bearer tokens and role membership.
///
/// Holds the only copy of the signing key; it is immutable after construction
/// and shared by every in-flight request.
#[derive(Debug, Clone)]
pub struct Authorizer {
    jwt: JwtValidator,
}

impl Authorizer {
    pub fn new(secret: &str, expiry_seconds: u64) -> Result<Self, HealthdeskError> {
        Ok(Self {
            jwt: JwtValidator::new(secret, expiry_seconds)?,
        })
    }

    pub fn jwt(&self) -> &JwtValidator {
        &self.jwt
    }

    /// Mint a token for a principal, used at login and refresh
    pub fn issue(&self, input: TokenInput) -> Result<String, HealthdeskError> {
        self.jwt.generate_token(input)
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Claims, AuthError> {
        let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let token = extract_token_from_header(header).ok_or(AuthError::Unauthenticated)?;

        self.jwt.verify_token(token).map_err(|e| {
            match &e {
                TokenError::Expired => debug!("Rejected expired token"),
                TokenError::Invalid(inner) => debug!(kind = ?inner.kind(), "Rejected invalid token"),
            }
            AuthError::InvalidToken
        })
    }

    /// An empty allow-list admits any authenticated principal
    pub fn authorize(&self, claims: &Claims, allowed_roles: &[Role]) -> Result<(), AuthError> {
        if allowed_roles.is_empty() || allowed_roles.contains(&claims.role) {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }

    /// Apply an access requirement to a request's headers.
    ///
    /// Public operations are not authenticated at all and yield `None`.
    pub fn gate(&self, headers: &HeaderMap, access: Access) -> Result<Option<Claims>, AuthError> {
        let allowed: &[Role] = match access {
            Access::Public => return Ok(None),
            Access::Authenticated => &[],
            Access::Roles(roles) => roles,
        };

        let claims = self.authenticate(headers)?;
        self.authorize(&claims, allowed)?;
        Ok(Some(claims))
    }
}
