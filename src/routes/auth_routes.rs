//! HTTP routes for authentication
//!
//! - POST /api/auth/login   - Verify credentials and mint a token
//! - GET  /api/auth/me      - Return the verified claims
//! - POST /api/auth/refresh - Reissue a token for a still-active account

use bson::{doc, oid::ObjectId, DateTime};
use bytes::Bytes;
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::auth::jwt::unix_now;
use crate::auth::{verify_password, AuthError, Claims, Role, TokenInput};
use crate::db::schemas::{render_record, UserDoc, USER_COLLECTION};
use crate::logging::{AuditEvent, EventType};
use crate::routes::{json_response, parse_json, ApiError, ApiResult, RequestContext};
use crate::server::AppState;
use crate::types::HealthdeskError;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    /// Unix seconds
    pub expires_at: u64,
    pub user: Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub issued_at: u64,
    pub expires_at: u64,
}

impl From<Claims> for MeResponse {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.subject_id,
            email: claims.email,
            role: claims.role,
            issued_at: claims.issued_at,
            expires_at: claims.expires_at,
        }
    }
}

fn invalid_credentials() -> ApiError {
    ApiError::new(
        StatusCode::UNAUTHORIZED,
        "INVALID_CREDENTIALS",
        "Invalid email or password",
    )
}

/// Mint a token for a stored user and build the response body
fn auth_response(state: &AppState, user: &UserDoc, record: &bson::Document) -> ApiResult {
    let now = unix_now();
    let token = state.authorizer.jwt().generate_token_at(
        TokenInput {
            subject_id: user.id_hex(),
            email: user.email.clone(),
            role: user.role,
        },
        now,
    )?;

    Ok(json_response(
        StatusCode::OK,
        &AuthResponse {
            token,
            expires_at: now.saturating_add(state.authorizer.jwt().expiry_seconds()),
            user: render_record(record),
        },
    ))
}

/// POST /api/auth/login
///
/// Unknown email, inactive account and wrong password all produce the same
/// response so accounts cannot be enumerated.
pub async fn handle_login(state: &AppState, ctx: &RequestContext, body: &Bytes) -> ApiResult {
    let body: LoginRequest = parse_json(body)?;
    let email = body.email.trim().to_lowercase();

    if email.is_empty() || body.password.is_empty() {
        return Err(ApiError::bad_request("Missing required fields: email, password"));
    }

    let fail = |reason: &str| {
        warn!(reason, "Login failed");
        AuditEvent::new(EventType::LoginFailed)
            .with_request_id(ctx.request_id.clone())
            .with_email(email.clone())
            .with_operation("auth.login")
            .with_status(StatusCode::UNAUTHORIZED.as_u16())
    };

    let Some(mut record) = state
        .store
        .find_one(USER_COLLECTION, doc! { "email": &email })
        .await?
    else {
        state.audit.log(fail("unknown email")).await;
        return Err(invalid_credentials());
    };

    let user = UserDoc::from_document(record.clone())?;
    if !user.is_active {
        state.audit.log(fail("inactive account")).await;
        return Err(invalid_credentials());
    }

    if !verify_password(&body.password, &user.password_hash)? {
        state.audit.log(fail("wrong password")).await;
        return Err(invalid_credentials());
    }

    let id = user
        ._id
        .ok_or_else(|| HealthdeskError::Database("User record without _id".into()))?;
    let now = DateTime::now();
    state
        .store
        .update_by_id(USER_COLLECTION, &id, doc! { "last_login_at": now })
        .await?;
    record.insert("last_login_at", now);

    info!(user = %user.id_hex(), role = %user.role, "Login successful");
    state
        .audit
        .log(
            AuditEvent::new(EventType::LoginSucceeded)
                .with_request_id(ctx.request_id.clone())
                .with_email(email.clone())
                .with_operation("auth.login")
                .with_status(StatusCode::OK.as_u16())
                .with_record(user.id_hex()),
        )
        .await;

    auth_response(state, &user, &record)
}

/// GET /api/auth/me
pub fn handle_me(ctx: &RequestContext) -> ApiResult {
    let claims = ctx.principal()?.clone();
    Ok(json_response(StatusCode::OK, &MeResponse::from(claims)))
}

/// POST /api/auth/refresh
///
/// The account is re-read so a deactivated or deleted user cannot extend a
/// session, and a changed role takes effect in the new token.
pub async fn handle_refresh(state: &AppState, ctx: &RequestContext) -> ApiResult {
    let claims = ctx.principal()?;

    let id = ObjectId::parse_str(&claims.subject_id).map_err(|_| AuthError::InvalidToken)?;
    let record = state
        .store
        .find_by_id(USER_COLLECTION, &id)
        .await?
        .ok_or(AuthError::InvalidToken)?;
    let user = UserDoc::from_document(record.clone())?;

    if !user.is_active {
        warn!(user = %claims.subject_id, "Refresh refused for inactive account");
        return Err(AuthError::InvalidToken.into());
    }

    auth_response(state, &user, &record)
}
