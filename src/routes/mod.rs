//! HTTP routes for healthdesk
//!
//! The route table maps a method and path to an [`Operation`]; the server
//! looks up the operation's access requirement, runs the authorizer and then
//! calls the handler here.

pub mod auth_routes;
pub mod dashboard;
pub mod health;
pub mod resources;

pub use auth_routes::{handle_login, handle_me, handle_refresh};
pub use dashboard::handle_dashboard_stats;
pub use health::{health_check, readiness_check, version_info};
pub use resources::{handle_resource_request, ListQuery};

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, ALLOW, CONTENT_TYPE};
use hyper::{Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::auth::{Action, AuthError, Claims, Operation};
use crate::db::schemas::{FieldError, ResourceKind};
use crate::types::HealthdeskError;

/// Error body returned by every route
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// A failed request, rendered as [`ErrorBody`]
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
    allow: Option<&'static str>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                message: message.into(),
                code: code.to_string(),
                details: None,
            },
            allow: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn method_not_allowed(allow: &'static str) -> Self {
        let mut err = Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "METHOD_NOT_ALLOWED",
            "Method not allowed",
        );
        err.allow = Some(allow);
        err
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "PAYLOAD_TOO_LARGE",
            format!("Request body exceeds {limit} bytes"),
        )
    }

    pub fn invalid_fields(errors: Vec<FieldError>) -> Self {
        let mut err = Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "Invalid request body");
        err.body.details = serde_json::to_value(errors).ok();
        err
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = json_response(self.status, &self.body);
        if let Some(allow) = self.allow {
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static(allow));
        }
        response
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::new(e.status_code(), e.code(), e.to_string())
    }
}

impl From<HealthdeskError> for ApiError {
    fn from(e: HealthdeskError) -> Self {
        match e {
            HealthdeskError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
            }
            HealthdeskError::Http(message) => Self::bad_request(message),
            other => {
                // Internal details stay in the log
                error!("Request failed: {}", other);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error",
                )
            }
        }
    }
}

pub type ApiResult = Result<Response<Full<Bytes>>, ApiError>;

/// Per-request values the server hands to every handler
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// Verified principal; `None` only for public operations
    pub claims: Option<Claims>,
}

impl RequestContext {
    pub fn principal(&self) -> Result<&Claims, ApiError> {
        self.claims
            .as_ref()
            .ok_or_else(|| AuthError::Unauthenticated.into())
    }
}

/// Serialize `body` as a JSON response with CORS headers
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());

    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

/// Parse a JSON request body
pub fn parse_json<T: for<'de> Deserialize<'de>>(body: &Bytes) -> Result<T, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("Request body is required"));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("Invalid JSON: {e}")))
}

/// A resolved route: the operation plus the record id segment, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub operation: Operation,
    pub id: Option<String>,
}

impl Route {
    fn of(operation: Operation) -> Self {
        Self {
            operation,
            id: None,
        }
    }
}

const COLLECTION_METHODS: &str = "GET, POST";
const RECORD_METHODS: &str = "GET, PUT, DELETE";

/// Map a request line onto an operation.
///
/// Unknown paths are 404; a known path with the wrong method is 405.
pub fn resolve(method: &Method, path: &str) -> Result<Route, ApiError> {
    let trimmed = path.trim_end_matches('/');
    let path = if trimmed.is_empty() { "/" } else { trimmed };

    let fixed = match path {
        "/health" | "/healthz" => Some((Method::GET, Operation::Health, "GET")),
        "/ready" | "/readyz" => Some((Method::GET, Operation::Ready, "GET")),
        "/version" => Some((Method::GET, Operation::Version, "GET")),
        "/api/auth/login" => Some((Method::POST, Operation::Login, "POST")),
        "/api/auth/me" => Some((Method::GET, Operation::Me, "GET")),
        "/api/auth/refresh" => Some((Method::POST, Operation::Refresh, "POST")),
        "/api/dashboard/stats" => Some((Method::GET, Operation::DashboardStats, "GET")),
        _ => None,
    };
    if let Some((expected, operation, allow)) = fixed {
        return if *method == expected {
            Ok(Route::of(operation))
        } else {
            Err(ApiError::method_not_allowed(allow))
        };
    }

    let not_found = || ApiError::not_found(format!("No route for {path}"));

    let rest = path.strip_prefix("/api/").ok_or_else(not_found)?;
    let mut segments = rest.split('/');
    let kind = segments
        .next()
        .and_then(ResourceKind::from_path_segment)
        .ok_or_else(not_found)?;
    let id = segments.next();
    if segments.next().is_some() {
        return Err(not_found());
    }

    let action = match (id, method) {
        (None, &Method::GET) => Action::List,
        (None, &Method::POST) => Action::Create,
        (None, _) => return Err(ApiError::method_not_allowed(COLLECTION_METHODS)),
        (Some(_), &Method::GET) => Action::Get,
        (Some(_), &Method::PUT) => Action::Update,
        (Some(_), &Method::DELETE) => Action::Delete,
        (Some(_), _) => return Err(ApiError::method_not_allowed(RECORD_METHODS)),
    };

    Ok(Route {
        operation: Operation::Resource(kind, action),
        id: id.map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_routes() {
        assert_eq!(
            resolve(&Method::POST, "/api/auth/login").unwrap().operation,
            Operation::Login
        );
        assert_eq!(
            resolve(&Method::GET, "/health/").unwrap().operation,
            Operation::Health
        );
        let err = resolve(&Method::GET, "/api/auth/login").unwrap_err();
        assert_eq!(err.status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_resource_routes() {
        let route = resolve(&Method::GET, "/api/follow-ups").unwrap();
        assert_eq!(
            route.operation,
            Operation::Resource(ResourceKind::FollowUps, Action::List)
        );
        assert_eq!(route.id, None);

        let route = resolve(&Method::DELETE, "/api/customers/65f1c0ffee0000000000abcd").unwrap();
        assert_eq!(
            route.operation,
            Operation::Resource(ResourceKind::Customers, Action::Delete)
        );
        assert_eq!(route.id.as_deref(), Some("65f1c0ffee0000000000abcd"));
    }

    #[test]
    fn test_unknown_and_wrong_method() {
        assert_eq!(
            resolve(&Method::GET, "/api/invoices").unwrap_err().status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            resolve(&Method::GET, "/api/customers/x/y").unwrap_err().status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            resolve(&Method::PUT, "/api/customers").unwrap_err().status,
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            resolve(&Method::POST, "/api/tags/65f1c0ffee0000000000abcd")
                .unwrap_err()
                .status,
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[test]
    fn test_auth_error_mapping() {
        let err = ApiError::from(AuthError::Forbidden);
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.body.code, "FORBIDDEN");

        let err = ApiError::from(AuthError::InvalidToken);
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_internal_errors_are_opaque() {
        let err = ApiError::from(HealthdeskError::Database("connection reset".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.body.message.contains("connection reset"));
    }
}
