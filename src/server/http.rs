//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Bodies are collected up
//! to the configured limit, then [`dispatch`] resolves the route, runs the
//! authorizer against the operation's access requirement and calls the
//! handler.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::header::{
    HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::auth::{required_access, Authorizer, Operation};
use crate::config::Args;
use crate::db::DocumentStore;
use crate::logging::{AuditEvent, AuditLogger, EventType};
use crate::routes::{self, ApiError, ApiResult, RequestContext, Route};
use crate::types::HealthdeskError;

/// Header carrying the per-request correlation id
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub store: Arc<dyn DocumentStore>,
    /// Built once from the resolved secret; read-only afterwards
    pub authorizer: Authorizer,
    pub audit: AuditLogger,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        store: Arc<dyn DocumentStore>,
        authorizer: Authorizer,
        audit: AuditLogger,
    ) -> Self {
        Self {
            args,
            store,
            authorizer,
            audit,
            started_at: Instant::now(),
        }
    }
}

/// Accept connections until Ctrl-C
pub async fn run(state: Arc<AppState>) -> Result<(), HealthdeskError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "healthdesk listening on {} ({} store)",
        state.args.listen,
        state.store.backend()
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - do not expose this instance");
    }

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                return Ok(());
            }
        };

        match accepted {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req: Request<Incoming>| {
                        let state = Arc::clone(&state);
                        async move { Ok::<_, Infallible>(handle_request(&state, addr, req).await) }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Collect the body within the size limit and hand off to [`dispatch`]
pub(crate) async fn handle_request<B>(
    state: &AppState,
    addr: SocketAddr,
    req: Request<B>,
) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let limit = state.args.max_body_bytes;

    let body = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!("[{}] {} {} body exceeds {} bytes", addr, parts.method, parts.uri.path(), limit);
            return ApiError::payload_too_large(limit).into_response();
        }
        Err(e) => {
            warn!("[{}] Failed to read request body: {}", addr, e);
            return ApiError::bad_request("Failed to read request body").into_response();
        }
    };

    debug!("[{}] {} {}", addr, parts.method, parts.uri.path());
    dispatch(state, Request::from_parts(parts, body)).await
}

/// Every response gets a fresh UUID v4 correlation id
fn request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Route a fully buffered request
pub async fn dispatch(state: &AppState, req: Request<Bytes>) -> Response<Full<Bytes>> {
    let request_id = request_id();
    let span = info_span!(
        "request",
        id = %request_id,
        method = %req.method(),
        path = %req.uri().path()
    );

    let mut response = async {
        let started = Instant::now();
        let response = if req.method() == Method::OPTIONS {
            preflight_response()
        } else {
            handle(state, &request_id, req)
                .await
                .unwrap_or_else(ApiError::into_response)
        };
        info!(
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    }
    .instrument(span)
    .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn handle(state: &AppState, request_id: &str, req: Request<Bytes>) -> ApiResult {
    let (parts, body) = req.into_parts();
    let route = routes::resolve(&parts.method, parts.uri.path())?;
    let access = required_access(route.operation);

    let claims = match state.authorizer.gate(&parts.headers, access) {
        Ok(claims) => claims,
        Err(e) => {
            let mut event = AuditEvent::new(EventType::AccessDenied)
                .with_request_id(request_id)
                .with_operation(route.operation.to_string())
                .with_status(e.status_code().as_u16());
            // A 403 means the token itself verified; attribute the attempt
            if let Ok(claims) = state.authorizer.authenticate(&parts.headers) {
                event = event.with_principal(&claims);
            }
            state.audit.log(event).await;
            return Err(e.into());
        }
    };

    let ctx = RequestContext {
        request_id: request_id.to_string(),
        claims,
    };
    handle_operation(state, &ctx, route, parts.uri.query(), &body).await
}

async fn handle_operation(
    state: &AppState,
    ctx: &RequestContext,
    route: Route,
    query: Option<&str>,
    body: &Bytes,
) -> ApiResult {
    match route.operation {
        Operation::Health => Ok(routes::health_check(state)),
        Operation::Ready => Ok(routes::readiness_check(state).await),
        Operation::Version => Ok(routes::version_info()),
        Operation::Login => routes::handle_login(state, ctx, body).await,
        Operation::Me => routes::handle_me(ctx),
        Operation::Refresh => routes::handle_refresh(state, ctx).await,
        Operation::DashboardStats => routes::handle_dashboard_stats(state).await,
        Operation::Resource(kind, action) => {
            routes::handle_resource_request(
                state,
                ctx,
                kind,
                action,
                route.id.as_deref(),
                query,
                body,
            )
            .await
        }
    }
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization, X-Request-Id"),
    );
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    response
}
