//! Axum router construction and the request pipeline.
//!
//! Middleware runs in this order, outermost first:
//!
//! 1. shutdown gate: refuse new work while draining, track the rest
//! 2. fault boundary: a panicking handler becomes a generic 500
//! 3. metrics capture
//! 4. tenant auth, for `/files` routes only
//! 5. access log
//!
//! The metrics listener gets its own, smaller router from [`metrics_app`].

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, Query, Request, State},
    http::header,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{error, info, warn};
use utoipa::OpenApi;

use crate::errors::GatewayError;
use crate::gateway::ObjectGateway;
use crate::handlers::{files, health};
use crate::metrics::{metrics_handler, metrics_middleware, MetricsRecorder};
use crate::shutdown::{shutdown_gate, ShutdownCoordinator};
use crate::AppState;

// -- OpenAPI document ---------------------------------------------------------

/// OpenAPI documentation for the file API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Filegate API",
        description = "Multi-tenant file gateway in front of an object store"
    ),
    paths(
        health::health_check,
        files::get_file,
        files::upload_files,
        files::list_files,
        files::delete_file,
    ),
    components(schemas(
        crate::models::FileEntry,
        crate::models::UploadResponse,
        crate::models::DeleteResponse,
        crate::models::HealthResponse,
    )),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Files", description = "Tenant file operations"),
    )
)]
pub struct ApiDoc;

/// The authenticated caller, attached to the request by [`auth_middleware`].
#[derive(Clone)]
pub struct TenantContext {
    /// Validated tenant key, also the caller's storage partition.
    pub key: String,
    pub gateway: Arc<ObjectGateway>,
}

/// Build the main [`Router`].
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/files",
            get(files::get_file)
                .post(files::upload_files)
                .delete(files::delete_file),
        )
        .route("/files/list", get(files::list_files))
        .route("/health", get(health::health_check))
        .route("/openapi.json", get(openapi_json))
        // Layer ordering: the last layer added is the outermost.
        .layer(middleware::from_fn(access_log_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            metrics_middleware,
        ))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn_with_state(
            state.shutdown.clone(),
            shutdown_gate,
        ))
        // Uploads stream through; per-file limits are enforced while staging.
        .layer(DefaultBodyLimit::disable())
}

/// Build the metrics listener's [`Router`]: `/metrics` and a plain `/health`.
pub fn metrics_app(recorder: MetricsRecorder, shutdown: ShutdownCoordinator) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(|| async { "OK" }))
        .with_state(recorder)
        .layer(middleware::from_fn(access_log_middleware))
        .layer(middleware::from_fn_with_state(shutdown, shutdown_gate))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

// -- Fault boundary ----------------------------------------------------------

/// Convert a caught panic into a generic internal error.
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail: &str = if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        *s
    } else {
        "unknown panic payload"
    };
    error!(panic = %detail, "request handler panicked");
    GatewayError::Internal.into_response()
}

// -- Auth middleware ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TenantParam {
    tenant: Option<String>,
}

/// Whether `path` addresses tenant files and therefore needs a tenant key.
fn is_tenant_scoped(path: &str) -> bool {
    path == "/files" || path.starts_with("/files/")
}

/// Read the value of cookie `name` from the request's `Cookie` headers.
fn cookie_value(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| {
            percent_encoding::percent_decode_str(v)
                .decode_utf8_lossy()
                .into_owned()
        })
}

/// Tenant key from the `tenant` query parameter, else the session cookie.
fn tenant_key(req: &Request, cookie: &str) -> Option<String> {
    Query::<TenantParam>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(p)| p.tenant)
        .filter(|k| !k.is_empty())
        .or_else(|| cookie_value(req, cookie))
}

/// Tenant authorization middleware.
///
/// Missing key: 400.  Unknown key: redirect to login and clear the session
/// cookie.  Valid key: attach a [`TenantContext`] for the handlers.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    if !is_tenant_scoped(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let auth = &state.config.auth;
    let key = tenant_key(&req, &auth.session_cookie)
        .ok_or_else(|| GatewayError::validation("Tenant key is required"))?;

    if !state.auth.authorize(&key).await? {
        warn!(tenant = %key, path = %req.uri().path(), "rejected unknown tenant key");
        return Err(GatewayError::UnknownTenant {
            login_path: auth.login_path.clone(),
            cookie: auth.session_cookie.clone(),
        });
    }

    req.extensions_mut().insert(TenantContext {
        key,
        gateway: state.gateway.clone(),
    });
    Ok(next.run(req).await)
}

// -- Access log --------------------------------------------------------------

/// Log one line per request, except for static assets.
async fn access_log_middleware(req: Request, next: Next) -> Response {
    let path = req.uri().path();
    if !path.contains("static") {
        let client = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        info!(
            client = %client,
            path = %path,
            method = %req.method(),
            timestamp = %Utc::now().to_rfc3339(),
            "request"
        );
    }
    next.run(req).await
}

// -- Tests -------------------------------------------------------------------
