//! Filegate library -- multi-tenant file gateway over an object store.
//!
//! This crate provides the core components for running the gateway:
//! cache-aside tenant authorization, the HTTP request pipeline, streaming
//! per-tenant file operations, pluggable storage backends, and graceful
//! drain of in-flight requests.

use std::sync::Arc;

pub mod auth;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod server;
pub mod shutdown;
pub mod storage;

use crate::auth::AuthCache;
use crate::config::Config;
use crate::gateway::ObjectGateway;
use crate::metrics::MetricsRecorder;
use crate::shutdown::ShutdownCoordinator;

/// Shared application state passed to the middleware via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Tenant key authorization (credential cache + source of truth).
    pub auth: Arc<AuthCache>,
    /// Per-tenant file operations.
    pub gateway: Arc<ObjectGateway>,
    /// Metrics sink shared by every component.
    pub metrics: MetricsRecorder,
    /// In-flight tracking for the main listener.
    pub shutdown: ShutdownCoordinator,
}
