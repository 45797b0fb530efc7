//! Gateway error types.
//!
//! Every variant maps to one class of the error taxonomy and knows its
//! HTTP status.  The enum implements [`axum::response::IntoResponse`] so
//! handlers and middleware can simply return `Err(GatewayError::..)`.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Cookie attribute string that expires a session marker immediately.
const EXPIRED_COOKIE_ATTRS: &str = "Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT";

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Errors surfaced by the request pipeline and the object gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or malformed input.
    #[error("{message}")]
    Validation { message: String },

    /// The presented tenant key is unknown to the source of truth.
    #[error("Unknown tenant key")]
    UnknownTenant {
        /// Where the client is sent to log in again.
        login_path: String,
        /// Name of the session cookie to clear.
        cookie: String,
    },

    /// The requested object (or tenant partition) does not exist.
    #[error("File not found: {name}")]
    NotFound { name: String },

    /// The object could not be opened for download.
    #[error("File could not be retrieved: {name}")]
    DownloadFailed { name: String },

    /// The multipart request body could not be parsed.
    #[error("Malformed request body: {message}")]
    MalformedBody { message: String },

    /// The service is draining and refuses new work.
    #[error("Service is shutting down")]
    Unavailable,

    /// A fault was caught at the request boundary.
    #[error("Internal server error")]
    Internal,

    /// A backing store (object store, cache, source of truth) failed.
    #[error("Upstream service error")]
    Upstream(#[from] anyhow::Error),
}

impl GatewayError {
    /// Shortcut for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        GatewayError::Validation {
            message: message.into(),
        }
    }

    /// Stable machine-readable code for the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation { .. } => "validation_error",
            GatewayError::UnknownTenant { .. } => "auth_error",
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::DownloadFailed { .. } => "download_failed",
            GatewayError::MalformedBody { .. } => "malformed_body",
            GatewayError::Unavailable => "service_unavailable",
            GatewayError::Internal => "internal_error",
            GatewayError::Upstream(_) => "upstream_error",
        }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation { .. } => StatusCode::BAD_REQUEST,
            GatewayError::UnknownTenant { .. } => StatusCode::FOUND,
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::DownloadFailed { .. } => StatusCode::BAD_REQUEST,
            GatewayError::MalformedBody { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();

        if let GatewayError::UnknownTenant { login_path, cookie } = &self {
            let mut response = (status, [(header::LOCATION, login_path.clone())]).into_response();
            if let Ok(value) = HeaderValue::from_str(&format!("{cookie}=; {EXPIRED_COOKIE_ATTRS}")) {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
            return response;
        }

        let body = axum::Json(json!({
            "error": self.code(),
            "message": self.to_string(),
            "requestId": request_id,
        }));

        (status, [("x-request-id", request_id.clone())], body).into_response()
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_is_16_uppercase_hex() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatewayError::validation("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::NotFound { name: "a".into() }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::DownloadFailed { name: "a".into() }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::Unavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_upstream_error_hides_cause() {
        let err = GatewayError::Upstream(anyhow::anyhow!("connection refused to 10.0.0.3"));
        assert_eq!(err.to_string(), "Upstream service error");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_unknown_tenant_redirects_and_clears_cookie() {
        let resp = GatewayError::UnknownTenant {
            login_path: "/".into(),
            cookie: "tenant_key".into(),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[header::LOCATION], "/");
        let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("tenant_key=;"));
        assert!(cookie.contains("Max-Age=0"));
    }
}
