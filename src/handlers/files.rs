//! Tenant file handlers.
//!
//! Every route here sits behind the auth middleware, which attaches the
//! caller's [`TenantContext`]; handlers never read the tenant key from the
//! request themselves.

use std::time::SystemTime;

use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Query};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::{Extension, Json};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::errors::GatewayError;
use crate::models::{DeleteResponse, FileEntry, UploadResponse};
use crate::server::TenantContext;
use crate::storage::backend::ObjectReader;

/// Query string accepted by the file routes.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FileQuery {
    /// Tenant key. Falls back to the session cookie when absent.
    pub tenant: Option<String>,
    /// Target file name.
    pub name: Option<String>,
}

impl FileQuery {
    fn required_name(&self) -> Result<&str, GatewayError> {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(GatewayError::validation("Query parameter 'name' is required")),
        }
    }
}

/// Build the streaming download response for an opened object.
pub fn download_response(name: &str, reader: ObjectReader) -> Result<Response, GatewayError> {
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(name, NON_ALPHANUMERIC)
    );
    let last_modified = httpdate::fmt_http_date(SystemTime::from(reader.last_modified));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, reader.size)
        .header(header::LAST_MODIFIED, last_modified)
        .body(Body::from_stream(reader.body))
        .map_err(|e| GatewayError::Upstream(e.into()))
}

/// `GET /files` -- Stream one of the tenant's files.
#[utoipa::path(
    get,
    path = "/files",
    tag = "Files",
    operation_id = "GetFile",
    params(FileQuery),
    responses(
        (status = 200, description = "File contents", content_type = "application/octet-stream"),
        (status = 400, description = "Missing name or file could not be opened"),
        (status = 302, description = "Unknown tenant, redirected to login")
    )
)]
pub async fn get_file(
    Extension(ctx): Extension<TenantContext>,
    Query(query): Query<FileQuery>,
) -> Result<Response, GatewayError> {
    let name = query.required_name()?;
    let reader = ctx.gateway.download(&ctx.key, name).await?;
    download_response(name, reader)
}

/// `POST /files` -- Upload one or more files from a multipart body.
///
/// Per-file failures are reported in `errors`; the response is still 200.
#[utoipa::path(
    post,
    path = "/files",
    tag = "Files",
    operation_id = "UploadFiles",
    params(FileQuery),
    responses(
        (status = 200, description = "Upload processed, possibly with per-file errors", body = UploadResponse),
        (status = 500, description = "Malformed multipart body")
    )
)]
pub async fn upload_files(
    Extension(ctx): Extension<TenantContext>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, GatewayError> {
    let multipart = multipart.map_err(|rejection| GatewayError::MalformedBody {
        message: rejection.body_text(),
    })?;
    let report = ctx.gateway.upload(&ctx.key, multipart).await?;

    Ok(Json(UploadResponse {
        status: StatusCode::OK.as_u16(),
        message: report.summary(),
        new_files: report.files,
        uploaded_files: report.uploaded,
        errors: report.errors,
    }))
}

/// `GET /files/list` -- List the tenant's files, one level deep.
#[utoipa::path(
    get,
    path = "/files/list",
    tag = "Files",
    operation_id = "ListFiles",
    params(FileQuery),
    responses(
        (status = 200, description = "File listing", body = Vec<FileEntry>),
        (status = 500, description = "Listing failed")
    )
)]
pub async fn list_files(
    Extension(ctx): Extension<TenantContext>,
) -> Result<Json<Vec<FileEntry>>, GatewayError> {
    Ok(Json(ctx.gateway.list(&ctx.key).await?))
}

/// `DELETE /files` -- Remove one file.
#[utoipa::path(
    delete,
    path = "/files",
    tag = "Files",
    operation_id = "DeleteFile",
    params(FileQuery),
    responses(
        (status = 200, description = "File deleted", body = DeleteResponse),
        (status = 404, description = "File not found or could not be deleted")
    )
)]
pub async fn delete_file(
    Extension(ctx): Extension<TenantContext>,
    Query(query): Query<FileQuery>,
) -> Result<Json<DeleteResponse>, GatewayError> {
    let name = query.required_name()?;
    let remaining = ctx.gateway.delete(&ctx.key, name).await?;

    Ok(Json(DeleteResponse {
        status: StatusCode::OK.as_u16(),
        message: format!("File deleted: {name}"),
        new_files: remaining,
    }))
}
