//! JSON bodies returned by the file API.

use serde::Serialize;
use utoipa::ToSchema;

use crate::storage::backend::ObjectInfo;

/// Listing date format, e.g. `07.03.2026 14:05`.
const CREATE_DATE_FORMAT: &str = "%d.%m.%Y %H:%M";

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// One entry of a tenant's file listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FileEntry {
    /// Object name. Collapsed directories end in `/`.
    #[schema(example = "report.pdf")]
    pub file_name: String,
    /// Text after the last `.` in the name, or the whole name.
    #[schema(example = "pdf")]
    pub file_type: String,
    /// Last modification time, `DD.MM.YYYY HH:MM` in UTC.
    #[schema(example = "07.03.2026 14:05")]
    pub create_date: String,
    /// Human-readable size.
    #[schema(example = "1.5 MB")]
    pub file_size: String,
}

impl From<&ObjectInfo> for FileEntry {
    fn from(info: &ObjectInfo) -> Self {
        FileEntry {
            file_name: info.name.clone(),
            file_type: file_type_of(&info.name),
            create_date: info.last_modified.format(CREATE_DATE_FORMAT).to_string(),
            file_size: format_file_size(info.size),
        }
    }
}

/// Response to `POST /files`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// HTTP status code echoed in the body.
    pub status: u16,
    pub message: String,
    /// The tenant's listing after the upload. Empty if it could not be read.
    pub new_files: Vec<FileEntry>,
    /// Names stored by this request.
    pub uploaded_files: Vec<String>,
    /// One message per part that failed.
    pub errors: Vec<String>,
}

/// Response to `DELETE /files`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub status: u16,
    pub message: String,
    pub new_files: Vec<FileEntry>,
}

/// Response to `GET /health`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    #[schema(example = "filegate")]
    pub service: String,
    pub version: String,
}

/// Format a byte count with 1024-based units.
pub fn format_file_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", SIZE_UNITS[unit])
}

/// File type shown in listings.
///
/// Names without a `.` report the whole name.
pub fn file_type_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_string(),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(1023), "1023 B");
        assert_eq!(format_file_size(1024), "1.0 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.0 GB");
        assert_eq!(format_file_size(2048 * 1024 * 1024 * 1024 * 1024), "2048.0 TB");
    }

    #[test]
    fn test_file_type_of() {
        assert_eq!(file_type_of("report.pdf"), "pdf");
        assert_eq!(file_type_of("archive.tar.gz"), "gz");
        assert_eq!(file_type_of("Makefile"), "Makefile");
        assert_eq!(file_type_of("photos/"), "photos/");
    }

    #[test]
    fn test_file_entry_from_object() {
        let info = ObjectInfo {
            name: "a.txt".to_string(),
            size: 2048,
            last_modified: Utc.with_ymd_and_hms(2026, 3, 7, 14, 5, 0).unwrap(),
        };
        let entry = FileEntry::from(&info);
        assert_eq!(entry.file_type, "txt");
        assert_eq!(entry.create_date, "07.03.2026 14:05");
        assert_eq!(entry.file_size, "2.0 KB");
    }

    #[test]
    fn test_upload_response_field_names() {
        let body = serde_json::to_value(UploadResponse {
            status: 200,
            message: "1 uploaded".to_string(),
            new_files: vec![],
            uploaded_files: vec!["a.txt".to_string()],
            errors: vec![],
        })
        .unwrap();
        assert!(body.get("newFiles").is_some());
        assert_eq!(body["uploadedFiles"][0], "a.txt");
    }
}
