//! Archived daily HTML reports.

use axum::extract::{Path, State};
use axum::response::Html;
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::error;

use crate::web::error::ApiError;
use crate::web::AppState;

/// Metadata for every archived report, newest first by filename.
pub async fn list(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut reports = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(&state.config.reports_dir).await else {
        return Json(json!({ "reports": [] }));
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let filename = entry.file_name().to_string_lossy().into_owned();
        let Some(stem) = filename.strip_suffix(".html") else {
            continue;
        };
        let (size, created_at) = match entry.metadata().await {
            Ok(meta) => {
                let created = meta
                    .modified()
                    .ok()
                    .map(|t| DateTime::<Utc>::from(t).to_rfc3339());
                (meta.len(), created)
            }
            Err(e) => {
                error!(filename, "Failed to stat report file: {e}");
                (0, None)
            }
        };
        reports.push(json!({
            "filename": filename,
            "title": format!("AI日报 - {stem}"),
            "date": stem,
            "size": size,
            "created_at": created_at,
        }));
    }

    reports.sort_by(|a, b| {
        b["filename"]
            .as_str()
            .unwrap_or("")
            .cmp(a["filename"].as_str().unwrap_or(""))
    });
    Json(json!({ "reports": reports }))
}

pub async fn show(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Html<String>, ApiError> {
    // Only flat .html filenames; anything path-like is rejected.
    if !filename.ends_with(".html")
        || filename.contains("..")
        || filename.contains('/')
        || filename.contains('\\')
    {
        return Err(ApiError::bad_request("无效的文件名"));
    }

    let path = state.config.reports_dir.join(&filename);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(Html(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::not_found("日报文件不存在"))
        }
        Err(e) => {
            error!(filename, "Failed to read report file: {e}");
            Err(ApiError::internal("服务器内部错误"))
        }
    }
}
