//! Daily archive management endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::archive::resolve_safe_archive_file;
use crate::auth::RequireAdmin;
use crate::models::Article;
use crate::store::StoreError;
use crate::web::error::ApiError;
use crate::web::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ArchiveQuery {
    #[serde(rename = "type")]
    pub archive_type: Option<String>,
}

/// Only daily archives exist; the parameter is kept for forward compatibility
/// with other granularities.
fn validate_archive_type(query: &ArchiveQuery) -> Result<(), ApiError> {
    match query.archive_type.as_deref() {
        None | Some("daily") => Ok(()),
        Some(_) => Err(ApiError::bad_request("无效的归档类型，必须是 daily")),
    }
}

pub async fn dates(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Query(query): Query<ArchiveQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_archive_type(&query)?;
    let dates = state.archive.archive_dates().await;
    Ok(Json(json!({ "dates": dates, "type": "daily" })))
}

pub async fn show(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(date): Path<String>,
    Query(query): Query<ArchiveQuery>,
) -> Result<Json<Vec<Article>>, ApiError> {
    validate_archive_type(&query)?;
    if resolve_safe_archive_file(state.archive.daily_dir(), &date).is_none() {
        return Err(ApiError::bad_request("无效的归档日期参数"));
    }

    match state.archive.read_archive(&date).await {
        Ok(articles) => Ok(Json(articles)),
        Err(StoreError::NotFound(_)) => Err(ApiError::not_found("该日期的数据不存在")),
        Err(e) => Err(e.into()),
    }
}

pub async fn remove(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(date): Path<String>,
    Query(query): Query<ArchiveQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_archive_type(&query)?;
    if resolve_safe_archive_file(state.archive.daily_dir(), &date).is_none() {
        return Err(ApiError::bad_request("无效的归档日期参数"));
    }

    match state.archive.delete_archive(&date).await {
        Ok(()) => {
            info!(date, "Deleted daily archive");
            Ok(Json(json!({ "message": format!("已删除 {date} 的每日历史数据") })))
        }
        Err(StoreError::NotFound(_)) => Err(ApiError::not_found("该日期的数据不存在")),
        Err(e) => Err(e.into()),
    }
}
