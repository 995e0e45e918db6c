//! Word-cloud keyword endpoints.

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::RequireAdmin;
use crate::jobs::weekly_keywords::{RunOutcome, SkipReason};
use crate::models::{generate_article_id, id_matches, Keyword, KeywordSize};
use crate::store::{read_vec, write_json};
use crate::web::error::ApiError;
use crate::web::AppState;

pub async fn list(State(state): State<AppState>) -> Json<Vec<Keyword>> {
    Json(state.keywords_cache.get_or_load(state.store.as_ref()).await)
}

#[derive(Debug, Deserialize)]
pub struct KeywordRequest {
    pub text: Option<String>,
    pub weight: Option<i64>,
    pub size: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Json(body): Json<KeywordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(text) = body.text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) else {
        return Err(ApiError::bad_request("关键词文本不能为空"));
    };

    let now = Utc::now();
    let weight = body.weight.unwrap_or(1).clamp(1, 10);
    let ts = now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    let keyword = Keyword {
        id: serde_json::Value::from(now.timestamp_millis()),
        text,
        weight,
        size: KeywordSize::parse_or_derive(body.size.as_deref(), weight),
        font_size: None,
        created_at: ts.clone(),
        updated_at: ts,
    };

    let mut keywords: Vec<Keyword> = read_vec(state.store.as_ref(), "keywords").await;
    keywords.push(keyword.clone());
    write_json(state.store.as_ref(), "keywords", &keywords).await?;
    state.keywords_cache.invalidate();

    Ok(Json(json!({ "id": keyword.id, "message": "关键词添加成功" })))
}

pub async fn update(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(id): Path<String>,
    Json(body): Json<KeywordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut keywords: Vec<Keyword> = read_vec(state.store.as_ref(), "keywords").await;
    let Some(keyword) = keywords.iter_mut().find(|k| id_matches(&k.id, &id)) else {
        return Err(ApiError::not_found("关键词不存在"));
    };

    if let Some(text) = body.text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        keyword.text = text;
    }
    if let Some(weight) = body.weight {
        keyword.weight = weight.clamp(1, 10);
    }
    keyword.size = KeywordSize::parse_or_derive(body.size.as_deref(), keyword.weight);
    keyword.updated_at = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

    write_json(state.store.as_ref(), "keywords", &keywords).await?;
    state.keywords_cache.invalidate();
    Ok(Json(json!({ "message": "关键词更新成功" })))
}

pub async fn remove(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let keywords: Vec<Keyword> = read_vec(state.store.as_ref(), "keywords").await;
    let remaining: Vec<Keyword> = keywords
        .into_iter()
        .filter(|k| !id_matches(&k.id, &id))
        .collect();
    write_json(state.store.as_ref(), "keywords", &remaining).await?;
    state.keywords_cache.invalidate();
    Ok(Json(json!({ "message": "关键词删除成功" })))
}

#[derive(Debug, Deserialize)]
pub struct BatchImportRequest {
    pub keywords: Option<Vec<KeywordRequest>>,
}

/// Append a batch of keywords; ids use the date-prefixed batch format.
pub async fn batch_import(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Json(body): Json<BatchImportRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(items) = body.keywords else {
        return Err(ApiError::bad_request("关键词数据格式错误"));
    };

    let now = Utc::now();
    let ts = now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    let mut keywords: Vec<Keyword> = read_vec(state.store.as_ref(), "keywords").await;
    let mut imported = 0;
    for item in items {
        let Some(text) = item.text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) else {
            continue;
        };
        let weight = item.weight.unwrap_or(1).clamp(1, 10);
        keywords.push(Keyword {
            id: serde_json::Value::from(generate_article_id(now)),
            text,
            weight,
            size: KeywordSize::parse_or_derive(item.size.as_deref(), weight),
            font_size: None,
            created_at: ts.clone(),
            updated_at: ts.clone(),
        });
        imported += 1;
    }

    write_json(state.store.as_ref(), "keywords", &keywords).await?;
    state.keywords_cache.invalidate();
    info!(count = imported, "Batch imported keywords");
    Ok(Json(json!({
        "message": format!("成功导入 {imported} 个关键词"),
        "count": imported,
    })))
}

/// Force the weekly regeneration job to run now, ignoring its schedule gate.
pub async fn refresh_weekly(
    State(state): State<AppState>,
    _admin: RequireAdmin,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.weekly_job.run_once(true).await {
        Ok(RunOutcome::Updated {
            keyword_count,
            title_count,
            file_count,
            range_start,
            range_end,
        }) => {
            state.keywords_cache.invalidate();
            Ok(Json(json!({
                "success": true,
                "message": "关键词已重新生成",
                "keywordCount": keyword_count,
                "titleCount": title_count,
                "fileCount": file_count,
                "range": format!("{range_start}~{range_end}"),
            })))
        }
        Ok(RunOutcome::Skipped(reason)) => {
            let message = match reason {
                SkipReason::ApiKeyMissing => "模型 API Key 未配置",
                SkipReason::NoTitles => "最近7天没有可用的新闻标题",
                SkipReason::NotDue => "未到执行时间",
            };
            Ok(Json(json!({ "success": false, "message": message })))
        }
        Err(e) => {
            state.weekly_job.record_failure(&e.to_string()).await;
            Err(ApiError::internal(format!("关键词生成失败: {e}")))
        }
    }
}
