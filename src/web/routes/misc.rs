//! Site settings, dashboard stats, and backup/restore.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::auth::RequireAdmin;
use crate::models::{default_settings, Article, Keyword};
use crate::store::{read_or, read_vec, write_json};
use crate::web::error::ApiError;
use crate::web::AppState;

pub async fn get_settings(State(state): State<AppState>) -> Json<serde_json::Value> {
    let settings = read_or(
        state.store.as_ref(),
        "settings",
        default_settings(Utc::now()),
    )
    .await;
    Json(settings)
}

/// Shallow-merge the posted fields into the stored settings document.
pub async fn update_settings(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(patch) = body.as_object() else {
        return Err(ApiError::bad_request("设置数据格式错误"));
    };
    if let Some(count) = patch.get("todayNewsDisplayCount") {
        let valid = count.as_i64().is_some_and(|n| (1..=50).contains(&n));
        if !valid {
            return Err(ApiError::bad_request("显示数量必须在1-50之间"));
        }
    }

    let mut settings = read_or(
        state.store.as_ref(),
        "settings",
        default_settings(Utc::now()),
    )
    .await;
    if let Some(target) = settings.as_object_mut() {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
        target.insert(
            "lastUpdated".to_string(),
            json!(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        );
    }

    write_json(state.store.as_ref(), "settings", &settings).await?;
    info!("Updated site settings");
    Ok(Json(json!({ "message": "设置更新成功", "settings": settings })))
}

pub async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let keywords: Vec<Keyword> = read_vec(state.store.as_ref(), "keywords").await;
    let news: Vec<Article> = read_vec(state.store.as_ref(), "news").await;
    let high_importance = news.iter().filter(|a| a.importance_score >= 8).count();

    Json(json!({
        "keywords": keywords.len(),
        "news": news.len(),
        "dailyNews": news.len(),
        "highImportanceNews": high_importance,
    }))
}

pub async fn backup(
    State(state): State<AppState>,
    _admin: RequireAdmin,
) -> Json<serde_json::Value> {
    let keywords: Vec<Keyword> = read_vec(state.store.as_ref(), "keywords").await;
    let news: Vec<Article> = read_vec(state.store.as_ref(), "news").await;
    Json(json!({
        "keywords": keywords,
        "news": news,
        "timestamp": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "version": "1.0.0",
    }))
}

#[derive(Debug, serde::Deserialize)]
pub struct RestoreRequest {
    pub keywords: Option<Vec<Keyword>>,
    pub news: Option<Vec<Article>>,
}

pub async fn restore(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Json(body): Json<RestoreRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(keywords) = body.keywords {
        write_json(state.store.as_ref(), "keywords", &keywords).await?;
        state.keywords_cache.invalidate();
    }
    if let Some(news) = body.news {
        write_json(state.store.as_ref(), "news", &news).await?;
    }
    info!("Restored data from backup");
    Ok(Json(json!({ "message": "数据恢复成功" })))
}
