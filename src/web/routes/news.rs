//! News endpoints: the live set, per-date reads, and batch import.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::archive::resolve_safe_archive_file;
use crate::auth::RequireAdmin;
use crate::models::{Article, ArticleRequest};
use crate::store::{read_or, read_vec, write_json};
use crate::web::error::ApiError;
use crate::web::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct NewsQuery {
    pub category: Option<String>,
    pub country: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

/// Today's news, importance-sorted. Falls back to a loose daily file when an
/// upload script wrote one instead of the live set.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<NewsQuery>,
) -> Json<Vec<Article>> {
    let mut news: Vec<Article> = read_vec(state.store.as_ref(), "news").await;

    // The live set may still hold only un-archived older articles; the loose
    // file wins whenever the live set has nothing from today.
    let today = Utc::now().format("%Y-%m-%d").to_string();
    if !news.iter().any(|a| a.created_date() == today) {
        if let Some(loose) = state.archive.loose_file_for_date(&today).await {
            news = loose;
        }
    }

    let display_limit = match query.limit {
        Some(limit) => limit,
        None => {
            let settings: serde_json::Value =
                read_or(state.store.as_ref(), "settings", json!({})).await;
            settings["todayNewsDisplayCount"]
                .as_u64()
                .map_or(20, |n| n as usize)
        }
    };

    let filtered = filter_and_sort(news, query.category.as_deref(), query.country.as_deref());
    let page: Vec<Article> = filtered
        .into_iter()
        .skip(query.offset)
        .take(display_limit)
        .collect();
    Json(page)
}

/// Dates with any news, newest first, with per-date counts.
pub async fn dates(State(state): State<AppState>) -> impl IntoResponse {
    let dates = state.archive.available_dates().await;
    (no_store_headers(), Json(json!({ "dates": dates })))
}

/// Merged view of one date across archive, loose files, and the live set.
pub async fn by_date(
    State(state): State<AppState>,
    Path(date): Path<String>,
    Query(query): Query<NewsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    // The date doubles as a file stem; reject anything that could escape.
    if resolve_safe_archive_file(state.archive.daily_dir(), &date).is_none() {
        return Err(ApiError::bad_request("无效的日期参数"));
    }

    let news = state.archive.news_for_date(&date).await;
    let filtered = filter_and_sort(news, query.category.as_deref(), query.country.as_deref());
    Ok((no_store_headers(), Json(filtered)))
}

/// Downloadable import template showing the expected article fields.
pub async fn template() -> impl IntoResponse {
    let template = json!({
        "articles": [{
            "title": "示例新闻标题",
            "key_point": "一句话要点",
            "summary": "新闻摘要内容",
            "source_url": "https://example.com/article",
            "source_name": "示例来源",
            "category": "大模型",
            "sub_category": "发布",
            "country": "cn",
            "importance_score": 8,
            "published_at": "2025-01-15T08:00:00.000Z"
        }]
    });
    (
        [
            (header::CONTENT_TYPE, "application/json; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"news-template.json\"",
            ),
        ],
        Json(template),
    )
}

pub async fn create(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Json(body): Json<ArticleRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let article = body.materialize(Utc::now());
    let mut news: Vec<Article> = read_vec(state.store.as_ref(), "news").await;
    news.push(article.clone());
    write_json(state.store.as_ref(), "news", &news).await?;
    Ok(Json(json!({ "id": article.id, "message": "新闻添加成功" })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateArticle {
    pub title: Option<String>,
    pub key_point: Option<String>,
    pub summary: Option<String>,
    pub source_url: Option<String>,
    pub source_name: Option<String>,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub country: Option<String>,
    pub importance_score: Option<i64>,
    pub published_at: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(id): Path<String>,
    Json(body): Json<UpdateArticle>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut news: Vec<Article> = read_vec(state.store.as_ref(), "news").await;
    let Some(article) = news.iter_mut().find(|a| a.id == id) else {
        return Err(ApiError::not_found("新闻不存在"));
    };

    if let Some(title) = body.title {
        article.title = title;
    }
    if let Some(key_point) = body.key_point {
        article.key_point = key_point;
    }
    if let Some(summary) = body.summary {
        article.summary = summary;
    }
    if let Some(source_url) = body.source_url {
        article.source_url = source_url;
    }
    if let Some(source_name) = body.source_name {
        article.source_name = source_name;
    }
    if let Some(category) = body.category {
        article.category = category;
    }
    if let Some(sub_category) = body.sub_category {
        article.sub_category = sub_category;
    }
    if let Some(country) = body.country {
        article.country = country;
    }
    if let Some(score) = body.importance_score {
        article.importance_score = score;
    }
    if let Some(published_at) = body.published_at {
        article.published_at = published_at;
    }
    article.updated_at = Some(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true));

    write_json(state.store.as_ref(), "news", &news).await?;
    Ok(Json(json!({ "message": "新闻更新成功" })))
}

pub async fn remove(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let news: Vec<Article> = read_vec(state.store.as_ref(), "news").await;
    let remaining: Vec<Article> = news.into_iter().filter(|a| a.id != id).collect();
    write_json(state.store.as_ref(), "news", &remaining).await?;
    Ok(Json(json!({ "message": "新闻删除成功" })))
}

#[derive(Debug, Deserialize)]
pub struct BatchImportRequest {
    pub articles: Option<Vec<ArticleRequest>>,
}

/// Batch import: archive everything old first, then REPLACE the live set with
/// the incoming batch. The live file holds only today's import afterwards.
pub async fn batch_import(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Json(body): Json<BatchImportRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(articles) = body.articles else {
        return Err(ApiError::bad_request("新闻数据格式错误"));
    };

    let result = state.archive.archive_old_news().await?;

    let now = Utc::now();
    let imported: Vec<Article> = articles.into_iter().map(|a| a.materialize(now)).collect();
    write_json(state.store.as_ref(), "news", &imported).await?;
    info!(
        count = imported.len(),
        archived = result.archived,
        "Batch imported news"
    );

    Ok(Json(json!({
        "message": format!("成功导入 {} 篇新闻", imported.len()),
        "archived": result.archived,
        "todayCount": imported.len(),
    })))
}

fn filter_and_sort(
    mut news: Vec<Article>,
    category: Option<&str>,
    country: Option<&str>,
) -> Vec<Article> {
    if let Some(category) = category.filter(|c| !c.is_empty() && *c != "all") {
        news.retain(|a| a.category == category);
    }
    if let Some(country) = country.filter(|c| !c.is_empty() && *c != "all") {
        // Older frontend builds send the long form.
        let country = if country == "china" { "cn" } else { country };
        news.retain(|a| a.country == country);
    }
    news.sort_by(|a, b| b.importance_score.cmp(&a.importance_score));
    news
}

fn no_store_headers() -> [(header::HeaderName, &'static str); 3] {
    [
        (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
        (header::PRAGMA, "no-cache"),
        (header::EXPIRES, "0"),
    ]
}
