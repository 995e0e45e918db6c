//! AI tool catalog endpoints.

use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::RequireAdmin;
use crate::models::{Tool, ToolRequest};
use crate::store::{read_vec, write_json};
use crate::web::error::ApiError;
use crate::web::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ToolsQuery {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub region: Option<String>,
    pub price: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ToolsQuery>,
) -> Json<serde_json::Value> {
    let tools: Vec<Tool> = read_vec(state.store.as_ref(), "tools").await;
    let filtered = filter_tools(tools, &query);
    let sorted = sort_tools(filtered, query.sort.as_deref());

    let page = query.page.unwrap_or(1).clamp(1, 100_000);
    let limit = query.limit.unwrap_or(12).clamp(1, 100);
    let total = sorted.len();
    let total_pages = total.div_ceil(limit);
    let items: Vec<Tool> = sorted
        .into_iter()
        .skip((page - 1) * limit)
        .take(limit)
        .collect();

    Json(json!({
        "tools": items,
        "total": total,
        "page": page,
        "limit": limit,
        "totalPages": total_pages,
    }))
}

/// Category names from the curated `tool-categories.json` when present,
/// else derived from the catalog itself.
pub async fn categories(State(state): State<AppState>) -> Json<serde_json::Value> {
    let curated: Vec<String> = read_vec(state.store.as_ref(), "tool-categories").await;
    if !curated.is_empty() {
        return Json(json!({ "categories": curated }));
    }

    let tools: Vec<Tool> = read_vec(state.store.as_ref(), "tools").await;
    let categories: BTreeSet<String> = tools
        .into_iter()
        .flat_map(|t| t.categories)
        .filter(|c| !c.is_empty())
        .collect();
    Json(json!({ "categories": categories }))
}

pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Tool>, ApiError> {
    let tools: Vec<Tool> = read_vec(state.store.as_ref(), "tools").await;
    tools
        .into_iter()
        .find(|t| t.id == id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("工具不存在"))
}

pub async fn create(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Json(body): Json<ToolRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name_missing = body.name.as_deref().map_or(true, |s| s.trim().is_empty());
    let desc_missing = body.description.as_deref().map_or(true, |s| s.trim().is_empty());
    let site_missing = body.website.as_deref().map_or(true, |s| s.trim().is_empty());
    if name_missing || desc_missing || site_missing {
        return Err(ApiError::bad_request("缺少必填字段: name, description, website"));
    }

    // Interactive creation never trusts client-supplied ids or ratings.
    let request = ToolRequest {
        id: None,
        rating: None,
        featured: None,
        created_at: None,
        ..body
    };
    let tool = request.materialize(Utc::now());

    let mut tools: Vec<Tool> = read_vec(state.store.as_ref(), "tools").await;
    tools.push(tool.clone());
    write_json(state.store.as_ref(), "tools", &tools).await?;

    Ok(Json(json!({ "message": "工具添加成功", "tool": tool })))
}

/// Update merges arbitrary catalog fields; the document is patched as raw
/// JSON because importers attach vendor-specific extras the admin UI round
/// trips untouched.
pub async fn update(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tools: Vec<serde_json::Value> = read_vec(state.store.as_ref(), "tools").await;
    let Some(tool) = tools
        .iter_mut()
        .find(|t| t["id"].as_str() == Some(id.as_str()))
    else {
        return Err(ApiError::not_found("工具不存在"));
    };

    if let (Some(target), Some(patch)) = (tool.as_object_mut(), body.as_object()) {
        for (key, value) in patch {
            if key == "id" {
                continue;
            }
            target.insert(key.clone(), value.clone());
        }
        target.insert(
            "updated_at".to_string(),
            json!(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        );
    } else {
        return Err(ApiError::bad_request("工具数据格式错误"));
    }
    let updated = tool.clone();

    write_json(state.store.as_ref(), "tools", &tools).await?;
    Ok(Json(json!({ "message": "工具更新成功", "tool": updated })))
}

pub async fn remove(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tools: Vec<Tool> = read_vec(state.store.as_ref(), "tools").await;
    let original = tools.len();
    let remaining: Vec<Tool> = tools.into_iter().filter(|t| t.id != id).collect();
    if remaining.len() == original {
        return Err(ApiError::not_found("工具不存在"));
    }
    write_json(state.store.as_ref(), "tools", &remaining).await?;
    Ok(Json(json!({ "message": "工具删除成功" })))
}

#[derive(Debug, Deserialize)]
pub struct BatchImportRequest {
    pub tools: Option<Vec<ToolRequest>>,
}

pub async fn batch_import(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Json(body): Json<BatchImportRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(items) = body.tools else {
        return Err(ApiError::bad_request("工具数据格式错误"));
    };

    let now = Utc::now();
    let mut tools: Vec<Tool> = read_vec(state.store.as_ref(), "tools").await;
    let count = items.len();
    tools.extend(items.into_iter().map(|t| t.materialize(now)));
    write_json(state.store.as_ref(), "tools", &tools).await?;
    info!(count, "Batch imported tools");

    Ok(Json(json!({
        "message": format!("成功导入 {count} 个工具"),
        "count": count,
    })))
}

/// Logo upload is handled out-of-band by the deploy pipeline for now.
pub async fn upload_logo(_admin: RequireAdmin) -> Json<serde_json::Value> {
    Json(json!({ "message": "Logo上传功能待实现" }))
}

fn filter_tools(mut tools: Vec<Tool>, query: &ToolsQuery) -> Vec<Tool> {
    if let Some(category) = non_all(&query.category) {
        tools.retain(|t| t.categories.iter().any(|c| c == category));
    }
    if let Some(subcategory) = non_all(&query.subcategory) {
        tools.retain(|t| t.subcategories.iter().any(|c| c == subcategory));
    }
    if let Some(region) = non_all(&query.region) {
        if region == "双支持" {
            tools.retain(|t| t.region_support.len() > 1);
        } else {
            tools.retain(|t| {
                t.region == region || t.region_support.iter().any(|r| r == region)
            });
        }
    }
    if let Some(price) = non_all(&query.price) {
        tools.retain(|t| t.price.contains(price));
    }
    if let Some(search) = non_all(&query.search) {
        let needle = search.to_lowercase();
        tools.retain(|t| {
            t.name.to_lowercase().contains(&needle)
                || t.description.to_lowercase().contains(&needle)
                || t.tags.iter().any(|tag| tag.to_lowercase().contains(&needle))
        });
    }
    tools
}

fn sort_tools(mut tools: Vec<Tool>, sort: Option<&str>) -> Vec<Tool> {
    match sort {
        Some("name") => tools.sort_by(|a, b| a.name.cmp(&b.name)),
        Some("newest") => tools.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
        _ => tools.sort_by(|a, b| {
            b.rating
                .partial_cmp(&a.rating)
                .unwrap_or(std::cmp::Ordering::Equal)
        }),
    }
    tools
}

fn non_all(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != "all" && *v != "全部")
}
