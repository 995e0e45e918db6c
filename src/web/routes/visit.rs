//! Visitor tracking and province statistics.
//!
//! Geolocation is a best-effort call to the Taobao IP service; any failure
//! degrades to `未知` rather than failing the tracking request.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::auth::RequireAdmin;
use crate::models::VisitLog;
use crate::security::{forwarded_ip, is_local_ip};
use crate::store::{read_vec, write_json};
use crate::web::error::ApiError;
use crate::web::AppState;

const LOGS_KEY: &str = "visit-logs";
const GEO_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn track(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ip = forwarded_ip(&headers).unwrap_or_else(|| addr.ip().to_string());
    let user_agent = headers
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let now = Utc::now();
    let today = now.format("%Y-%m-%d").to_string();
    let mut logs: Vec<VisitLog> = read_vec(state.store.as_ref(), LOGS_KEY).await;

    // At most one log per IP per day.
    if let Some(existing) = logs
        .iter()
        .find(|l| l.ip == ip && l.date.starts_with(&today))
    {
        return Ok(Json(json!({ "success": true, "province": existing.province })));
    }

    let (province, country) = if is_local_ip(&ip) {
        ("本地".to_string(), "本地".to_string())
    } else {
        lookup_province(&state.http, &ip).await
    };

    logs.push(VisitLog {
        id: now.timestamp_millis(),
        ip,
        province: province.clone(),
        country,
        date: now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        user_agent,
    });
    write_json(state.store.as_ref(), LOGS_KEY, &logs).await?;
    info!(province = %province, "Tracked visit");

    Ok(Json(json!({ "success": true, "province": province })))
}

pub async fn province_stats(
    State(state): State<AppState>,
    _admin: RequireAdmin,
) -> Json<serde_json::Value> {
    let logs: Vec<VisitLog> = read_vec(state.store.as_ref(), LOGS_KEY).await;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for log in &logs {
        *counts.entry(log.province.clone()).or_default() += 1;
    }
    let mut stats: Vec<serde_json::Value> = counts
        .into_iter()
        .map(|(province, count)| json!({ "province": province, "count": count }))
        .collect();
    stats.sort_by(|a, b| {
        b["count"]
            .as_u64()
            .unwrap_or(0)
            .cmp(&a["count"].as_u64().unwrap_or(0))
    });

    Json(json!({
        "total": logs.len(),
        "provinceStats": stats,
        "timestamp": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub province: Option<String>,
}

pub async fn logs(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Query(query): Query<LogsQuery>,
) -> Json<serde_json::Value> {
    let mut logs: Vec<VisitLog> = read_vec(state.store.as_ref(), LOGS_KEY).await;
    if let Some(province) = query.province.as_deref().filter(|p| !p.is_empty()) {
        logs.retain(|l| l.province == province);
    }
    logs.sort_by(|a, b| b.date.cmp(&a.date));

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let total = logs.len();
    let total_pages = total.div_ceil(limit);
    let items: Vec<VisitLog> = logs
        .into_iter()
        .skip((page - 1) * limit)
        .take(limit)
        .collect();

    Json(json!({
        "logs": items,
        "pagination": { "page": page, "limit": limit, "total": total, "totalPages": total_pages },
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanupQuery {
    pub days: Option<i64>,
}

pub async fn cleanup_logs(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let days = query.days.unwrap_or(30).max(1);
    let cutoff = (Utc::now() - chrono::Duration::days(days))
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

    let logs: Vec<VisitLog> = read_vec(state.store.as_ref(), LOGS_KEY).await;
    let original = logs.len();
    let remaining: Vec<VisitLog> = logs.into_iter().filter(|l| l.date >= cutoff).collect();
    let deleted = original - remaining.len();
    write_json(state.store.as_ref(), LOGS_KEY, &remaining).await?;
    info!(deleted, days, "Cleaned up visit logs");

    Ok(Json(json!({
        "success": true,
        "deleted": deleted,
        "remaining": remaining.len(),
    })))
}

/// Resolve `(province, country)` for an IP. Never fails; unknown on any error.
async fn lookup_province(http: &reqwest::Client, ip: &str) -> (String, String) {
    let url = format!("https://ip.taobao.com/outGetIpInfo?ip={ip}&accessKey=alibaba-inc");
    let result = async {
        let response = http.get(&url).timeout(GEO_TIMEOUT).send().await.ok()?;
        let data: serde_json::Value = response.json().await.ok()?;
        if data["code"].as_i64() != Some(0) {
            return None;
        }
        let province = data["data"]["region"].as_str()?.trim().to_string();
        let country = data["data"]["country"]
            .as_str()
            .unwrap_or("未知")
            .to_string();
        if province.is_empty() {
            None
        } else {
            Some((province, country))
        }
    }
    .await;

    result.unwrap_or_else(|| {
        debug!(ip, "IP geolocation failed, recording as unknown");
        ("未知".to_string(), "未知".to_string())
    })
}
