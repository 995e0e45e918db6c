//! Ban management and rate-limit statistics endpoints.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::RequireAdmin;
use crate::security::{format_ban_time, now_ms};
use crate::store::StoreError;
use crate::web::error::ApiError;
use crate::web::AppState;

pub async fn list_bans(
    State(state): State<AppState>,
    _admin: RequireAdmin,
) -> Json<serde_json::Value> {
    let now = now_ms();
    let mut bans = state.security.active_bans(now).await;
    bans.sort_by(|a, b| b.banned_at.cmp(&a.banned_at));

    let day_ago = now - 24 * 3600 * 1000;
    let banned_last_24h = bans.iter().filter(|b| b.banned_at >= day_ago).count();
    let mut reasons: HashMap<String, usize> = HashMap::new();
    for ban in &bans {
        *reasons.entry(ban.reason.clone()).or_default() += 1;
    }

    let entries: Vec<serde_json::Value> = bans
        .iter()
        .map(|b| {
            let remaining_min = (b.banned_until - now).max(0) / 60_000;
            json!({
                "id": b.id,
                "ip": b.ip,
                "reason": b.reason,
                "bannedAt": format_ban_time(b.banned_at),
                "bannedUntil": format_ban_time(b.banned_until),
                "callCount": b.call_count,
                "manualBan": b.manual_ban,
                "remainingTime": format!("{remaining_min}分钟"),
                "isExpired": false,
            })
        })
        .collect();

    Json(json!({
        "bannedIPs": entries,
        "stats": {
            "totalBanned": bans.len(),
            "bannedInLast24h": banned_last_24h,
            "banReasons": reasons,
        },
        "timestamp": format_ban_time(now),
    }))
}

#[derive(Debug, Deserialize)]
pub struct BanRequest {
    pub ip: Option<String>,
    pub reason: Option<String>,
    /// Ban length in hours; defaults to the policy duration.
    pub duration: Option<i64>,
}

pub async fn create_ban(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Json(body): Json<BanRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(ip) = body.ip.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
        return Err(ApiError::bad_request("IP地址不能为空"));
    };

    let now = now_ms();
    if let Some(existing) = state.security.active_ban(&ip, now).await {
        return Err(ApiError::bad_request(format!(
            "该IP已被封禁，解封时间: {}",
            format_ban_time(existing.banned_until)
        )));
    }

    let reason = body
        .reason
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "管理员手动封禁".to_string());
    let duration_ms = body.duration.map(|hours| hours.max(1) * 3600 * 1000);
    let record = state
        .security
        .ban_ip(&ip, &reason, duration_ms, 0, true, now)
        .await?
        .ok_or_else(|| ApiError::bad_request("该IP已被封禁"))?;
    info!(ip = %record.ip, "Manually banned IP");

    Ok(Json(json!({
        "success": true,
        "message": "IP已成功封禁",
        "ip": record.ip,
        "bannedUntil": format_ban_time(record.banned_until),
    })))
}

pub async fn remove_ban(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(ip): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.security.unban_ip(&ip).await {
        Ok(deleted) => {
            info!(ip, deleted, "Unbanned IP");
            Ok(Json(json!({
                "success": true,
                "message": "IP已成功解封",
                "ip": ip,
                "deleted": deleted,
            })))
        }
        Err(StoreError::NotFound(_)) => Err(ApiError::not_found("未找到该IP的封禁记录")),
        Err(e) => Err(e.into()),
    }
}

pub async fn cleanup_bans(
    State(state): State<AppState>,
    _admin: RequireAdmin,
) -> Json<serde_json::Value> {
    let now = now_ms();
    state.security.cleanup_expired(now).await;
    let active = state.security.active_bans(now).await.len();
    Json(json!({
        "success": true,
        "message": "过期封禁记录已清理",
        "activeBans": active,
        "timestamp": format_ban_time(now),
    }))
}

/// Per-IP call counts within the rate-limit window, busiest first.
pub async fn call_stats(
    State(state): State<AppState>,
    _admin: RequireAdmin,
) -> Json<serde_json::Value> {
    let now = now_ms();
    let policy = state.security.policy();
    let calls = state.security.recent_calls(now).await;

    let mut per_ip: HashMap<String, (usize, i64, i64)> = HashMap::new();
    for call in &calls {
        let entry = per_ip
            .entry(call.ip.clone())
            .or_insert((0, call.timestamp, call.timestamp));
        entry.0 += 1;
        entry.1 = entry.1.min(call.timestamp);
        entry.2 = entry.2.max(call.timestamp);
    }

    let mut ip_stats: Vec<serde_json::Value> = per_ip
        .into_iter()
        .map(|(ip, (count, first, last))| {
            json!({
                "ip": ip,
                "callCount": count,
                "firstCall": format_ban_time(first),
                "lastCall": format_ban_time(last),
                "isNearLimit": count as f64 >= policy.max_calls as f64 * 0.8,
            })
        })
        .collect();
    ip_stats.sort_by(|a, b| {
        b["callCount"]
            .as_u64()
            .unwrap_or(0)
            .cmp(&a["callCount"].as_u64().unwrap_or(0))
    });
    let unique_ips = ip_stats.len();
    ip_stats.truncate(50);

    Json(json!({
        "totalCalls": calls.len(),
        "uniqueIPs": unique_ips,
        "ipStats": ip_stats,
        "timeWindow": format!("{}分钟", policy.window.as_secs() / 60),
        "limit": policy.max_calls,
    }))
}
