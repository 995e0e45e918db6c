//! IP rate limiting and ban store for the AI chat proxy.
//!
//! Calls are counted per source IP over a sliding window and persisted in
//! `api-calls.json`; exceeding the limit promotes the IP into a timed ban in
//! `banned-ips.json`. Counting is file-backed rather than in-memory because
//! the process restarts frequently; concurrent requests from one IP can race
//! on the read-modify-write, an accepted inconsistency at this traffic level.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::models::{ApiCallRecord, BanRecord};
use crate::store::{read_vec, write_json, DocumentStore, StoreError};
use crate::web::AppState;

const BANNED_IPS_KEY: &str = "banned-ips";
const API_CALLS_KEY: &str = "api-calls";

/// Rate-limit policy: `max_calls` per `window`, escalating to a ban of
/// `ban_duration`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub max_calls: usize,
    pub window: Duration,
    pub ban_duration: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_calls: 10,
            window: Duration::from_secs(3600),
            ban_duration: Duration::from_secs(86_400),
        }
    }
}

impl RateLimitPolicy {
    fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }

    fn ban_ms(&self) -> i64 {
        i64::try_from(self.ban_duration.as_millis()).unwrap_or(i64::MAX)
    }
}

/// File-persisted call counter and ban store.
#[derive(Clone)]
pub struct SecurityService {
    store: Arc<dyn DocumentStore>,
    policy: RateLimitPolicy,
}

impl SecurityService {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, policy: RateLimitPolicy) -> Self {
        Self { store, policy }
    }

    #[must_use]
    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Record one call from `ip` and return its in-window count.
    ///
    /// Prunes records older than the window across all IPs first, which
    /// bounds file growth.
    pub async fn record_api_call(&self, ip: &str, now_ms: i64) -> usize {
        let calls: Vec<ApiCallRecord> = read_vec(self.store.as_ref(), API_CALLS_KEY).await;
        let mut valid: Vec<ApiCallRecord> = calls
            .into_iter()
            .filter(|c| now_ms - c.timestamp < self.policy.window_ms())
            .collect();
        valid.push(ApiCallRecord {
            ip: ip.to_string(),
            timestamp: now_ms,
            id: now_ms,
        });

        if let Err(e) = write_json(self.store.as_ref(), API_CALLS_KEY, &valid).await {
            // Fail open: a broken counter file must not take the endpoint down.
            error!("Failed to persist API call records: {e}");
        }

        valid.iter().filter(|c| c.ip == ip).count()
    }

    /// In-window call records, for the admin stats endpoint.
    pub async fn recent_calls(&self, now_ms: i64) -> Vec<ApiCallRecord> {
        let calls: Vec<ApiCallRecord> = read_vec(self.store.as_ref(), API_CALLS_KEY).await;
        calls
            .into_iter()
            .filter(|c| now_ms - c.timestamp < self.policy.window_ms())
            .collect()
    }

    /// The active ban for `ip`, if any.
    pub async fn active_ban(&self, ip: &str, now_ms: i64) -> Option<BanRecord> {
        let bans: Vec<BanRecord> = read_vec(self.store.as_ref(), BANNED_IPS_KEY).await;
        bans.into_iter()
            .find(|b| b.ip == ip && b.is_active(now_ms))
    }

    /// All currently active bans.
    pub async fn active_bans(&self, now_ms: i64) -> Vec<BanRecord> {
        let bans: Vec<BanRecord> = read_vec(self.store.as_ref(), BANNED_IPS_KEY).await;
        bans.into_iter().filter(|b| b.is_active(now_ms)).collect()
    }

    /// Insert a ban record. No-op (returns `false`) while a ban for the same
    /// IP is still active.
    ///
    /// # Errors
    ///
    /// Propagates write failures.
    pub async fn ban_ip(
        &self,
        ip: &str,
        reason: &str,
        duration_ms: Option<i64>,
        call_count: i64,
        manual: bool,
        now_ms: i64,
    ) -> Result<Option<BanRecord>, StoreError> {
        let mut bans: Vec<BanRecord> = read_vec(self.store.as_ref(), BANNED_IPS_KEY).await;
        if bans.iter().any(|b| b.ip == ip && b.is_active(now_ms)) {
            info!(ip, "IP already banned, skipping duplicate ban");
            return Ok(None);
        }

        let record = BanRecord {
            id: now_ms,
            ip: ip.to_string(),
            reason: reason.to_string(),
            banned_at: now_ms,
            banned_until: now_ms + duration_ms.unwrap_or_else(|| self.policy.ban_ms()),
            call_count,
            manual_ban: manual,
        };
        bans.push(record.clone());
        write_json(self.store.as_ref(), BANNED_IPS_KEY, &bans).await?;
        warn!(ip, reason, banned_until = %format_ban_time(record.banned_until), "Banned IP");
        Ok(Some(record))
    }

    /// Remove every ban record for `ip`, active or not.
    ///
    /// # Errors
    ///
    /// Propagates write failures; `NotFound` when no record matched.
    pub async fn unban_ip(&self, ip: &str) -> Result<usize, StoreError> {
        let bans: Vec<BanRecord> = read_vec(self.store.as_ref(), BANNED_IPS_KEY).await;
        let original = bans.len();
        let remaining: Vec<BanRecord> = bans.into_iter().filter(|b| b.ip != ip).collect();
        if remaining.len() == original {
            return Err(StoreError::NotFound(format!("ban record for {ip}")));
        }
        let removed = original - remaining.len();
        write_json(self.store.as_ref(), BANNED_IPS_KEY, &remaining).await?;
        Ok(removed)
    }

    /// Drop expired ban records and out-of-window call records.
    pub async fn cleanup_expired(&self, now_ms: i64) {
        let bans: Vec<BanRecord> = read_vec(self.store.as_ref(), BANNED_IPS_KEY).await;
        let active: Vec<BanRecord> = bans
            .iter()
            .filter(|b| b.is_active(now_ms))
            .cloned()
            .collect();
        if active.len() != bans.len() {
            let removed = bans.len() - active.len();
            match write_json(self.store.as_ref(), BANNED_IPS_KEY, &active).await {
                Ok(()) => info!(removed, "Cleaned up expired ban records"),
                Err(e) => error!("Failed to clean up ban records: {e}"),
            }
        }

        let calls: Vec<ApiCallRecord> = read_vec(self.store.as_ref(), API_CALLS_KEY).await;
        let valid: Vec<ApiCallRecord> = calls
            .iter()
            .filter(|c| now_ms - c.timestamp < self.policy.window_ms())
            .cloned()
            .collect();
        if valid.len() != calls.len() {
            let removed = calls.len() - valid.len();
            match write_json(self.store.as_ref(), API_CALLS_KEY, &valid).await {
                Ok(()) => info!(removed, "Cleaned up stale API call records"),
                Err(e) => error!("Failed to clean up API call records: {e}"),
            }
        }
    }
}

/// Loopback and private-range IPs are exempt from counting and bans.
#[must_use]
pub fn is_local_ip(ip: &str) -> bool {
    ip == "127.0.0.1" || ip == "::1" || ip.starts_with("192.168.") || ip.starts_with("10.")
}

/// Current time as epoch milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Human-readable unban time for 403 bodies.
#[must_use]
pub fn format_ban_time(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map_or_else(|| ms.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

/// Proxy-reported source IP: first `x-forwarded-for` hop, else `x-real-ip`.
#[must_use]
pub fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next().map(str::trim) {
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Source IP of a request: the proxy-reported IP, else the socket peer
/// address.
#[must_use]
pub fn client_ip(req: &Request) -> String {
    if let Some(ip) = forwarded_ip(req.headers()) {
        return ip;
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |info| info.0.ip().to_string())
}

/// Middleware on every request: reject banned IPs with 403 and the
/// human-readable unban time.
pub async fn check_ip_ban(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let ip = client_ip(&req);
    if let Some(ban) = state.security.active_ban(&ip, now_ms()).await {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "IP地址已被封禁",
                "reason": ban.reason,
                "bannedUntil": format_ban_time(ban.banned_until),
                "message": "您的IP地址因违反使用规则已被暂时封禁，请联系管理员或稍后重试",
            })),
        )
            .into_response();
    }
    next.run(req).await
}

/// Middleware on the chat-proxy route only: count the call, ban past the
/// limit, and attach advisory headers when the caller is close to it.
pub async fn monitor_api_rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    if is_local_ip(&ip) {
        return next.run(req).await;
    }

    let now = now_ms();
    let policy = state.security.policy();
    let count = state.security.record_api_call(&ip, now).await;

    if count > policy.max_calls {
        warn!(ip, count, "IP exceeded AI API rate limit");
        let reason = format!(
            "在1小时内调用大模型API {count}次，超过限制({}次)",
            policy.max_calls
        );
        if let Err(e) = state
            .security
            .ban_ip(&ip, &reason, None, count as i64, false, now)
            .await
        {
            error!("Failed to persist ban record: {e}");
        }
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "API调用频率超限",
                "message": "您在短时间内的API调用次数超过限制，IP已被暂时封禁24小时",
                "callCount": count,
                "limit": policy.max_calls,
            })),
        )
            .into_response();
    }

    let near_limit = count as f64 >= policy.max_calls as f64 * 0.8;
    let remaining = policy.max_calls - count;
    let mut response = next.run(req).await;
    if near_limit {
        let headers = response.headers_mut();
        headers.insert("x-ratelimit-remaining", header_value(remaining));
        headers.insert("x-ratelimit-limit", header_value(policy.max_calls));
        headers.insert(
            "x-ratelimit-warning",
            HeaderValue::from_static("API call count is approaching the limit"),
        );
    }
    response
}

fn header_value(n: usize) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

/// Hourly sweep removing fully expired ban and call records, for the lifetime
/// of the process.
pub async fn run_cleanup_worker(
    service: SecurityService,
    interval: Duration,
    shutdown: CancellationToken,
) {
    info!(interval_secs = interval.as_secs(), "Starting security cleanup worker");

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; cleanup can wait a cycle

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                service.cleanup_expired(now_ms()).await;
            }
            () = shutdown.cancelled() => {
                info!("Security cleanup worker shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonFileStore;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> SecurityService {
        SecurityService::new(
            Arc::new(JsonFileStore::new(dir.path())),
            RateLimitPolicy::default(),
        )
    }

    #[test]
    fn test_forwarded_ip_header_precedence() {
        let mut headers = HeaderMap::new();
        assert!(forwarded_ip(&headers).is_none());

        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(forwarded_ip(&headers).as_deref(), Some("9.9.9.9"));

        // x-forwarded-for wins, first hop only.
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 5.6.7.8"));
        assert_eq!(forwarded_ip(&headers).as_deref(), Some("1.2.3.4"));

        headers.insert("x-forwarded-for", HeaderValue::from_static("  "));
        assert_eq!(forwarded_ip(&headers).as_deref(), Some("9.9.9.9"));
    }

    #[test]
    fn test_is_local_ip() {
        assert!(is_local_ip("127.0.0.1"));
        assert!(is_local_ip("::1"));
        assert!(is_local_ip("192.168.1.50"));
        assert!(is_local_ip("10.0.0.7"));
        assert!(!is_local_ip("8.8.8.8"));
        assert!(!is_local_ip("172.16.0.1"));
    }

    #[tokio::test]
    async fn test_record_api_call_counts_per_ip() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let now = now_ms();

        assert_eq!(svc.record_api_call("1.2.3.4", now).await, 1);
        assert_eq!(svc.record_api_call("1.2.3.4", now + 1).await, 2);
        assert_eq!(svc.record_api_call("5.6.7.8", now + 2).await, 1);
    }

    #[tokio::test]
    async fn test_record_api_call_prunes_old_records() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let now = now_ms();

        svc.record_api_call("1.2.3.4", now).await;
        // One window later the old record is outside the window.
        let later = now + svc.policy.window_ms();
        assert_eq!(svc.record_api_call("1.2.3.4", later).await, 1);
        assert_eq!(svc.recent_calls(later).await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_ban_is_noop() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let now = now_ms();

        let first = svc
            .ban_ip("1.2.3.4", "abuse", None, 11, false, now)
            .await
            .unwrap();
        assert!(first.is_some());
        let second = svc
            .ban_ip("1.2.3.4", "abuse again", None, 12, false, now + 1)
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(svc.active_bans(now + 1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_ban_expires() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let now = now_ms();

        svc.ban_ip("1.2.3.4", "abuse", Some(1000), 11, false, now)
            .await
            .unwrap();
        assert!(svc.active_ban("1.2.3.4", now + 500).await.is_some());
        assert!(svc.active_ban("1.2.3.4", now + 1001).await.is_none());

        // Expired record can be replaced by a fresh ban.
        let renewed = svc
            .ban_ip("1.2.3.4", "again", None, 11, false, now + 1001)
            .await
            .unwrap();
        assert!(renewed.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_drops_expired_records() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let now = now_ms();

        svc.ban_ip("1.2.3.4", "abuse", Some(1000), 11, false, now)
            .await
            .unwrap();
        svc.record_api_call("1.2.3.4", now).await;

        svc.cleanup_expired(now + svc.policy.window_ms() + 1).await;
        let bans: Vec<BanRecord> = read_vec(svc.store.as_ref(), BANNED_IPS_KEY).await;
        assert!(bans.is_empty());
        let calls: Vec<ApiCallRecord> = read_vec(svc.store.as_ref(), API_CALLS_KEY).await;
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn test_unban_removes_all_records_for_ip() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let now = now_ms();

        svc.ban_ip("1.2.3.4", "abuse", Some(1), 11, false, now)
            .await
            .unwrap();
        svc.ban_ip("1.2.3.4", "again", None, 11, false, now + 5)
            .await
            .unwrap();
        assert_eq!(svc.unban_ip("1.2.3.4").await.unwrap(), 2);
        assert!(matches!(
            svc.unban_ip("1.2.3.4").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
