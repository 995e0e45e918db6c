//! Rate limiting, automatic bans, and manual ban management.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{spawn_app, TestOptions};
use newsdesk::store::write_json;

fn unconfigured_chat() -> TestOptions {
    TestOptions {
        chat_key: None,
        max_calls: 3,
        ..Default::default()
    }
}

#[tokio::test]
async fn exceeding_the_call_limit_bans_the_ip() {
    let app = spawn_app(unconfigured_chat()).await;
    let headers = [("x-forwarded-for", "203.0.113.5")];

    // Calls under the limit reach the handler (which 500s: no API key).
    for _ in 0..3 {
        let response = app
            .raw_request(
                "POST",
                "/api/ai/chat",
                None,
                Some(json!({ "query": "hi" })),
                &headers,
            )
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    // The call past the limit is rejected and triggers the ban.
    let response = app
        .raw_request(
            "POST",
            "/api/ai/chat",
            None,
            Some(json!({ "query": "hi" })),
            &headers,
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "API调用频率超限");
    assert_eq!(body["callCount"], 4);
    assert_eq!(body["limit"], 3);

    // Every subsequent request from that IP hits the ban wall.
    let response = app
        .raw_request("GET", "/api/news", None, None, &headers)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "IP地址已被封禁");

    // Other IPs are unaffected.
    let response = app
        .raw_request("GET", "/api/news", None, None, &[("x-forwarded-for", "198.51.100.9")])
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn local_ips_are_exempt_from_rate_limiting() {
    let app = spawn_app(unconfigured_chat()).await;
    for ip in ["127.0.0.1", "192.168.1.20", "10.0.0.3"] {
        for _ in 0..5 {
            let response = app
                .raw_request(
                    "POST",
                    "/api/ai/chat",
                    None,
                    Some(json!({ "query": "hi" })),
                    &[("x-forwarded-for", ip)],
                )
                .await;
            // Never 403: the counter is skipped entirely.
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
}

#[tokio::test]
async fn manual_ban_lifecycle() {
    let app = spawn_app(TestOptions::default()).await;
    let ip = "198.51.100.7";

    let (status, body) = app
        .request(
            "POST",
            "/api/banned-ips",
            Some(&app.token),
            Some(json!({ "ip": ip, "reason": "滥用", "duration": 2 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "IP已成功封禁");

    // The banned IP is locked out immediately.
    let response = app
        .raw_request("GET", "/api/news", None, None, &[("x-forwarded-for", ip)])
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Listed with stats.
    let (_, listing) = app.request("GET", "/api/banned-ips", Some(&app.token), None).await;
    assert_eq!(listing["stats"]["totalBanned"], 1);
    assert_eq!(listing["bannedIPs"][0]["ip"], ip);
    assert_eq!(listing["bannedIPs"][0]["manualBan"], true);

    // Double-ban is rejected while active.
    let (status, body) = app
        .request(
            "POST",
            "/api/banned-ips",
            Some(&app.token),
            Some(json!({ "ip": ip })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("该IP已被封禁"));

    // Unban restores access.
    let (status, body) = app
        .request("DELETE", &format!("/api/banned-ips/{ip}"), Some(&app.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 1);
    let response = app
        .raw_request("GET", "/api/news", None, None, &[("x-forwarded-for", ip)])
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // A second unban finds nothing.
    let (status, _) = app
        .request("DELETE", &format!("/api/banned-ips/{ip}"), Some(&app.token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ban_requires_an_ip() {
    let app = spawn_app(TestOptions::default()).await;
    let (status, body) = app
        .request("POST", "/api/banned-ips", Some(&app.token), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "IP地址不能为空");
}

#[tokio::test]
async fn call_stats_aggregate_per_ip() {
    let app = spawn_app(unconfigured_chat()).await;
    for _ in 0..2 {
        app.raw_request(
            "POST",
            "/api/ai/chat",
            None,
            Some(json!({ "query": "hi" })),
            &[("x-forwarded-for", "203.0.113.80")],
        )
        .await;
    }

    let (status, stats) = app
        .request("GET", "/api/api-calls/stats", Some(&app.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["totalCalls"], 2);
    assert_eq!(stats["uniqueIPs"], 1);
    assert_eq!(stats["ipStats"][0]["ip"], "203.0.113.80");
    assert_eq!(stats["ipStats"][0]["callCount"], 2);
    assert_eq!(stats["limit"], 3);
}

#[tokio::test]
async fn call_stats_count_unique_ips_beyond_the_display_cap() {
    let app = spawn_app(TestOptions::default()).await;
    let now = chrono::Utc::now().timestamp_millis();
    let calls: Vec<serde_json::Value> = (0..55)
        .map(|i| json!({ "ip": format!("203.0.113.{i}"), "timestamp": now, "id": now + i }))
        .collect();
    write_json(app.store.as_ref(), "api-calls", &calls).await.unwrap();

    let (status, stats) = app
        .request("GET", "/api/api-calls/stats", Some(&app.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["totalCalls"], 55);
    // The listing is capped at 50 entries; the unique count is not.
    assert_eq!(stats["uniqueIPs"], 55);
    assert_eq!(stats["ipStats"].as_array().unwrap().len(), 50);
}

#[tokio::test]
async fn security_endpoints_require_auth() {
    let app = spawn_app(TestOptions::default()).await;
    let (status, _) = app.request("GET", "/api/banned-ips", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.request("GET", "/api/api-calls/stats", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
