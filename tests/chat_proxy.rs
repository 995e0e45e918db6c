//! Streaming chat proxy against a mock upstream.

mod common;

use axum::http::StatusCode;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{spawn_app, TestApp, TestOptions};

async fn app_with_upstream(server: &MockServer) -> TestApp {
    spawn_app(TestOptions {
        chat_url: format!("{}/v1/chat/completions", server.uri()),
        ..Default::default()
    })
    .await
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn relays_frames_translates_done_and_drops_malformed() {
    let server = MockServer::start().await;
    let upstream_body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"你\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"好\"}}]}\n\n",
        "data: {broken\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(upstream_body, "text/event-stream"),
        )
        .mount(&server)
        .await;

    let app = app_with_upstream(&server).await;
    let response = app
        .raw_request("POST", "/api/ai/chat", None, Some(json!({ "query": "你好" })), &[])
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let body = body_string(response).await;
    assert!(body.contains("data: {\"choices\":[{\"delta\":{\"content\":\"你\"}}]}\n\n"));
    assert!(body.contains("\"content\":\"好\""));
    assert!(body.contains("data: {\"done\":true}\n\n"));
    assert!(!body.contains("broken"));
}

#[tokio::test]
async fn upstream_error_becomes_an_inband_sse_frame() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "message": "Incorrect API key provided" }
        })))
        .mount(&server)
        .await;

    let app = app_with_upstream(&server).await;
    let response = app
        .raw_request("POST", "/api/ai/chat", None, Some(json!({ "query": "hi" })), &[])
        .await;
    // Errors before the stream starts still produce a valid SSE response.
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("Incorrect API key provided"));
}

#[tokio::test]
async fn non_streaming_mode_forwards_status_and_body_verbatim() {
    let server = MockServer::start().await;
    let upstream = json!({
        "choices": [{ "message": { "role": "assistant", "content": "你好" } }]
    });
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream.clone()))
        .mount(&server)
        .await;

    let app = app_with_upstream(&server).await;
    let (status, body) = app
        .request(
            "POST",
            "/api/ai/chat",
            None,
            Some(json!({ "query": "hi", "stream": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, upstream);
}

#[tokio::test]
async fn non_streaming_upstream_errors_pass_through() {
    let server = MockServer::start().await;
    let upstream = json!({ "error": { "message": "rate limited" } });
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(upstream.clone()))
        .mount(&server)
        .await;

    let app = app_with_upstream(&server).await;
    let (status, body) = app
        .request(
            "POST",
            "/api/ai/chat",
            None,
            Some(json!({ "query": "hi", "stream": false })),
        )
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, upstream);
}

#[tokio::test]
async fn blank_query_is_rejected() {
    let server = MockServer::start().await;
    let app = app_with_upstream(&server).await;

    for payload in [json!({}), json!({ "query": "   " })] {
        let (status, body) = app.request("POST", "/api/ai/chat", None, Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "参数错误");
    }
}

#[tokio::test]
async fn missing_api_key_is_a_server_error() {
    let app = spawn_app(TestOptions {
        chat_key: None,
        ..Default::default()
    })
    .await;
    let (status, body) = app
        .request("POST", "/api/ai/chat", None, Some(json!({ "query": "hi" })))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "API_KEY未配置");
}
