//! Streaming AI chat proxy.
//!
//! The upstream SSE byte stream is re-framed line by line: well-formed JSON
//! payloads pass through, `[DONE]` becomes `{"done":true}`, and malformed
//! frames are dropped. Errors after headers are sent can only be reported
//! in-band as an error frame.

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde_json::json;
use tracing::{error, info};

use crate::ai::{build_messages, classify_payload, sse_frame, ChatRequest, RelayFrame, SseLineBuffer};
use crate::web::AppState;

pub async fn chat(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> Response {
    if !state.chat_upstream.is_key_configured() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "API_KEY未配置",
                "message": "请在 .env 文件中配置 QWEN_API_KEY",
            })),
        )
            .into_response();
    }

    let Some(query) = body
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "参数错误",
                "message": "query 参数必须是非空字符串",
            })),
        )
            .into_response();
    };

    info!(stream = body.stream, "Proxying chat request");
    let messages = build_messages(&state.system_prompt, query);
    let mut payload = json!({
        "model": state.chat_upstream.model,
        "messages": messages,
        "temperature": body.temperature,
        "max_tokens": body.max_tokens,
        "stream": body.stream,
    });
    if body.stream {
        payload["stream_options"] = json!({ "include_usage": true });
    }

    let request = state
        .http
        .post(&state.chat_upstream.api_url)
        .bearer_auth(state.chat_upstream.api_key.as_deref().unwrap_or_default())
        .json(&payload);

    if body.stream {
        stream_chat(request).await
    } else {
        forward_chat(request).await
    }
}

async fn stream_chat(request: reqwest::RequestBuilder) -> Response {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            error!("Upstream connection failed: {e}");
            return sse_error_response("上游服务连接失败");
        }
    };

    let status = response.status();
    if !status.is_success() {
        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| "API请求失败".to_string());
        error!(status = %status, "Upstream rejected chat request: {message}");
        return sse_error_response(&message);
    }

    let mut upstream = response.bytes_stream();
    let relay = async_stream::stream! {
        let mut buffer = SseLineBuffer::new();
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    for payload in buffer.push(&bytes) {
                        match classify_payload(&payload) {
                            RelayFrame::Json(value) => {
                                yield Ok::<Bytes, Infallible>(Bytes::from(sse_frame(&value)));
                            }
                            RelayFrame::Done => {
                                yield Ok(Bytes::from(sse_frame("{\"done\":true}")));
                            }
                            RelayFrame::Drop => {}
                        }
                    }
                }
                Err(e) => {
                    // Headers are already out; report in-band and stop.
                    error!("Upstream stream failed mid-flight: {e}");
                    let frame = json!({ "error": "流式传输中断" }).to_string();
                    yield Ok(Bytes::from(sse_frame(&frame)));
                    break;
                }
            }
        }
    };

    sse_response(Body::from_stream(relay))
}

/// Non-streaming mode: forward the upstream status and body verbatim.
async fn forward_chat(request: reqwest::RequestBuilder) -> Response {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            error!("Upstream request failed: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "服务器错误", "message": e.to_string() })),
            )
                .into_response();
        }
    };

    let status = StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let body = response.bytes().await.unwrap_or_default();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

fn sse_response(body: Body) -> Response {
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// A valid SSE response carrying a single error frame, for failures that
/// happen before any upstream bytes arrive.
fn sse_error_response(message: &str) -> Response {
    let frame = json!({ "error": message }).to_string();
    sse_response(Body::from(sse_frame(&frame)))
}
