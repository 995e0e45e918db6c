//! Upstream chat-completions plumbing for the AI chat proxy and the weekly
//! keyword job.
//!
//! The proxy never interprets model output; it only re-frames the upstream
//! SSE byte stream. The line buffering lives in [`SseLineBuffer`] so it can
//! be tested without a live connection.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default assistant prompt used when no prompt file is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "你是一个专业的AI助手，擅长回答用户关于AI、人工智能、机器学习等相关问题。请用简洁、准确、专业的方式回答。";

/// Placeholder key shipped in `.env.example`; treated as unconfigured.
const PLACEHOLDER_API_KEY: &str = "sk-your-qwen-api-key-here";

/// Upstream chat-completions endpoint settings.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
}

impl UpstreamConfig {
    /// Whether a usable API key is configured (present and not the
    /// `.env.example` placeholder).
    #[must_use]
    pub fn is_key_configured(&self) -> bool {
        self.api_key
            .as_deref()
            .is_some_and(|k| !k.is_empty() && k != PLACEHOLDER_API_KEY)
    }
}

/// Load the fixed system prompt from disk, falling back to the default.
pub async fn load_system_prompt(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(prompt) => {
            info!(path = %path.display(), "Loaded system prompt");
            prompt
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "System prompt file not found, using default");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
        Err(e) => {
            warn!(path = %path.display(), "Failed to read system prompt, using default: {e}");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}

/// Chat proxy request body. Defaults are encoded here, once.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_stream() -> bool {
    true
}

/// One chat-completions message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// The fixed system prompt plus the user's query.
#[must_use]
pub fn build_messages(system_prompt: &str, query: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: "system",
            content: system_prompt.to_string(),
        },
        ChatMessage {
            role: "user",
            content: query.trim().to_string(),
        },
    ]
}

/// Line-buffering state machine for an SSE byte stream.
///
/// Bytes are pushed in arbitrary chunks; complete `data:` payloads come out.
/// A trailing partial line (or partial UTF-8 sequence) stays buffered until
/// the next chunk completes it.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every complete `data:` payload it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(payload) = line.strip_prefix("data: ") {
                payloads.push(payload.to_string());
            }
        }
        payloads
    }
}

/// Interpretation of one upstream SSE payload by the relay.
#[derive(Debug, PartialEq, Eq)]
pub enum RelayFrame {
    /// Well-formed JSON, re-emitted verbatim.
    Json(String),
    /// The upstream `[DONE]` sentinel, translated to `{"done":true}`.
    Done,
    /// Malformed JSON, silently dropped.
    Drop,
}

/// Classify an upstream payload. Framing integrity only; the model's output
/// is never semantically validated.
#[must_use]
pub fn classify_payload(payload: &str) -> RelayFrame {
    if payload == "[DONE]" {
        return RelayFrame::Done;
    }
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => RelayFrame::Json(value.to_string()),
        Err(_) => RelayFrame::Drop,
    }
}

/// Format one outgoing SSE frame.
#[must_use]
pub fn sse_frame(payload: &str) -> String {
    format!("data: {payload}\n\n")
}
