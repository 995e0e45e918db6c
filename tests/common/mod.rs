//! Shared harness: an app wired to a temp data directory, with knobs for the
//! upstream URLs and the rate-limit policy.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use tempfile::TempDir;
use tower::ServiceExt;

use newsdesk::ai::UpstreamConfig;
use newsdesk::archive::ArchiveManager;
use newsdesk::auth::{hash_password, issue_token};
use newsdesk::config::Config;
use newsdesk::jobs::weekly_keywords::WeeklyKeywordsJob;
use newsdesk::models::Admin;
use newsdesk::security::{RateLimitPolicy, SecurityService};
use newsdesk::store::{write_json, DocumentStore, JsonFileStore};
use newsdesk::web::keywords_cache::KeywordsCache;
use newsdesk::web::{create_app, AppState};

pub const JWT_SECRET: &str = "test-secret";

pub struct TestOptions {
    pub chat_key: Option<String>,
    pub chat_url: String,
    pub weekly_key: Option<String>,
    pub weekly_url: String,
    pub max_calls: usize,
    pub keyword_count: usize,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            chat_key: Some("sk-test".to_string()),
            chat_url: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            weekly_key: Some("sk-test".to_string()),
            weekly_url: "http://127.0.0.1:9/chat/completions".to_string(),
            max_calls: 10,
            keyword_count: 5,
        }
    }
}

pub struct TestApp {
    pub app: Router,
    pub store: Arc<dyn DocumentStore>,
    pub token: String,
    // Held for the lifetime of the test so the data directory survives.
    pub dir: TempDir,
}

pub async fn spawn_app(options: TestOptions) -> TestApp {
    let dir = TempDir::new().expect("temp dir");
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(data_dir.join("archive/daily")).expect("data dirs");

    let config = Arc::new(Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        data_dir: data_dir.clone(),
        static_root: None,
        reports_dir: dir.path().join("reports"),
        system_prompt_path: dir.path().join("prompt.txt"),
        jwt_secret: JWT_SECRET.to_string(),
        default_admin_username: None,
        default_admin_password: None,
        default_admin_role: "super_admin".to_string(),
        chat_api_key: options.chat_key.clone(),
        chat_api_url: options.chat_url.clone(),
        chat_model: "qwen-plus".to_string(),
        weekly_api_key: options.weekly_key.clone(),
        weekly_api_url: options.weekly_url.clone(),
        weekly_model: "deepseek-chat".to_string(),
        weekly_keyword_count: options.keyword_count,
        weekly_run_hour: 8,
        weekly_run_minute: 0,
        weekly_model_timeout: Duration::from_secs(5),
        weekly_run_on_startup: false,
        rate_limit_max_calls: options.max_calls,
        rate_limit_window: Duration::from_secs(3600),
        rate_limit_ban_duration: Duration::from_secs(86_400),
    });

    let store: Arc<dyn DocumentStore> = Arc::new(JsonFileStore::new(&data_dir));
    let admin = Admin {
        id: 1,
        username: "admin".to_string(),
        password_hash: hash_password("admin123").expect("hash"),
        role: "super_admin".to_string(),
        created_at: Utc::now().to_rfc3339(),
    };
    write_json(store.as_ref(), "admins", &vec![admin])
        .await
        .expect("seed admins");

    let security = SecurityService::new(
        store.clone(),
        RateLimitPolicy {
            max_calls: config.rate_limit_max_calls,
            window: config.rate_limit_window,
            ban_duration: config.rate_limit_ban_duration,
        },
    );
    let weekly_job = WeeklyKeywordsJob::new(
        store.clone(),
        data_dir.clone(),
        UpstreamConfig {
            api_key: options.weekly_key,
            api_url: options.weekly_url,
            model: "deepseek-chat".to_string(),
        },
        "test prompt".to_string(),
        options.keyword_count,
        8,
        0,
        Duration::from_secs(5),
    );

    let state = AppState {
        config,
        store: store.clone(),
        archive: ArchiveManager::new(store.clone(), data_dir),
        security,
        keywords_cache: Arc::new(KeywordsCache::default()),
        chat_upstream: Arc::new(UpstreamConfig {
            api_key: options.chat_key,
            api_url: options.chat_url,
            model: "qwen-plus".to_string(),
        }),
        system_prompt: Arc::new("test prompt".to_string()),
        weekly_job,
        http: reqwest::Client::new(),
    };

    let addr: SocketAddr = "192.0.2.10:4000".parse().expect("addr");
    let app = create_app(state).layer(MockConnectInfo(addr));
    let token = issue_token(JWT_SECRET, 1, "admin", "super_admin").expect("token");

    TestApp {
        app,
        store,
        token,
        dir,
    }
}

impl TestApp {
    /// Send one JSON request and return `(status, parsed body)`.
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let response = self.raw_request(method, uri, token, body, &[]).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, value)
    }

    pub async fn raw_request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        self.app.clone().oneshot(request).await.expect("response")
    }
}
