//! Weekly keyword regeneration through the force-refresh endpoint.

mod common;

use axum::http::StatusCode;
use chrono::{Duration, Local};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{spawn_app, TestApp, TestOptions};
use newsdesk::models::Keyword;
use newsdesk::store::{read_vec, write_json};

async fn app_with_model(server: &MockServer) -> TestApp {
    spawn_app(TestOptions {
        weekly_url: format!("{}/chat/completions", server.uri()),
        keyword_count: 5,
        ..Default::default()
    })
    .await
}

/// Model responses arrive as a chat completion whose content is itself JSON.
fn completion_with_keywords(count: usize) -> serde_json::Value {
    let keywords: Vec<serde_json::Value> = (0..count)
        .map(|i| json!({ "text": format!("关键词{i}"), "weight": (i % 10) + 1 }))
        .collect();
    let content = json!({ "keywords": keywords }).to_string();
    json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
}

async fn seed_yesterday_titles(app: &TestApp) {
    let yesterday = (Local::now() - Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();
    let articles = json!([
        { "id": "1", "title": "开源模型再突破", "summary": "s",
          "created_at": format!("{yesterday}T08:00:00.000Z") },
        { "id": "2", "title": "推理芯片新品", "summary": "s",
          "created_at": format!("{yesterday}T09:00:00.000Z") },
    ]);
    write_json(
        app.store.as_ref(),
        &format!("archive/daily/news-{yesterday}"),
        &articles,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn exact_count_replaces_the_keyword_set() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_with_keywords(5)))
        .mount(&server)
        .await;

    let app = app_with_model(&server).await;
    seed_yesterday_titles(&app).await;
    // Pre-existing keywords get replaced wholesale.
    let (_, _) = app
        .request(
            "POST",
            "/api/keywords",
            Some(&app.token),
            Some(json!({ "text": "过期词" })),
        )
        .await;

    let (status, body) = app
        .request("POST", "/api/keywords/refresh-weekly", Some(&app.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["keywordCount"], 5);
    assert_eq!(body["titleCount"], 2);

    let stored: Vec<Keyword> = read_vec(app.store.as_ref(), "keywords").await;
    assert_eq!(stored.len(), 5);
    assert!(stored.iter().all(|k| k.text != "过期词"));

    // The public listing reflects the replacement (cache was invalidated).
    let (_, listed) = app.request("GET", "/api/keywords", None, None).await;
    assert_eq!(listed.as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn wrong_count_fails_and_leaves_keywords_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_with_keywords(4)))
        .mount(&server)
        .await;

    let app = app_with_model(&server).await;
    seed_yesterday_titles(&app).await;
    let (_, _) = app
        .request(
            "POST",
            "/api/keywords",
            Some(&app.token),
            Some(json!({ "text": "保留词" })),
        )
        .await;

    let (status, _) = app
        .request("POST", "/api/keywords/refresh-weekly", Some(&app.token), None)
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let stored: Vec<Keyword> = read_vec(app.store.as_ref(), "keywords").await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].text, "保留词");
}

#[tokio::test]
async fn surplus_keywords_are_truncated_to_the_configured_count() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_with_keywords(8)))
        .mount(&server)
        .await;

    let app = app_with_model(&server).await;
    seed_yesterday_titles(&app).await;

    let (status, body) = app
        .request("POST", "/api/keywords/refresh-weekly", Some(&app.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["keywordCount"], 5);
}

#[tokio::test]
async fn no_recent_titles_skips_without_writing() {
    let server = MockServer::start().await;
    let app = app_with_model(&server).await;

    let (status, body) = app
        .request("POST", "/api/keywords/refresh-weekly", Some(&app.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "最近7天没有可用的新闻标题");

    let stored: Vec<Keyword> = read_vec(app.store.as_ref(), "keywords").await;
    assert!(stored.is_empty());
}

#[tokio::test]
async fn missing_model_key_skips() {
    let app = spawn_app(TestOptions {
        weekly_key: None,
        ..Default::default()
    })
    .await;
    let (status, body) = app
        .request("POST", "/api/keywords/refresh-weekly", Some(&app.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "模型 API Key 未配置");
}

#[tokio::test]
async fn refresh_requires_auth() {
    let server = MockServer::start().await;
    let app = app_with_model(&server).await;
    let (status, _) = app
        .request("POST", "/api/keywords/refresh-weekly", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
