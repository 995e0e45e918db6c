//! Keyword CRUD, batch import, and read-cache invalidation.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{spawn_app, TestOptions};

#[tokio::test]
async fn create_is_visible_immediately_despite_the_cache() {
    let app = spawn_app(TestOptions::default()).await;

    // Prime the cache with the empty set.
    let (status, body) = app.request("GET", "/api/keywords", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, created) = app
        .request(
            "POST",
            "/api/keywords",
            Some(&app.token),
            Some(json!({ "text": "大模型", "weight": 9 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["message"], "关键词添加成功");

    let (_, body) = app.request("GET", "/api/keywords", None, None).await;
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["text"], "大模型");
    assert_eq!(items[0]["size"], "large");
}

#[tokio::test]
async fn create_rejects_empty_text() {
    let app = spawn_app(TestOptions::default()).await;
    let (status, body) = app
        .request(
            "POST",
            "/api/keywords",
            Some(&app.token),
            Some(json!({ "text": "  " })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "关键词文本不能为空");
}

#[tokio::test]
async fn update_rederives_size_from_weight() {
    let app = spawn_app(TestOptions::default()).await;
    let (_, created) = app
        .request(
            "POST",
            "/api/keywords",
            Some(&app.token),
            Some(json!({ "text": "智能体", "weight": 9 })),
        )
        .await;
    let id = created["id"].clone();

    let (status, _) = app
        .request(
            "PUT",
            &format!("/api/keywords/{id}"),
            Some(&app.token),
            Some(json!({ "weight": 3 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.request("GET", "/api/keywords", None, None).await;
    assert_eq!(body[0]["weight"], 3);
    assert_eq!(body[0]["size"], "small");

    let (status, body) = app
        .request(
            "PUT",
            "/api/keywords/0",
            Some(&app.token),
            Some(json!({ "weight": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "关键词不存在");
}

#[tokio::test]
async fn delete_removes_the_keyword() {
    let app = spawn_app(TestOptions::default()).await;
    let (_, created) = app
        .request(
            "POST",
            "/api/keywords",
            Some(&app.token),
            Some(json!({ "text": "临时" })),
        )
        .await;
    let id = created["id"].clone();

    let (status, _) = app
        .request("DELETE", &format!("/api/keywords/{id}"), Some(&app.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = app.request("GET", "/api/keywords", None, None).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn batch_import_appends_and_counts() {
    let app = spawn_app(TestOptions::default()).await;
    let (status, body) = app
        .request(
            "POST",
            "/api/keywords/batch",
            Some(&app.token),
            Some(json!({ "keywords": [
                { "text": "推理", "weight": 8 },
                { "text": "开源" },
                { "text": "" },
            ]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "成功导入 2 个关键词");
    assert_eq!(body["count"], 2);

    let (_, listed) = app.request("GET", "/api/keywords", None, None).await;
    assert_eq!(listed.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn batch_import_without_keywords_field_is_rejected() {
    let app = spawn_app(TestOptions::default()).await;
    let (status, body) = app
        .request("POST", "/api/keywords/batch", Some(&app.token), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "关键词数据格式错误");
}

#[tokio::test]
async fn mutations_require_auth_but_reads_are_public() {
    let app = spawn_app(TestOptions::default()).await;
    let (status, _) = app.request("GET", "/api/keywords", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request("POST", "/api/keywords", None, Some(json!({ "text": "x" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
