//! Admin login.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::auth::{issue_token, verify_password};
use crate::models::Admin;
use crate::store::read_vec;
use crate::web::error::ApiError;
use crate::web::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.username.is_empty() || body.password.is_empty() {
        return Err(ApiError::bad_request("用户名和密码不能为空"));
    }

    let admins: Vec<Admin> = read_vec(state.store.as_ref(), "admins").await;
    let Some(admin) = admins.iter().find(|a| a.username == body.username) else {
        warn!(username = %body.username, "Failed login attempt");
        return Err(ApiError::Unauthorized("用户名或密码错误".to_string()));
    };

    let verified = verify_password(&body.password, &admin.password_hash)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if !verified {
        warn!(username = %body.username, "Failed login attempt");
        return Err(ApiError::Unauthorized("用户名或密码错误".to_string()));
    }
    let token = issue_token(&state.config.jwt_secret, admin.id, &admin.username, &admin.role)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    info!(username = %admin.username, "Admin logged in");

    Ok(Json(json!({
        "success": true,
        "token": token,
        "user": { "id": admin.id, "username": admin.username, "role": admin.role },
        "message": "登录成功",
    })))
}
