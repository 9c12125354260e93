//! 认证相关的 HTTP 处理器

use crate::{
    error::AppError,
    extract::Json,
    middleware::{AppState, ClientIp},
    models::{auth::*, user::UserResponse},
};
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::sync::Arc;
use validator::Validate;

/// 注册
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let user = state.accounts.register(req).await?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// 登录
pub async fn login(
    State(state): State<Arc<AppState>>,
    ClientIp(client_ip): ClientIp,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let response = state
        .accounts
        .login(&req.username, &req.password, &client_ip)
        .await?;

    Ok(Json(response))
}

/// 刷新令牌
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let response = state.accounts.refresh_token(&req.refresh_token).await?;

    Ok(Json(response))
}
