//! 用户资料与管理的 HTTP 处理器

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    extract::{Json, Path, Query},
    middleware::AppState,
    models::{auth::ChangePasswordRequest, user::*},
};
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// 按查看者身份决定返回的视图
#[derive(Serialize)]
#[serde(untagged)]
pub enum UserView {
    Full(UserResponse),
    Brief(UserBrief),
}

/// 当前用户信息
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let user = state.accounts.get_profile(auth.user_id).await?;
    Ok(Json(UserResponse::from(user)))
}

/// 修改自己的资料
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let user = state
        .accounts
        .update_profile(auth.user_id, req.into_changes())
        .await?;

    Ok(Json(UserResponse::from(user)))
}

/// 修改密码
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    state
        .accounts
        .change_password(auth.user_id, &req.old_password, &req.new_password)
        .await?;

    Ok(Json(json!({ "message": "password changed" })))
}

/// 用户列表（管理员）
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListUsersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = state.accounts.list(query).await?;
    Ok(Json(page))
}

/// 用户详情：本人或管理员看到完整信息，其他登录用户只看到简要信息
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    viewer: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.accounts.get_profile(id).await?;

    let view = if viewer.user_id == user.id || viewer.is_admin() {
        UserView::Full(UserResponse::from(&user))
    } else {
        UserView::Brief(UserBrief::from(&user))
    };

    Ok(Json(view))
}

/// 更新用户（管理员）
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<AdminUpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let user = state.accounts.admin_update(id, req.into_changes()).await?;
    tracing::info!(admin_id = %auth.user_id, user_id = %id, "Admin updated user");

    Ok(Json(UserResponse::from(user)))
}

/// 删除用户（管理员，软删除）
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.accounts.delete(id).await?;
    tracing::info!(admin_id = %auth.user_id, user_id = %id, "Admin deleted user");

    Ok(StatusCode::NO_CONTENT)
}
