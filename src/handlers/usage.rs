//! 风险报告用量的 HTTP 处理器（API Key 保护）

use crate::{
    error::AppError,
    extract::{Json, Path, Query},
    middleware::AppState,
    models::usage::*,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::sync::Arc;
use uuid::Uuid;

pub async fn create_usage(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUsageRequest>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.usage.create(req).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn batch_create_usage(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchCreateUsageRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = state.usage.batch_create(req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_usage(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListUsageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = state.usage.list(query).await?;
    Ok(Json(page))
}

pub async fn get_usage(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.usage.get(id).await?;
    Ok(Json(record))
}

/// 单个用户的用量汇总
pub async fn usage_stats(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<UsageStatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let stats = state.usage.stats(&user_id, query).await?;
    Ok(Json(stats))
}
