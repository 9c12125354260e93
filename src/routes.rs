//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    set_header::SetResponseHeaderLayer,
};

use crate::{
    auth::{require_admin, require_api_key, require_auth},
    handlers,
    middleware::{handle_panic, ip_whitelist_middleware, request_tracking_middleware, AppState},
};

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    let tokens = state.tokens.clone();

    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 认证路由（无需令牌）
    let auth_routes = Router::new()
        .route("/api/v1/auth/register", post(handlers::auth::register))
        .route("/api/v1/auth/login", post(handlers::auth::login))
        .route("/api/v1/auth/refresh", post(handlers::auth::refresh_token));

    // 需要登录
    let authenticated_routes = Router::new()
        .route(
            "/api/v1/users/me",
            get(handlers::user::get_me).put(handlers::user::update_me),
        )
        .route("/api/v1/users/me/password", put(handlers::user::change_password))
        .route("/api/v1/users/{id}", get(handlers::user::get_user))
        .route_layer(from_fn_with_state(tokens.clone(), require_auth));

    // 管理员；后添加的层先执行，先认证再检查角色
    let admin_routes = Router::new()
        .route("/api/v1/users", get(handlers::user::list_users))
        .route(
            "/api/v1/users/{id}",
            put(handlers::user::update_user).delete(handlers::user::delete_user),
        )
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(tokens, require_auth));

    // 风险报告用量上报（API Key）
    let usage_routes = Router::new()
        .route(
            "/api/v1/risk-report/usage",
            post(handlers::usage::create_usage).get(handlers::usage::list_usage),
        )
        .route(
            "/api/v1/risk-report/usage/batch",
            post(handlers::usage::batch_create_usage),
        )
        .route(
            "/api/v1/risk-report/usage/stats/{user_id}",
            get(handlers::usage::usage_stats),
        )
        .route("/api/v1/risk-report/usage/{id}", get(handlers::usage::get_usage))
        .route_layer(from_fn_with_state(state.api_keys.clone(), require_api_key));

    // 组合所有路由；最后添加的层最先执行
    Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(authenticated_routes)
        .merge(admin_routes)
        .merge(usage_routes)
        .layer(from_fn_with_state(state.clone(), ip_whitelist_middleware))
        .layer(RequestBodyLimitLayer::new(state.config.server.body_limit_bytes))
        .layer(CompressionLayer::new())
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(cors_layer(&state.config.security.cors_allowed_origins))
        .layer(from_fn(request_tracking_middleware))
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

/// 未配置来源时允许任意来源
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-api-key"),
        ]);

    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(origins)
}
