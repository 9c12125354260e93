//! HTTP 中间件
//! 应用状态、请求追踪、IP 白名单、客户端地址解析、panic 兜底

use crate::{
    auth::{api_key::ApiKeySet, jwt::TokenService, password::PasswordHasher},
    config::AppConfig,
    error::AppError,
    repository::{usage_repo::UsageStore, user_repo::UserStore},
    services::{AccountService, UsageService},
};
use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{any::Any, convert::Infallible, net::SocketAddr, sync::Arc, time::Instant};
use tracing::Instrument;
use uuid::Uuid;

/// 应用状态
///
/// 存储以 trait 对象注入，生产环境使用 PostgreSQL，测试使用内存实现。
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tokens: Arc<TokenService>,
    pub accounts: Arc<AccountService>,
    pub usage: Arc<UsageService>,
    pub users: Arc<dyn UserStore>,
    pub api_keys: ApiKeySet,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        users: Arc<dyn UserStore>,
        usage_store: Arc<dyn UsageStore>,
    ) -> Result<Self, AppError> {
        let config = Arc::new(config);
        let tokens = Arc::new(TokenService::from_config(&config.security)?);
        let hasher = PasswordHasher::from_config(&config.security)?;

        let accounts = Arc::new(AccountService::new(
            users.clone(),
            tokens.clone(),
            hasher,
            config.clone(),
        )?);
        let usage = Arc::new(UsageService::new(usage_store, config.pagination.clone()));
        let api_keys = ApiKeySet::from_config(&config.risk_report);

        Ok(Self {
            config,
            tokens,
            accounts,
            usage,
            users,
            api_keys,
        })
    }
}

tokio::task_local! {
    /// 当前请求的 request_id，由追踪中间件设置
    static REQUEST_ID: String;
}

/// 在请求处理范围内读取 request_id
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = header_or_new(req.headers(), "x-trace-id");
    let request_id = header_or_new(req.headers(), "x-request-id");

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let scoped_id = request_id.clone();
    async move {
        let start = Instant::now();
        let mut response = REQUEST_ID.scope(scoped_id, next.run(req)).await;
        let elapsed = start.elapsed();

        let status = response.status();
        metrics::counter!(
            "http_requests_total",
            "method" => method.to_string(),
            "status" => status.as_u16().to_string()
        )
        .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        );

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            headers.insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 沿用上游传入的 id（长度受限），否则新生成
fn header_or_new(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// IP 白名单中间件
pub async fn ip_whitelist_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(allowed_ips) = &state.config.security.allowed_ips {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let ip = client_ip(req.headers(), state.config.security.trust_proxy, peer);

        if !allowed_ips.iter().any(|allowed| allowed == &ip) {
            tracing::warn!(client_ip = %ip, "IP not in whitelist");
            return Err(AppError::Forbidden);
        }

        tracing::debug!(client_ip = %ip, "IP allowed by whitelist");
    }

    Ok(next.run(req).await)
}

/// 获取客户端 IP 地址
///
/// 仅在 `trust_proxy` 时读取 X-Forwarded-For（第一个地址）/ X-Real-IP，
/// 其次使用连接地址，都没有时返回 "unknown"。
pub fn client_ip(headers: &HeaderMap, trust_proxy: bool, peer: Option<SocketAddr>) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(ip) = real_ip {
            return ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// 客户端地址提取器
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

impl FromRequestParts<Arc<AppState>> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Ok(ClientIp(client_ip(
            &parts.headers,
            state.config.security.trust_proxy,
            peer,
        )))
    }
}

/// handler panic 时返回统一的 500 错误体
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    AppError::Internal(format!("handler panicked: {}", detail)).into_response()
}
