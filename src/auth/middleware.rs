//! 认证与授权中间件
//!
//! 单个请求的状态推进：未认证 → 解析请求头 → 校验令牌 → 已认证 → 角色检查 → 已授权。
//! 任何一步失败都直接返回（401 认证失败 / 403 授权失败），后续中间件与 handler 不再执行。

use crate::{
    auth::jwt::{Claims, TokenService},
    error::AppError,
    models::user::Role,
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, Extensions, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::{convert::Infallible, sync::Arc};
use uuid::Uuid;

const BEARER_PREFIX: &str = "Bearer ";

/// 认证上下文（附加到请求扩展，每个请求独立一份）
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub claims: Claims,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<Claims> for AuthContext {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            username: claims.username.clone(),
            email: claims.email.clone(),
            role: claims.role,
            claims,
        }
    }
}

// handler 中直接提取 AuthContext；未认证时返回 401
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// 可选身份，配合 `optional_auth` 使用
#[derive(Debug, Clone)]
pub struct MaybeAuth(pub Option<AuthContext>);

impl<S> FromRequestParts<S> for MaybeAuth
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuth(parts.extensions.get::<AuthContext>().cloned()))
    }
}

/// 从 Authorization 头提取 Bearer 令牌
pub fn extract_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = match headers.get(AUTHORIZATION) {
        Some(v) if !v.is_empty() => v,
        _ => return Err(AppError::TokenNotFound),
    };

    let value = value.to_str().map_err(|_| {
        AppError::TokenMalformed("authorization header is not valid text".to_string())
    })?;

    let token = value.strip_prefix(BEARER_PREFIX).ok_or_else(|| {
        AppError::TokenMalformed("authorization header must start with Bearer".to_string())
    })?;

    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::TokenNotFound);
    }

    Ok(token)
}

/// 解析并校验访问令牌，刷新令牌一律拒绝
pub fn authenticate(headers: &HeaderMap, tokens: &TokenService) -> Result<AuthContext, AppError> {
    let token = extract_token(headers)?;
    let claims = tokens.validate(token)?;

    if !claims.is_access() {
        return Err(AppError::TokenInvalid("use an access token".to_string()));
    }

    Ok(AuthContext::from(claims))
}

/// requireAuth：必须携带有效访问令牌
pub async fn require_auth(
    State(tokens): State<Arc<TokenService>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = authenticate(req.headers(), &tokens).inspect_err(|e| {
        metrics::counter!("auth_token_rejected_total", "kind" => e.kind()).increment(1);
    })?;

    tracing::debug!(user_id = %context.user_id, role = %context.role, "Request authenticated");
    req.extensions_mut().insert(context);

    Ok(next.run(req).await)
}

/// optionalAuth：有合法访问令牌则附加身份，否则按匿名继续
pub async fn optional_auth(
    State(tokens): State<Arc<TokenService>>,
    mut req: Request,
    next: Next,
) -> Response {
    match authenticate(req.headers(), &tokens) {
        Ok(context) => {
            req.extensions_mut().insert(context);
        }
        Err(e) => {
            tracing::trace!(kind = e.kind(), "Continuing anonymously");
        }
    }

    next.run(req).await
}

/// 角色白名单，作为 `require_role` 的中间件状态
#[derive(Debug, Clone)]
pub struct RoleGuard {
    allowed: Arc<[Role]>,
}

impl RoleGuard {
    pub fn new(roles: &[Role]) -> Self {
        Self {
            allowed: Arc::from(roles),
        }
    }

    pub fn admin() -> Self {
        Self::new(&[Role::Admin])
    }

    /// 无身份 → 401，角色不在白名单 → 403
    pub fn check(&self, extensions: &Extensions) -> Result<(), AppError> {
        let role = get_user_role(extensions).ok_or(AppError::Unauthorized)?;

        if !self.allowed.contains(&role) {
            tracing::warn!(
                user_id = ?get_user_id(extensions),
                role = %role,
                "Role not permitted"
            );
            return Err(AppError::Forbidden);
        }

        Ok(())
    }
}

/// requireRole：必须位于 `require_auth` 之后
pub async fn require_role(
    State(guard): State<RoleGuard>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    guard.check(req.extensions())?;
    Ok(next.run(req).await)
}

/// requireAdmin：`require_role(admin)` 的特例
pub async fn require_admin(req: Request, next: Next) -> Result<Response, AppError> {
    RoleGuard::admin().check(req.extensions())?;
    Ok(next.run(req).await)
}

// ===== 请求上下文访问器 =====

pub fn get_auth_context(extensions: &Extensions) -> Option<&AuthContext> {
    extensions.get::<AuthContext>()
}

pub fn get_user_id(extensions: &Extensions) -> Option<Uuid> {
    get_auth_context(extensions).map(|c| c.user_id)
}

pub fn get_username(extensions: &Extensions) -> Option<&str> {
    get_auth_context(extensions).map(|c| c.username.as_str())
}

pub fn get_user_role(extensions: &Extensions) -> Option<Role> {
    get_auth_context(extensions).map(|c| c.role)
}

pub fn get_user_email(extensions: &Extensions) -> Option<&str> {
    get_auth_context(extensions).map(|c| c.email.as_str())
}

pub fn get_claims(extensions: &Extensions) -> Option<&Claims> {
    get_auth_context(extensions).map(|c| &c.claims)
}

pub fn is_authenticated(extensions: &Extensions) -> bool {
    get_auth_context(extensions).is_some()
}

pub fn is_admin(extensions: &Extensions) -> bool {
    get_user_role(extensions) == Some(Role::Admin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::tests::{sample_user, security_config};
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    fn tokens() -> TokenService {
        TokenService::from_config(&security_config("test-secret-key-for-testing-only-min-32-chars"))
            .unwrap()
    }

    fn bearer(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_extract_token_valid() {
        let headers = bearer("Bearer test_token_123");
        assert_eq!(extract_token(&headers).unwrap(), "test_token_123");
    }

    #[test]
    fn test_extract_token_missing() {
        assert!(matches!(extract_token(&HeaderMap::new()), Err(AppError::TokenNotFound)));
    }

    #[test]
    fn test_extract_token_wrong_scheme() {
        assert!(matches!(
            extract_token(&bearer("Basic dXNlcjpwYXNz")),
            Err(AppError::TokenMalformed(_))
        ));
        assert!(matches!(
            extract_token(&bearer("bearer abc")),
            Err(AppError::TokenMalformed(_))
        ));
    }

    #[test]
    fn test_extract_token_empty_remainder() {
        assert!(matches!(extract_token(&bearer("Bearer ")), Err(AppError::TokenNotFound)));
        assert!(matches!(extract_token(&bearer("Bearer    ")), Err(AppError::TokenNotFound)));
    }

    #[test]
    fn test_authenticate_accepts_access_token() {
        let tokens = tokens();
        let user = sample_user(Role::User);
        let token = tokens.issue_access_token(&user).unwrap();

        let context = authenticate(&bearer(&format!("Bearer {}", token)), &tokens).unwrap();
        assert_eq!(context.user_id, user.id);
        assert_eq!(context.username, "alice");
        assert_eq!(context.email, "alice@x.com");
        assert_eq!(context.role, Role::User);
    }

    #[test]
    fn test_authenticate_rejects_refresh_token() {
        let tokens = tokens();
        let user = sample_user(Role::Admin);
        let refresh = tokens.issue_refresh_token(&user).unwrap();

        // 签名与有效期都合法，仍然拒绝
        assert!(tokens.validate(&refresh).is_ok());
        let err = authenticate(&bearer(&format!("Bearer {}", refresh)), &tokens).unwrap_err();
        assert!(matches!(err, AppError::TokenInvalid(_)));
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_role_guard() {
        let tokens = tokens();
        let guard = RoleGuard::admin();

        let mut extensions = Extensions::new();
        assert!(matches!(guard.check(&extensions), Err(AppError::Unauthorized)));

        let user = sample_user(Role::User);
        let claims = tokens.validate(&tokens.issue_access_token(&user).unwrap()).unwrap();
        extensions.insert(AuthContext::from(claims));
        assert!(matches!(guard.check(&extensions), Err(AppError::Forbidden)));
        assert!(RoleGuard::new(&[Role::User, Role::Admin]).check(&extensions).is_ok());
    }

    #[test]
    fn test_accessors() {
        let tokens = tokens();
        let mut extensions = Extensions::new();
        assert!(!is_authenticated(&extensions));
        assert_eq!(get_user_id(&extensions), None);

        let admin = sample_user(Role::Admin);
        let claims = tokens.validate(&tokens.issue_access_token(&admin).unwrap()).unwrap();
        extensions.insert(AuthContext::from(claims));

        assert!(is_authenticated(&extensions));
        assert!(is_admin(&extensions));
        assert_eq!(get_user_id(&extensions), Some(admin.id));
        assert_eq!(get_username(&extensions), Some("alice"));
        assert_eq!(get_user_email(&extensions), Some("alice@x.com"));
        assert_eq!(get_user_role(&extensions), Some(Role::Admin));
        assert!(get_claims(&extensions).is_some_and(|c| c.is_access()));
    }

    fn whoami_router(tokens: Arc<TokenService>, required: bool) -> Router {
        let router = Router::new().route(
            "/whoami",
            get(|MaybeAuth(viewer): MaybeAuth| async move {
                viewer.map_or_else(|| "anonymous".to_string(), |v| v.username)
            }),
        );

        if required {
            router.route_layer(axum::middleware::from_fn_with_state(tokens, require_auth))
        } else {
            router.route_layer(axum::middleware::from_fn_with_state(tokens, optional_auth))
        }
    }

    async fn whoami(router: Router, authorization: Option<&str>) -> (StatusCode, String) {
        let mut builder = axum::http::Request::builder().uri("/whoami");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }

        let response = router
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_optional_auth_attaches_identity_or_continues_anonymously() {
        let tokens = Arc::new(tokens());
        let user = sample_user(Role::User);
        let access = format!("Bearer {}", tokens.issue_access_token(&user).unwrap());
        let refresh = format!("Bearer {}", tokens.issue_refresh_token(&user).unwrap());

        let router = whoami_router(tokens, false);

        assert_eq!(
            whoami(router.clone(), Some(&access)).await,
            (StatusCode::OK, "alice".to_string())
        );
        for header in [None, Some("Bearer not.a.jwt"), Some("Token abc"), Some(refresh.as_str())] {
            assert_eq!(
                whoami(router.clone(), header).await,
                (StatusCode::OK, "anonymous".to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_require_auth_stops_before_handler() {
        let tokens = Arc::new(tokens());
        let user = sample_user(Role::User);
        let access = format!("Bearer {}", tokens.issue_access_token(&user).unwrap());

        let router = whoami_router(tokens, true);

        let (status, _) = whoami(router.clone(), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            whoami(router, Some(&access)).await,
            (StatusCode::OK, "alice".to_string())
        );
    }
}
