//! 统一错误模型
//! 封闭的错误分类，每一类都有确定的 HTTP 状态码与业务错误码

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    // ===== 令牌 =====
    #[error("Authorization token not found")]
    TokenNotFound,

    #[error("Token malformed: {0}")]
    TokenMalformed(String),

    #[error("Token signature invalid")]
    TokenInvalidSignature,

    #[error("Token invalid: {0}")]
    TokenInvalid(String),

    #[error("Token expired")]
    TokenExpired,

    // ===== 凭证与账户 =====
    #[error("Invalid username or password")]
    InvalidCredential,

    #[error("User account is disabled")]
    UserDisabled,

    #[error("Old password is incorrect")]
    InvalidPassword,

    #[error("Password does not meet policy: {0}")]
    PasswordTooWeak(String),

    #[error("Username already exists")]
    UsernameExists,

    #[error("Email already in use")]
    EmailAlreadyUsed,

    #[error("User not found")]
    UserNotFound,

    // ===== 访问控制 =====
    #[error("Authentication required")]
    Unauthorized,

    #[error("Access denied")]
    Forbidden,

    #[error("Missing API key")]
    ApiKeyMissing,

    #[error("Invalid API key")]
    ApiKeyInvalid,

    // ===== 通用 =====
    #[error("Resource not found")]
    NotFound,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::TokenNotFound
            | AppError::TokenMalformed(_)
            | AppError::TokenInvalidSignature
            | AppError::TokenInvalid(_)
            | AppError::TokenExpired
            | AppError::InvalidCredential
            | AppError::InvalidPassword
            | AppError::Unauthorized
            | AppError::ApiKeyMissing
            | AppError::ApiKeyInvalid => StatusCode::UNAUTHORIZED,
            AppError::UserDisabled | AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::UsernameExists | AppError::EmailAlreadyUsed => StatusCode::CONFLICT,
            AppError::UserNotFound | AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::PasswordTooWeak(_) | AppError::BadRequest(_) | AppError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Storage(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 业务错误码
    pub fn code(&self) -> u32 {
        match self {
            AppError::TokenInvalid(_) | AppError::TokenInvalidSignature => 11001,
            AppError::TokenExpired => 11002,
            AppError::InvalidPassword => 11003,
            AppError::InvalidCredential => 11004,
            AppError::TokenMalformed(_) => 11005,
            AppError::TokenNotFound => 11006,
            AppError::UserNotFound => 20001,
            AppError::UserDisabled => 20003,
            AppError::EmailAlreadyUsed => 20004,
            AppError::UsernameExists => 20005,
            AppError::PasswordTooWeak(_) => 20006,
            AppError::BadRequest(_) | AppError::Validation(_) => 10001,
            AppError::Unauthorized => 10002,
            AppError::Forbidden => 10003,
            AppError::NotFound => 10004,
            AppError::ApiKeyMissing | AppError::ApiKeyInvalid => 10005,
            AppError::PayloadTooLarge => 10006,
            AppError::Storage(_) => 50001,
            AppError::Config(_) | AppError::Internal(_) => 50000,
        }
    }

    /// 错误类别的稳定名称
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::TokenNotFound => "token_not_found",
            AppError::TokenMalformed(_) => "token_malformed",
            AppError::TokenInvalidSignature => "token_invalid_signature",
            AppError::TokenInvalid(_) => "token_invalid",
            AppError::TokenExpired => "token_expired",
            AppError::InvalidCredential => "invalid_credential",
            AppError::UserDisabled => "user_disabled",
            AppError::InvalidPassword => "invalid_password",
            AppError::PasswordTooWeak(_) => "password_too_weak",
            AppError::UsernameExists => "username_exists",
            AppError::EmailAlreadyUsed => "email_already_used",
            AppError::UserNotFound => "user_not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::ApiKeyMissing => "api_key_missing",
            AppError::ApiKeyInvalid => "api_key_invalid",
            AppError::NotFound => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Validation(_) => "validation",
            AppError::PayloadTooLarge => "payload_too_large",
            AppError::Storage(_) => "storage_failure",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::Storage(_) => "Storage failure".to_string(),
            AppError::Config(_) | AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// 是否属于认证类错误（401）
    pub fn is_authentication_failure(&self) -> bool {
        self.status_code() == StatusCode::UNAUTHORIZED
    }
}

/// 错误响应 DTO
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: u32,
    pub kind: &'static str,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = crate::middleware::current_request_id()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                kind: self.kind(),
                message: self.user_message(),
                request_id,
            },
        };

        if status.is_server_error() {
            tracing::error!(
                code = self.code(),
                kind = self.kind(),
                error = %self,
                request_id = %error_response.error.request_id,
                "Request failed"
            );
        } else {
            tracing::warn!(
                code = self.code(),
                kind = self.kind(),
                request_id = %error_response.error.request_id,
                "Request rejected: {}",
                self.user_message()
            );
        }

        (status, Json(error_response)).into_response()
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

/// 请求体提取失败，解析细节只写日志
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "JSON body rejected");

        match rejection {
            JsonRejection::JsonDataError(_) => {
                AppError::BadRequest("request body does not match the expected shape".to_string())
            }
            JsonRejection::JsonSyntaxError(_) => {
                AppError::BadRequest("request body is not valid JSON".to_string())
            }
            JsonRejection::MissingJsonContentType(_) => {
                AppError::BadRequest("expected content-type application/json".to_string())
            }
            other if other.status() == StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge,
            _ => AppError::BadRequest("request body could not be read".to_string()),
        }
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "Path parameter rejected");
        AppError::BadRequest("invalid path parameter".to_string())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "Query string rejected");
        AppError::BadRequest("invalid query string".to_string())
    }
}

/// 从 validator 的校验错误转换，只保留字段名与规则
impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .iter()
            .map(|(field, errs)| {
                let rules: Vec<String> = errs
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                format!("{}: {}", field, rules.join(", "))
            })
            .collect();
        fields.sort();
        AppError::Validation(fields.join("; "))
    }
}
