//! 配置系统
//! 从环境变量加载所有配置，使用 Secret 包装敏感信息

use config::{Config, ConfigError, Environment};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，例如 "0.0.0.0:3000"
    pub addr: String,
    /// 优雅关闭超时时间（秒）
    pub graceful_shutdown_timeout_secs: u64,
    /// 请求体大小上限（字节）
    pub body_limit_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库连接 URL（使用 Secret 包装，防止日志泄露）
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// JWT 签名密钥（HS256）
    pub jwt_secret: Secret<String>,
    /// 令牌签发者 (iss)
    pub jwt_issuer: String,
    /// 访问令牌有效期（秒）
    pub access_token_exp_secs: u64,
    /// 刷新令牌有效期（秒）
    pub refresh_token_exp_secs: u64,
    /// Argon2 内存开销（KiB）
    pub argon2_memory_kib: u32,
    /// Argon2 迭代次数
    pub argon2_iterations: u32,
    /// Argon2 并行度
    pub argon2_parallelism: u32,
    pub password_min_length: usize,
    pub password_max_length: usize,
    pub password_require_uppercase: bool,
    pub password_require_digit: bool,
    /// 是否信任 X-Forwarded-For / X-Real-IP
    pub trust_proxy: bool,
    /// IP 白名单（可选）
    pub allowed_ips: Option<Vec<String>>,
    /// CORS 允许的来源，为空表示任意来源
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

/// 风险报告用量上报接口的 API Key
#[derive(Debug, Clone, Deserialize)]
pub struct RiskReportConfig {
    #[serde(default)]
    pub api_keys: Vec<Secret<String>>,
}

/// 首次启动时创建的管理员账户（可选）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BootstrapConfig {
    pub admin_username: Option<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<Secret<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub pagination: PaginationConfig,
    pub risk_report: RiskReportConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        settings = settings
            .set_default("server.addr", "0.0.0.0:8080")?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("server.body_limit_bytes", 1024 * 1024)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("database.max_lifetime_secs", 1800)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("security.jwt_issuer", "user-api")?
            .set_default("security.access_token_exp_secs", 86400)?
            .set_default("security.refresh_token_exp_secs", 604800)?
            .set_default("security.argon2_memory_kib", 19456)?
            .set_default("security.argon2_iterations", 2)?
            .set_default("security.argon2_parallelism", 1)?
            .set_default("security.password_min_length", 6)?
            .set_default("security.password_max_length", 50)?
            .set_default("security.password_require_uppercase", false)?
            .set_default("security.password_require_digit", false)?
            .set_default("security.trust_proxy", false)?
            .set_default("pagination.default_page_size", 20)?
            .set_default("pagination.max_page_size", 100)?
            .set_default("risk_report.api_keys", Vec::<String>::new())?;

        // 环境变量前缀 USER_API_，层级分隔符 __
        settings = settings.add_source(
            Environment::with_prefix("USER_API")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("security.allowed_ips")
                .with_list_parse_key("security.cors_allowed_origins")
                .with_list_parse_key("risk_report.api_keys")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(port_str) = self.server.addr.split(':').next_back() {
            if let Ok(port) = port_str.parse::<u16>() {
                if port != 0 && port < 1024 {
                    return Err(ConfigError::Message("Server port should be >= 1024".to_string()));
                }
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::Message(
                "max_connections must be >= min_connections".to_string(),
            ));
        }

        let security = &self.security;

        // HS256 密钥至少 32 字符
        if security.jwt_secret.expose_secret().len() < 32 {
            return Err(ConfigError::Message(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if security.jwt_issuer.trim().is_empty() {
            return Err(ConfigError::Message("jwt_issuer must not be empty".to_string()));
        }

        if security.access_token_exp_secs < 60 || security.access_token_exp_secs > 86400 {
            return Err(ConfigError::Message(
                "access_token_exp_secs must be between 60 and 86400 (1 minute to 24 hours)"
                    .to_string(),
            ));
        }

        if security.refresh_token_exp_secs < 3600 || security.refresh_token_exp_secs > 2592000 {
            return Err(ConfigError::Message(
                "refresh_token_exp_secs must be between 3600 and 2592000 (1 hour to 30 days)"
                    .to_string(),
            ));
        }

        if security.refresh_token_exp_secs <= security.access_token_exp_secs {
            return Err(ConfigError::Message(
                "refresh_token_exp_secs must be longer than access_token_exp_secs".to_string(),
            ));
        }

        argon2::Params::new(
            security.argon2_memory_kib,
            security.argon2_iterations,
            security.argon2_parallelism,
            None,
        )
        .map_err(|e| ConfigError::Message(format!("Invalid Argon2 parameters: {}", e)))?;

        if security.password_min_length < 6 || security.password_max_length > 128 {
            return Err(ConfigError::Message(
                "password length bounds must be within 6 and 128".to_string(),
            ));
        }

        if security.password_min_length > security.password_max_length {
            return Err(ConfigError::Message(
                "password_min_length must be <= password_max_length".to_string(),
            ));
        }

        if self.pagination.default_page_size == 0
            || self.pagination.default_page_size > self.pagination.max_page_size
        {
            return Err(ConfigError::Message(
                "default_page_size must be between 1 and max_page_size".to_string(),
            ));
        }

        Ok(())
    }
}
