//! 日志与指标初始化

use crate::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 初始化结构化日志
///
/// `RUST_LOG` 存在时优先于配置中的日志级别。
pub fn init_telemetry(config: &AppConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let log_layer = match config.logging.format.to_lowercase().as_str() {
        "pretty" => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(log_layer)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.logging.level,
        format = %config.logging.format,
        "Telemetry initialized"
    );
}

/// 注册指标描述
pub fn init_metrics() {
    metrics::describe_counter!("http_requests_total", "Total HTTP requests by method and status");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        metrics::Unit::Seconds,
        "HTTP request latency"
    );
    metrics::describe_counter!("auth_login_total", "Login attempts by outcome");
    metrics::describe_counter!("auth_token_rejected_total", "Rejected bearer tokens by kind");
    metrics::describe_gauge!("db.pool.size", "Database pool size");
    metrics::describe_gauge!("db.pool.idle", "Idle database connections");
    tracing::debug!("Metrics initialized");
}
