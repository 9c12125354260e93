//! 用户管理服务主入口

use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use user_api::{
    auth::ApiKeyGenerator,
    config::AppConfig,
    db,
    handlers::health,
    middleware::AppState,
    repository::{PgUsageStore, PgUserStore},
    routes, telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("user-api {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            "--generate-api-key" => {
                let key = ApiKeyGenerator::generate();
                println!("{}", key);
                eprintln!("sha256: {}", ApiKeyGenerator::hash(&key));
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 加载 .env 文件（开发环境）
    // 按优先级加载：.env.{USER_API_ENV} 或 .env.local > .env.development > .env
    if let Ok(env) = std::env::var("USER_API_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::from_filename(".env.development").ok();
        dotenv::dotenv().ok();
    }

    health::set_start_time();

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志与指标
    telemetry::init_telemetry(&config);
    telemetry::init_metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "user-api starting...");

    // 3. 数据库连接池 + 迁移
    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;

    tracing::info!("Database initialized");

    // 4. 构建应用状态
    let app_state = Arc::new(AppState::new(
        config.clone(),
        Arc::new(PgUserStore::new(db_pool.clone())),
        Arc::new(PgUsageStore::new(db_pool.clone())),
    )?);

    bootstrap_admin(&app_state, &config).await?;

    // 5. 构建路由
    let app = routes::create_router(app_state);

    // 6. 启动服务器
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    // 7. 优雅关闭
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(config.server.graceful_shutdown_timeout_secs))
    .await?;

    db_pool.close().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 配置了管理员账户且库中没有任何账户时创建管理员
async fn bootstrap_admin(state: &AppState, config: &AppConfig) -> anyhow::Result<()> {
    let bootstrap = &config.bootstrap;
    let (Some(username), Some(email), Some(password)) = (
        bootstrap.admin_username.as_deref(),
        bootstrap.admin_email.as_deref(),
        bootstrap.admin_password.as_ref(),
    ) else {
        return Ok(());
    };

    if let Some(admin) = state
        .accounts
        .ensure_admin(username, email, password.expose_secret())
        .await?
    {
        tracing::info!(user_id = %admin.id, "Admin account bootstrapped");
    }

    Ok(())
}

/// 优雅关闭信号处理
///
/// 收到信号后开始排空连接；超过超时时间仍未结束则强制退出。
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }

    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(timeout_secs)).await;
        tracing::warn!("Graceful shutdown timeout reached, forcing exit");
        std::process::exit(1);
    });
}

/// 打印帮助信息
fn print_help() {
    println!("user-api {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: user-api [选项]");
    println!();
    println!("选项:");
    println!("  --version            打印版本信息并退出");
    println!("  --help               打印此帮助信息并退出");
    println!("  --generate-api-key   生成一个风险报告上报用的 API Key 并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 USER_API_ 前缀的环境变量完成，层级以 __ 分隔");
    println!("  例如 USER_API_DATABASE__URL、USER_API_SECURITY__JWT_SECRET");
}
