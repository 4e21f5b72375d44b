//! VaultCore 主入口
//! 托管多链钱包与清算引擎

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vaultcore::{api, app_state::AppState, config::Config, infrastructure::db};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载环境变量与配置
    dotenvy::dotenv().ok();
    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = Arc::new(Config::from_env_and_file(config_path.as_deref())?);
    config.validate().context("Invalid configuration")?;

    // 2. 初始化日志（结构化，JSON 可选）
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("vaultcore={},tower_http=info,sqlx=warn", config.logging.level).into());

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting VaultCore settlement engine");

    // 3. 连接数据库并运行迁移
    let pool = db::connect_pool(&config.database).await?;
    tracing::info!("Database connected");

    if std::env::var("SKIP_MIGRATIONS").is_err() {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Database migrations failed")?;
        tracing::info!("Database migrations completed");
    }

    // 4. 装配应用状态（链注册表在内部完成启动校验）
    let state = Arc::new(AppState::new(pool, Arc::clone(&config))?);

    // 5. 启动后台任务：充值监控 + 价格刷新
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    let monitored_chains: Vec<String> = config.chains.keys().cloned().collect();
    let monitor_handles = Arc::clone(&state.monitor).spawn_all(&monitored_chains, stop_rx);
    tracing::info!(chains = ?monitored_chains, "Deposit monitors started");

    Arc::clone(&state.price_service).start_price_updater().await;
    tracing::info!("Price updater started");

    // 6. 启动 HTTP 服务
    let router = api::build_router(Arc::clone(&state));
    let bind_addr = config.server.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!(addr = %bind_addr, "Server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 7. 优雅停机：通知监控任务收尾
    tracing::info!("Shutting down, stopping background tasks");
    let _ = stop_tx.send(true);
    futures::future::join_all(monitor_handles).await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
