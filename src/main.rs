// ==========================================
// 工厂生产排程系统 - 服务主入口
// ==========================================
// 启动顺序: 日志 → 进程配置 → 数据库/AppState → 清扫任务 → HTTP
// ==========================================

use std::sync::Arc;

use factory_scheduling::app::{router, AppState, HttpState, SlotSweeper, SweeperConfig};
use factory_scheduling::config::ServiceConfig;
use factory_scheduling::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", factory_scheduling::APP_NAME);
    tracing::info!("系统版本: {}", factory_scheduling::VERSION);
    tracing::info!("==================================================");

    let cfg = ServiceConfig::from_env()?;
    tracing::info!("使用数据库: {}", cfg.db_path);

    let app = Arc::new(AppState::new(&cfg.db_path).map_err(anyhow::Error::msg)?);

    // 时段清扫
    let sweeper = Arc::new(SlotSweeper::new(
        app.urgent_insert_api.clone(),
        SweeperConfig {
            interval: cfg.sweep_interval,
            horizon_hours: cfg.sweep_horizon_hours,
        },
    ));
    let sweeper_handle = sweeper.clone().start();

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    tracing::info!("HTTP 服务监听: {}", cfg.bind_addr);

    axum::serve(listener, router(HttpState::new(app)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.shutdown();
    sweeper_handle.abort();
    tracing::info!("服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "无法监听退出信号");
    }
}
