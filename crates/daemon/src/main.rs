//! 房间守护进程入口

use std::sync::Arc;

use anyhow::Context;
use config::AppConfig;
use room_daemon::{router, RoomController};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load_daemon().context("加载配置失败")?;
    let controller = Arc::new(RoomController::new(&config.daemon));

    let addr = format!("{}:{}", config.daemon.host, config.daemon.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("监听 {addr} 失败"))?;

    tracing::info!(addr = %addr, "房间守护进程启动");
    axum::serve(listener, router(controller.clone()))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "等待停机信号失败");
            }
        })
        .await?;

    tracing::info!(rooms = ?controller.running(), "守护进程已停止");
    Ok(())
}
