//! 房间服务入口
//!
//! 加载配置，恢复历史消息，组装聊天室与会话注册表，启动 WebSocket 服务。

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use application::{
    ChatRoom, ChatRoomDependencies, DocumentStore, HistoryStore, MemoryDocumentStore, Registry,
    RegistrySettings, SessionSettings, SystemClock,
};
use config::AppConfig;
use infrastructure::{HttpMembershipVerifier, RedisJsonStore};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    let room_id = config.room.id.clone();

    let store: Arc<dyn DocumentStore> = match &config.redis.url {
        Some(url) => Arc::new(RedisJsonStore::connect(url).await.context("连接 Redis 失败")?),
        None => {
            tracing::warn!("未配置 redis.url，历史消息仅保存在进程内存中");
            Arc::new(MemoryDocumentStore::new())
        }
    };
    let history = HistoryStore::load(store, config.room.history_key(), config.room.history_capacity).await;

    let verifier = HttpMembershipVerifier::new(&config.membership)?;
    tracing::info!(url = %verifier.url(), "成员校验接口");

    let room = ChatRoom::new(ChatRoomDependencies {
        room_id: room_id.clone(),
        channel: config.room.path.clone(),
        verifier: Arc::new(verifier),
        clock: Arc::new(SystemClock),
        history,
    });
    let endpoint = room.endpoint(&config.session.event_rules)?;

    let registry = Registry::new(
        RegistrySettings {
            max_connections: config.server.max_connections,
            session: SessionSettings::from_config(&config.session),
        },
        HashMap::from([(config.room.path.clone(), endpoint)]),
    );

    let app = router(AppState::new(registry.clone(), room_id.clone()));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("监听 {addr} 失败"))?;

    tracing::info!(room_id = %room_id, addr = %addr, path = %config.room.path, "房间服务启动");
    let sessions = registry.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            sessions.shutdown().await;
        })
        .await?;

    tracing::info!(room_id = %room_id, "房间服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("接收到 Ctrl+C 信号，开始优雅停机...");
                    }
                    _ = term.recv() => {
                        tracing::info!("接收到 SIGTERM 信号，开始优雅停机...");
                    }
                }
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, "无法注册 SIGTERM 处理，仅响应 Ctrl+C");
            }
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "等待停机信号失败");
    }
}
