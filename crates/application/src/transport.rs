//! 传输连接抽象
//!
//! 会话只依赖这里的最小接口：发送一帧文本、发送心跳探测、关闭连接。
//! 具体实现（WebSocket 等）位于 web-api 层。

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("transport io error: {0}")]
    Io(String),
}

/// 全双工、按帧收发的连接
#[async_trait]
pub trait Transport: Send + Sync {
    /// 发送一帧文本，返回即表示底层已确认写出
    async fn send(&self, text: String) -> Result<(), TransportError>;

    /// 发送心跳探测
    async fn ping(&self) -> Result<(), TransportError>;

    /// 关闭连接，重复调用无副作用
    async fn close(&self);
}
