//! WebSocket 传输适配
//!
//! 写半边放在异步锁后面：会话的出站队列保证同一时刻只有一帧在途，
//! 心跳探测与关闭则可能与之并发。

use application::{Transport, TransportError};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::Mutex;

pub struct WsTransport {
    sink: Mutex<SplitSink<WebSocket, WsMessage>>,
}

impl WsTransport {
    pub fn new(sink: SplitSink<WebSocket, WsMessage>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    async fn write(&self, message: WsMessage) -> Result<(), TransportError> {
        self.sink
            .lock()
            .await
            .send(message)
            .await
            .map_err(|err| TransportError::Io(err.to_string()))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        self.write(WsMessage::Text(text.into())).await
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.write(WsMessage::Ping(Bytes::new())).await
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if let Err(err) = sink.send(WsMessage::Close(None)).await {
            tracing::debug!(error = %err, "close frame not delivered");
        }
        let _ = sink.close().await;
    }
}
