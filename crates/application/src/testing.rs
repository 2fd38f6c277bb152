//! 单元测试共用的替身实现

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use domain::SessionId;
use serde_json::Value;
use tokio::sync::Notify;

use crate::routing::Endpoint;
use crate::session::{Connection, Session, SessionSettings};
use crate::store::memory::MemoryDocumentStore;
use crate::store::{DocumentShape, DocumentStore, StoreError};
use crate::transport::{Transport, TransportError};

/// 记录所有已发送帧的传输替身，可注入发送失败
#[derive(Default)]
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<String>>,
    fail_remaining: AtomicUsize,
    failures: AtomicUsize,
    pings: AtomicUsize,
    closed: AtomicBool,
    notify: Notify,
    auto_pong: Mutex<Option<Connection>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 接下来的 `count` 次发送返回错误
    pub(crate) fn fail_next(&self, count: usize) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    pub(crate) fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub(crate) fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 收到 ping 时立即回 pong
    pub(crate) fn auto_pong(&self, connection: Connection) {
        *self.auto_pong.lock().unwrap() = Some(connection);
    }

    pub(crate) fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    /// 等待至少 `count` 帧送达
    pub(crate) async fn wait_for(&self, count: usize) -> Vec<Value> {
        let waited = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.sent.lock().unwrap().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {count} frames, got {:?}", self.sent());
        self.sent()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(TransportError::Io("injected failure".into()));
        }
        self.sent.lock().unwrap().push(text);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let connection = self.auto_pong.lock().unwrap().clone();
        if let Some(connection) = connection {
            connection.pong();
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// 对端停止读取：发送、ping、关闭都永远不会完成
#[derive(Default)]
pub(crate) struct StalledTransport {
    pings: AtomicUsize,
}

impl StalledTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StalledTransport {
    async fn send(&self, _text: String) -> Result<(), TransportError> {
        std::future::pending().await
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn close(&self) {
        std::future::pending::<()>().await
    }
}

/// 未安装传输连接、不属于任何注册表的会话
pub(crate) fn detached_session() -> Arc<Session> {
    Session::new(
        SessionId::new("detached"),
        "/chat",
        Arc::new(Endpoint::default()),
        Weak::new(),
        SessionSettings::default(),
    )
}

pub(crate) async fn attach_session(
    endpoint: Endpoint,
    transport: Arc<RecordingTransport>,
) -> (Arc<Session>, Connection) {
    let session = Session::new(
        SessionId::new("test0001"),
        "/chat",
        Arc::new(endpoint),
        Weak::new(),
        SessionSettings::default(),
    );
    let connection = session.attach(transport).await;
    (session, connection)
}

/// 可按操作类型注入失败的文档存储
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryDocumentStore,
    fail_reads: AtomicBool,
    fail_appends: AtomicBool,
    fail_sets: AtomicBool,
    appends: AtomicUsize,
    covers: AtomicUsize,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inner(&self) -> &MemoryDocumentStore {
        &self.inner
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_sets(&self, fail: bool) {
        self.fail_sets.store(fail, Ordering::SeqCst);
    }

    /// 增量追加的调用次数（含失败）
    pub(crate) fn appends(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    /// 整体覆盖的调用次数（含失败）
    pub(crate) fn covers(&self) -> usize {
        self.covers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn type_of(&self, key: &str) -> Result<Option<DocumentShape>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("injected read failure".into()));
        }
        self.inner.type_of(key).await
    }

    async fn get(&self, key: &str) -> Result<Value, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("injected read failure".into()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, document: &Value) -> Result<(), StoreError> {
        self.covers.fetch_add(1, Ordering::SeqCst);
        if self.fail_sets.load(Ordering::SeqCst) {
            return Err(StoreError::Command("injected set failure".into()));
        }
        self.inner.set(key, document).await
    }

    async fn append(&self, key: &str, path: &str, entries: &[Value]) -> Result<u64, StoreError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Command("injected append failure".into()));
        }
        self.inner.append(key, path, entries).await
    }
}
