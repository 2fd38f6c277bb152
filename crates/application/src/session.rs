//! 连接会话
//!
//! 一个会话包装一条传输连接，负责：
//! - 入站帧解析与分发（`ping` / `close` 由协议层直接处理）
//! - 请求准入：同一会话内请求严格串行，按事件限制待处理数量
//! - 出站队列：每次只发送队首一帧，失败原地重试，保证顺序且不重复
//! - 心跳：空闲一个周期后发送探测，超时未收到应答即关闭会话
//! - 会话状态：保存查询参数与认证后的用户信息
//!
//! 传输连接可以被替换（断线重连），会话 ID、状态与未发送的出站帧保持不变。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use config::SessionConfig;
use domain::{CorrelationId, Frame, SessionId, EVENT_CLOSE, EVENT_PONG};
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::admission::{AdmissionError, AdmissionState, Ticket};
use crate::registry::Registry;
use crate::request::Request;
use crate::retry::Backoff;
use crate::routing::{Endpoint, Handler};
use crate::transport::Transport;

/// 会话运行参数
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    /// 出站帧发送失败后的重试间隔
    pub retry: Backoff,
}

impl SessionSettings {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            pong_timeout: config.pong_timeout(),
            retry: Backoff::default(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(1000),
            pong_timeout: Duration::from_millis(5000),
            retry: Backoff::default(),
        }
    }
}

type CloseCallback = Box<dyn FnOnce(&SessionId) + Send>;

pub struct Session {
    id: SessionId,
    path: String,
    endpoint: Arc<Endpoint>,
    registry: Weak<Registry>,
    settings: SessionSettings,
    closed: AtomicBool,
    inner: Mutex<SessionInner>,
    pong: Notify,
    on_close: Mutex<Option<CloseCallback>>,
}

struct SessionInner {
    transport: Option<Arc<dyn Transport>>,
    generation: u64,
    state: Map<String, Value>,
    admission: AdmissionState,
    outbound: VecDeque<String>,
    sending: bool,
    last_activity: Instant,
    heartbeat: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        id: SessionId,
        path: impl Into<String>,
        endpoint: Arc<Endpoint>,
        registry: Weak<Registry>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            path: path.into(),
            endpoint,
            registry,
            settings,
            closed: AtomicBool::new(false),
            inner: Mutex::new(SessionInner {
                transport: None,
                generation: 0,
                state: Map::new(),
                admission: AdmissionState::new(),
                outbound: VecDeque::new(),
                sending: false,
                last_activity: Instant::now(),
                heartbeat: None,
            }),
            pong: Notify::new(),
            on_close: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 尚未确认发送的出站帧数量
    pub fn pending_frames(&self) -> usize {
        self.lock().outbound.len()
    }

    /// 注册关闭回调，只会被调用一次
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce(&SessionId) + Send + 'static,
    {
        *self.on_close.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(callback));
    }

    /// 安装传输连接。已有旧连接时视为重连：旧连接被关闭，状态与出站队列保留。
    pub async fn attach(self: &Arc<Self>, transport: Arc<dyn Transport>) -> Connection {
        let (generation, previous) = {
            let mut inner = self.lock();
            inner.generation += 1;
            if let Some(handle) = inner.heartbeat.take() {
                handle.abort();
            }
            let previous = inner.transport.replace(transport);
            inner.last_activity = Instant::now();
            inner.heartbeat = Some(tokio::spawn(heartbeat(Arc::downgrade(self), inner.generation)));
            (inner.generation, previous)
        };

        if let Some(previous) = previous {
            info!(session_id = %self.id, path = %self.path, "session transport replaced");
            self.close_transport(previous.as_ref()).await;
        }

        for frame in &self.endpoint.pre_requests {
            if let Err(err) = self.submit(frame.clone()) {
                warn!(session_id = %self.id, event = %frame.event, error = %err, "pre-request rejected");
            }
        }
        self.kick();

        Connection {
            session: Arc::clone(self),
            generation,
        }
    }

    /// 出站帧入队，立即返回。会话关闭后静默丢弃。
    pub fn send(self: &Arc<Self>, event: &str, data: Value, id: CorrelationId) {
        if self.is_closed() {
            return;
        }
        let text = match Frame::new(event, data, id).encode() {
            Ok(text) => text,
            Err(err) => {
                warn!(session_id = %self.id, event = %event, error = %err, "failed to encode outbound frame");
                return;
            }
        };

        self.lock().outbound.push_back(text);
        self.kick();
    }

    /// 没有发送任务在运行时启动一个
    fn kick(self: &Arc<Self>) {
        let start = {
            let mut inner = self.lock();
            if inner.sending || inner.transport.is_none() || inner.outbound.is_empty() {
                false
            } else {
                inner.sending = true;
                true
            }
        };
        if start {
            tokio::spawn(Arc::clone(self).drain());
        }
    }

    async fn drain(self: Arc<Self>) {
        let mut attempt = 0u32;
        loop {
            let (transport, head) = {
                let mut inner = self.lock();
                let next = match (&inner.transport, inner.outbound.front()) {
                    (Some(transport), Some(head)) if !self.is_closed() => {
                        Some((Arc::clone(transport), head.clone()))
                    }
                    _ => None,
                };
                match next {
                    Some(next) => {
                        inner.last_activity = Instant::now();
                        next
                    }
                    None => {
                        inner.sending = false;
                        return;
                    }
                }
            };

            match transport.send(head).await {
                Ok(()) => {
                    attempt = 0;
                    self.lock().outbound.pop_front();
                }
                Err(err) => {
                    if self.is_closed() {
                        self.lock().sending = false;
                        return;
                    }
                    attempt += 1;
                    let delay = self.settings.retry.delay_at(attempt);
                    debug!(
                        session_id = %self.id,
                        attempt,
                        error = %err,
                        "outbound send failed, retrying head frame"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// 处理一帧入站文本。非法 JSON 直接关闭会话。
    pub async fn receive(self: &Arc<Self>, text: &str) {
        match Frame::parse(text) {
            Ok(Some(frame)) => self.dispatch(frame).await,
            Ok(None) => debug!(session_id = %self.id, "frame without string event ignored"),
            Err(err) => {
                warn!(session_id = %self.id, error = %err, "malformed inbound frame, closing session");
                self.close(None).await;
            }
        }
    }

    pub async fn dispatch(self: &Arc<Self>, frame: Frame) {
        if frame.is_ping() {
            self.send(EVENT_PONG, frame.data, frame.id);
        } else if frame.is_close() {
            self.close(Some(frame.data)).await;
        } else {
            debug!(session_id = %self.id, event = %frame.event, "inbound event");
            if let Err(err) = self.submit(frame) {
                debug!(session_id = %self.id, error = %err, "inbound event rejected");
            }
        }
    }

    /// 提交到准入流水线。被拒绝的事件不产生任何回执。
    pub fn submit(self: &Arc<Self>, frame: Frame) -> Result<(), AdmissionError> {
        if self.is_closed() {
            return Err(AdmissionError::Closed);
        }
        let route = self
            .endpoint
            .table
            .route(&frame.event)
            .cloned()
            .ok_or_else(|| AdmissionError::Forbidden {
                event: frame.event.clone(),
            })?;

        let ticket = self.lock().admission.admit(&frame.event, Some(route.cap))?;
        tokio::spawn(Arc::clone(self).run_request(frame, route.handler, ticket));
        Ok(())
    }

    async fn run_request(self: Arc<Self>, frame: Frame, handler: Handler, ticket: Ticket) {
        let event = frame.event.clone();
        if let Ticket::Parked(turn) = ticket {
            if turn.await.is_err() {
                return;
            }
        }
        let _slot = AdmissionSlot {
            session: &self,
            event: &event,
        };
        if self.is_closed() {
            return;
        }

        let (request, completion) = Request::new(frame, Arc::clone(&self));
        let task = tokio::spawn(handler(Arc::clone(&request)));
        tokio::select! {
            joined = task => match joined {
                Ok(Ok(result)) => {
                    request.close(result);
                }
                Ok(Err(err)) => {
                    request.fail(err);
                }
                Err(err) => {
                    request.fail(format!("handler aborted: {err}"));
                }
            },
            _ = completion => {
                debug!(session_id = %self.id, event = %event, "request settled before handler returned");
            }
        }
    }

    /// 幂等关闭。`reason` 非空时先尽力发送一帧 `close` 通知。
    pub async fn close(&self, reason: Option<Value>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let (transport, heartbeat) = {
            let mut inner = self.lock();
            inner.admission.clear();
            inner.outbound.clear();
            (inner.transport.take(), inner.heartbeat.take())
        };
        if let Some(handle) = heartbeat {
            handle.abort();
        }

        let reason = reason.filter(|reason| !reason.is_null());
        if let Some(transport) = transport {
            if let Some(reason) = &reason {
                match Frame::new(EVENT_CLOSE, reason.clone(), CorrelationId::none()).encode() {
                    Ok(text) => match timeout(self.settings.pong_timeout, transport.send(text)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            debug!(session_id = %self.id, error = %err, "close notice not delivered")
                        }
                        Err(_) => debug!(session_id = %self.id, "close notice timed out"),
                    },
                    Err(err) => warn!(session_id = %self.id, error = %err, "failed to encode close notice"),
                }
            }
            self.close_transport(transport.as_ref()).await;
        }

        info!(session_id = %self.id, path = %self.path, reason = ?reason, "session closed");

        let callback = self
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback(&self.id);
        }
    }

    /// 关闭底层连接，最多等待一个 pong 超时
    async fn close_transport(&self, transport: &dyn Transport) {
        if timeout(self.settings.pong_timeout, transport.close()).await.is_err() {
            warn!(session_id = %self.id, "transport close timed out");
        }
    }

    pub fn on_pong(&self) {
        self.pong.notify_waiters();
    }

    /// 合并写入会话状态
    pub fn session_set(&self, entries: Map<String, Value>) {
        self.lock().state.extend(entries);
    }

    pub fn session_get(&self, key: &str) -> Option<Value> {
        self.lock().state.get(key).cloned()
    }

    pub fn session_snapshot(&self) -> Map<String, Value> {
        self.lock().state.clone()
    }

    /// 删除单个键；`None` 清空全部状态
    pub fn session_del(&self, key: Option<&str>) {
        let mut inner = self.lock();
        match key {
            Some(key) => {
                inner.state.remove(key);
            }
            None => inner.state.clear(),
        }
    }

    /// 经由所属注册表广播
    pub fn broadcast(&self, event: &str, data: &Value, path: Option<&str>) -> usize {
        match self.registry.upgrade() {
            Some(registry) => registry.broadcast(event, data, path),
            None => 0,
        }
    }

    fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 持有期间占用准入槽位，释放时唤醒下一个等待的请求
struct AdmissionSlot<'a> {
    session: &'a Session,
    event: &'a str,
}

impl Drop for AdmissionSlot<'_> {
    fn drop(&mut self) {
        self.session.lock().admission.complete(self.event);
    }
}

async fn heartbeat(session: Weak<Session>, generation: u64) {
    loop {
        let deadline = {
            let Some(session) = session.upgrade() else {
                return;
            };
            let inner = session.lock();
            inner.last_activity + session.settings.heartbeat_interval
        };
        sleep_until(deadline).await;

        let Some(session) = session.upgrade() else {
            return;
        };
        let transport = {
            let mut inner = session.lock();
            if session.is_closed() || inner.generation != generation {
                return;
            }
            if Instant::now() < inner.last_activity + session.settings.heartbeat_interval {
                // 期间有出站流量，重新计时
                continue;
            }
            inner.last_activity = Instant::now();
            match &inner.transport {
                Some(transport) => Arc::clone(transport),
                None => return,
            }
        };

        let pong = session.pong.notified();
        tokio::pin!(pong);
        pong.as_mut().enable();

        // ping 本身可能被卡住的对端阻塞，与等待 pong 共用同一个截止时间
        let answered = timeout(session.settings.pong_timeout, async {
            if let Err(err) = transport.ping().await {
                debug!(session_id = %session.id, error = %err, "heartbeat ping failed");
            }
            pong.await;
        })
        .await;

        if answered.is_err() {
            if session.generation() == generation {
                warn!(session_id = %session.id, "heartbeat timeout, closing session");
                let closing = Arc::clone(&session);
                tokio::spawn(async move { closing.close(None).await });
            }
            return;
        }
    }
}

/// 某一次传输安装对应的入口。连接被替换后，旧入口上的通知全部失效。
#[derive(Clone)]
pub struct Connection {
    session: Arc<Session>,
    generation: u64,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session_id", &self.session.id)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Connection {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn is_current(&self) -> bool {
        self.session.generation() == self.generation
    }

    pub async fn receive(&self, text: &str) {
        if self.is_current() {
            self.session.receive(text).await;
        }
    }

    pub fn pong(&self) {
        if self.is_current() {
            self.session.on_pong();
        }
    }

    /// 底层连接已断开或出错
    pub async fn closed(&self) {
        if self.is_current() {
            self.session.close(None).await;
        }
    }
}
