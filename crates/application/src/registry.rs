//! 会话注册表与广播
//!
//! 注册表持有进程内所有存活会话，按挂载路径把新连接交给对应应用，
//! 并负责按频道（路径）向会话扇出消息。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use domain::{CorrelationId, SessionId};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::routing::Endpoint;
use crate::session::{Connection, Session, SessionSettings};
use crate::transport::Transport;

/// 会话 ID 长度
const SESSION_ID_LEN: usize = 8;

/// 重连时携带旧会话 ID 的查询参数
pub const RECONNECT_QUERY_KEY: &str = "sid";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no application mounted at `{path}`")]
    UnknownRoute { path: String },
    #[error("connection limit {limit} reached")]
    Full { limit: usize },
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub max_connections: usize,
    pub session: SessionSettings,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            max_connections: 500,
            session: SessionSettings::default(),
        }
    }
}

pub struct Registry {
    endpoints: HashMap<String, Arc<Endpoint>>,
    sessions: Mutex<BTreeMap<SessionId, Arc<Session>>>,
    settings: RegistrySettings,
    this: Weak<Registry>,
}

impl Registry {
    pub fn new(settings: RegistrySettings, endpoints: HashMap<String, Endpoint>) -> Arc<Self> {
        let endpoints = endpoints
            .into_iter()
            .map(|(path, endpoint)| (path, Arc::new(endpoint)))
            .collect();
        Arc::new_cyclic(|this| Self {
            endpoints,
            sessions: Mutex::new(BTreeMap::new()),
            settings,
            this: this.clone(),
        })
    }

    pub fn has_route(&self, path: &str) -> bool {
        self.endpoints.contains_key(path)
    }

    /// 已挂载应用的路径
    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    /// 接入一条新连接。
    ///
    /// 查询参数（`sid` 除外）写入会话状态；携带 `sid` 且对应会话仍存活于同一路径时，
    /// 替换该会话的传输连接而不是新建会话。
    pub async fn accept(
        &self,
        transport: Arc<dyn Transport>,
        path: &str,
        mut query: HashMap<String, String>,
    ) -> Result<Connection, RegistryError> {
        let endpoint = self
            .endpoints
            .get(path)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownRoute {
                path: path.to_owned(),
            })?;

        let sid = query.remove(RECONNECT_QUERY_KEY);
        let state: Map<String, Value> = query
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();

        if let Some(existing) = sid.and_then(|sid| self.reconnect_target(&sid, path)) {
            info!(session_id = %existing.id(), path = %path, "session reconnecting");
            existing.session_set(state);
            return Ok(existing.attach(transport).await);
        }

        let session = {
            let mut sessions = self.lock();
            if sessions.len() >= self.settings.max_connections {
                warn!(path = %path, limit = self.settings.max_connections, "connection limit reached");
                return Err(RegistryError::Full {
                    limit: self.settings.max_connections,
                });
            }

            let id = loop {
                let candidate = generate_session_id();
                if !sessions.contains_key(&candidate) {
                    break candidate;
                }
            };
            let session = Session::new(
                id.clone(),
                path,
                endpoint,
                self.this.clone(),
                self.settings.session.clone(),
            );
            sessions.insert(id, Arc::clone(&session));
            session
        };

        let registry = self.this.clone();
        session.on_close(move |id| {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        });
        session.session_set(state);

        info!(session_id = %session.id(), path = %path, sessions = self.len(), "session accepted");
        Ok(session.attach(transport).await)
    }

    fn reconnect_target(&self, sid: &str, path: &str) -> Option<Arc<Session>> {
        let session = self.session(&SessionId::new(sid))?;
        (session.path() == path && !session.is_closed()).then_some(session)
    }

    /// 向所有存活会话（可按路径过滤）发送一帧，返回投递的会话数
    pub fn broadcast(&self, event: &str, data: &Value, path: Option<&str>) -> usize {
        let targets: Vec<Arc<Session>> = self
            .lock()
            .values()
            .filter(|session| path.map_or(true, |path| session.path() == path))
            .cloned()
            .collect();

        for session in &targets {
            session.send(event, data.clone(), CorrelationId::none());
        }
        targets.len()
    }

    pub fn session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let removed = self.lock().remove(id);
        if removed.is_some() {
            info!(session_id = %id, sessions = self.len(), "session removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 关闭全部会话
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.lock().values().cloned().collect();
        info!(count = sessions.len(), "closing all sessions");
        for session in sessions {
            session.close(Some(json!("server_shutdown"))).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<SessionId, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn generate_session_id() -> SessionId {
    let id: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect();
    SessionId::new(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;

    fn registry(max_connections: usize) -> Arc<Registry> {
        let endpoints = HashMap::from([
            ("/chat".to_string(), Endpoint::default()),
            ("/ops".to_string(), Endpoint::default()),
        ]);
        Registry::new(
            RegistrySettings {
                max_connections,
                session: SessionSettings::default(),
            },
            endpoints,
        )
    }

    #[test]
    fn generated_ids_are_short_alphanumeric() {
        let id = generate_session_id();
        assert_eq!(id.as_str().len(), SESSION_ID_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn unknown_route_is_rejected() {
        let registry = registry(10);
        let err = registry
            .accept(RecordingTransport::new(), "/nope", HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::UnknownRoute { path: "/nope".into() });
        assert!(registry.is_empty());
        assert!(!registry.has_route("/nope"));

        let mut routes: Vec<_> = registry.routes().collect();
        routes.sort_unstable();
        assert_eq!(routes, vec!["/chat", "/ops"]);
    }

    #[tokio::test]
    async fn ceiling_rejects_extra_connections() {
        let registry = registry(2);
        registry.accept(RecordingTransport::new(), "/chat", HashMap::new()).await.unwrap();
        registry.accept(RecordingTransport::new(), "/chat", HashMap::new()).await.unwrap();
        let err = registry
            .accept(RecordingTransport::new(), "/chat", HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::Full { limit: 2 });
    }

    #[tokio::test]
    async fn query_becomes_session_state_and_close_removes_entry() {
        let registry = registry(10);
        let query = HashMap::from([("cid".to_string(), "1001".to_string())]);
        let connection = registry
            .accept(RecordingTransport::new(), "/chat", query)
            .await
            .unwrap();
        let session = Arc::clone(connection.session());

        assert_eq!(session.session_get("cid"), Some(json!("1001")));
        assert_eq!(registry.len(), 1);

        connection.closed().await;
        assert!(registry.is_empty());
        assert!(registry.session(session.id()).is_none());
    }

    #[tokio::test]
    async fn broadcast_filters_by_path() {
        let registry = registry(10);
        let chat_a = RecordingTransport::new();
        let chat_b = RecordingTransport::new();
        let ops = RecordingTransport::new();
        registry.accept(chat_a.clone(), "/chat", HashMap::new()).await.unwrap();
        registry.accept(chat_b.clone(), "/chat", HashMap::new()).await.unwrap();
        registry.accept(ops.clone(), "/ops", HashMap::new()).await.unwrap();

        let delivered = registry.broadcast("notice", &json!({"n": 1}), Some("/chat"));
        assert_eq!(delivered, 2);

        for transport in [&chat_a, &chat_b] {
            let frames = transport.wait_for(1).await;
            assert_eq!(frames[0], json!({"id": 0, "event": "notice", "data": {"n": 1}}));
        }
        assert!(ops.sent().is_empty());

        assert_eq!(registry.broadcast("all", &Value::Null, None), 3);
    }

    #[tokio::test]
    async fn failing_session_does_not_block_others() {
        let registry = registry(10);
        let broken = RecordingTransport::new();
        broken.fail_next(usize::MAX);
        let healthy = RecordingTransport::new();
        registry.accept(broken.clone(), "/chat", HashMap::new()).await.unwrap();
        registry.accept(healthy.clone(), "/chat", HashMap::new()).await.unwrap();

        registry.broadcast("notice", &json!("hi"), Some("/chat"));

        let frames = healthy.wait_for(1).await;
        assert_eq!(frames[0]["data"], json!("hi"));
        assert!(broken.sent().is_empty());
    }

    #[tokio::test]
    async fn sid_query_reattaches_live_session() {
        let registry = registry(1);
        let first = RecordingTransport::new();
        let connection = registry
            .accept(first.clone(), "/chat", HashMap::from([("uid".to_string(), "7".to_string())]))
            .await
            .unwrap();
        let id = connection.session().id().clone();

        let second = RecordingTransport::new();
        let query = HashMap::from([(RECONNECT_QUERY_KEY.to_string(), id.to_string())]);
        let resumed = registry.accept(second, "/chat", query).await.unwrap();

        assert_eq!(resumed.session().id(), &id);
        assert_eq!(resumed.session().session_get("uid"), Some(json!("7")));
        assert_eq!(resumed.session().session_get(RECONNECT_QUERY_KEY), None);
        assert!(first.is_closed());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn stale_sid_opens_fresh_session_without_storing_it() {
        let registry = registry(2);
        let query = HashMap::from([
            (RECONNECT_QUERY_KEY.to_string(), "gone0000".to_string()),
            ("uid".to_string(), "7".to_string()),
        ]);
        let connection = registry
            .accept(RecordingTransport::new(), "/chat", query)
            .await
            .unwrap();

        let session = connection.session();
        assert_ne!(session.id().as_str(), "gone0000");
        assert_eq!(session.session_get("uid"), Some(json!("7")));
        assert_eq!(session.session_get(RECONNECT_QUERY_KEY), None);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_every_session() {
        let registry = registry(10);
        let transport = RecordingTransport::new();
        registry.accept(transport.clone(), "/chat", HashMap::new()).await.unwrap();

        registry.shutdown().await;

        assert!(registry.is_empty());
        assert_eq!(
            transport.sent(),
            vec![json!({"id": 0, "event": "close", "data": "server_shutdown"})]
        );
    }
}
