//! 聊天室应用
//!
//! 连接建立后自动提交 `init`：校验房间号与成员身份，下发用户信息和历史消息。
//! 之后的 `send` 事件生成带序列号的消息，写入历史并广播给频道内所有会话。

use std::collections::BTreeMap;
use std::sync::Arc;

use domain::{
    content_is_present, Author, CorrelationId, DomainError, Frame, HistoryEntry, MessageKind,
};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::history::HistoryStore;
use crate::membership::{Credentials, MembershipVerifier, Verification};
use crate::request::Request;
use crate::routing::{Endpoint, EventTable, HandlerResult};
use crate::sequencer::MessageSequencer;
use crate::session::Session;

pub const EVENT_INIT: &str = "init";
pub const EVENT_SEND: &str = "send";
pub const EVENT_CHAT: &str = "chat";

/// 会话状态中保存认证用户的键
const SESSION_USER_KEY: &str = "user";

const CLOSE_WRONG_ROOM: &str = "enter_wrong_hole";
const CLOSE_REJECTED: &str = "illegal_request";
const CLOSE_UNEXPECTED: &str = "unexpected_error";

pub struct ChatRoomDependencies {
    pub room_id: String,
    /// 广播频道，即应用挂载的路径
    pub channel: String,
    pub verifier: Arc<dyn MembershipVerifier>,
    pub clock: Arc<dyn Clock>,
    pub history: HistoryStore,
}

pub struct ChatRoom {
    room_id: String,
    channel: String,
    verifier: Arc<dyn MembershipVerifier>,
    clock: Arc<dyn Clock>,
    state: Mutex<RoomState>,
}

/// 历史日志与序列号分配器始终在同一把锁下修改
struct RoomState {
    history: HistoryStore,
    sequencer: MessageSequencer,
}

impl ChatRoom {
    pub fn new(deps: ChatRoomDependencies) -> Arc<Self> {
        let ChatRoomDependencies {
            room_id,
            channel,
            verifier,
            clock,
            history,
        } = deps;
        let sequencer = MessageSequencer::resume_after(history.last().map(|entry| entry.sequence));

        Arc::new(Self {
            room_id,
            channel,
            verifier,
            clock,
            state: Mutex::new(RoomState { history, sequencer }),
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// 生成挂载到频道路径上的应用入口
    pub fn endpoint(self: &Arc<Self>, rules: &BTreeMap<String, u32>) -> Result<Endpoint, ApplicationError> {
        let init_room = Arc::clone(self);
        let send_room = Arc::clone(self);
        let table = EventTable::builder()
            .on(EVENT_INIT, move |request| {
                let room = Arc::clone(&init_room);
                async move { room.init(request).await }
            })
            .on(EVENT_SEND, move |request| {
                let room = Arc::clone(&send_room);
                async move { room.send_message(request).await }
            })
            .build(rules)?;

        Ok(Endpoint::new(table).with_pre_request(Frame::new(
            EVENT_INIT,
            Value::Null,
            CorrelationId::none(),
        )))
    }

    async fn init(&self, request: Arc<Request>) -> HandlerResult {
        let session = Arc::clone(request.session());
        let room_id = session_string(&session, "cid");
        if room_id.as_deref() != Some(self.room_id.as_str()) {
            warn!(session_id = %session.id(), room_id = ?room_id, "connection targets another room");
            session.close(Some(json!(CLOSE_WRONG_ROOM))).await;
            return Ok(Value::Null);
        }

        let credentials = Credentials {
            room_id: self.room_id.clone(),
            credential: session_string(&session, "cpassword").unwrap_or_default(),
            user_id: session_string(&session, "uid").unwrap_or_default(),
        };
        let author = match self.verifier.verify(&credentials).await {
            Ok(Verification::Accepted(author)) => author,
            Ok(Verification::Rejected { error_code }) => {
                let code = error_code.unwrap_or_else(|| CLOSE_REJECTED.to_owned());
                info!(session_id = %session.id(), user_id = %credentials.user_id, code = %code, "membership rejected");
                session.close(Some(Value::String(code))).await;
                return Ok(Value::Null);
            }
            Err(err) => {
                error!(session_id = %session.id(), error = %err, "membership verification failed");
                session.close(Some(json!(CLOSE_UNEXPECTED))).await;
                return Ok(Value::Null);
            }
        };

        let user = to_wire(&author)?;
        let mut entry = Map::new();
        entry.insert(SESSION_USER_KEY.to_owned(), user.clone());
        session.session_set(entry);

        let mut state = self.state.lock().await;
        let corrected = state.history.correct_author(&author);
        let replace = json!({
            "ation": "replace",
            "chatqueue": to_wire(&state.history.snapshot())?,
        });

        // `sid` 供客户端断线后通过查询参数恢复同一会话
        session.send(
            EVENT_INIT,
            json!({ "user": user, "sid": session.id().as_str() }),
            CorrelationId::none(),
        );
        if corrected {
            info!(room_id = %self.room_id, user_id = %author.id, "display name changed, rebroadcasting history");
            session.broadcast(EVENT_CHAT, &replace, Some(&self.channel));
        } else {
            session.send(EVENT_CHAT, replace, CorrelationId::none());
        }
        info!(session_id = %session.id(), user_id = %author.id, "member joined");
        Ok(Value::Null)
    }

    async fn send_message(&self, request: Arc<Request>) -> HandlerResult {
        let params = request.params();
        let kind = params.get("msgtype").filter(|kind| content_is_present(kind));
        let content = params.get("content").filter(|content| content_is_present(content));
        let (Some(kind), Some(content)) = (kind, content) else {
            request.respond(reply_error("invalid_message"));
            return Ok(Value::Null);
        };

        let Some(kind) = kind.as_str().and_then(|kind| kind.parse::<MessageKind>().ok()) else {
            request.respond(reply_error("unsupported_msgtype"));
            return Ok(Value::Null);
        };

        let author = request
            .session()
            .session_get(SESSION_USER_KEY)
            .and_then(|user| serde_json::from_value::<Author>(user).ok());
        let Some(author) = author else {
            request.respond(reply_error("unauthenticated"));
            return Ok(Value::Null);
        };

        self.post(request.session(), author, kind, content.clone()).await?;
        request.respond(json!({ "status": "ok" }));
        Ok(Value::Null)
    }

    /// 生成消息、写入历史并向频道广播。持久化失败只记录日志。
    pub async fn post(
        &self,
        origin: &Session,
        author: Author,
        kind: MessageKind,
        content: Value,
    ) -> Result<HistoryEntry, ApplicationError> {
        let mut state = self.state.lock().await;
        let timestamp = self.clock.now_millis();
        let sequence = state.sequencer.next(timestamp);
        let entry = HistoryEntry {
            author,
            kind,
            content,
            timestamp,
            sequence,
        };

        if let Err(err) = state.history.append(entry.clone()).await {
            warn!(room_id = %self.room_id, sequence = %sequence, error = %err, "message kept in memory only");
        }

        let update = json!({
            "ation": "concat",
            "chatqueue": [to_wire(&entry)?],
        });
        info!(room_id = %self.room_id, user_id = %entry.author.id, sequence = %sequence, kind = %kind, "chat message");
        origin.broadcast(EVENT_CHAT, &update, Some(&self.channel));
        Ok(entry)
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.state.lock().await.history.snapshot()
    }
}

fn session_string(session: &Session, key: &str) -> Option<String> {
    match session.session_get(key)? {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn reply_error(code: &str) -> Value {
    json!({ "status": "error", "error": code })
}

fn to_wire<T: serde::Serialize>(value: &T) -> Result<Value, ApplicationError> {
    serde_json::to_value(value).map_err(|err| DomainError::frame_encoding(err.to_string()).into())
}
