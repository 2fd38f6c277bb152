//! 单次入站请求
//!
//! 处理函数通过 `respond` 缓冲回执，`close` 时按顺序统一下发。
//! 请求的结束只会被结算一次：无论是处理函数正常返回，还是外部提前 `close`/`fail`。

use std::sync::{Arc, Mutex, PoisonError};

use domain::{CorrelationId, Frame, EVENT_ERROR};
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::session::Session;

/// 请求结算结果，失败时携带诊断文本
pub type RequestOutcome = Result<Value, String>;

pub struct Request {
    id: CorrelationId,
    event: String,
    params: Value,
    session: Arc<Session>,
    state: Mutex<RequestState>,
}

struct RequestState {
    responses: Vec<(String, Value)>,
    settle: Option<oneshot::Sender<RequestOutcome>>,
}

impl Request {
    pub fn new(frame: Frame, session: Arc<Session>) -> (Arc<Self>, oneshot::Receiver<RequestOutcome>) {
        let (tx, rx) = oneshot::channel();
        let params = match frame.data {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let request = Arc::new(Self {
            id: frame.id,
            event: frame.event,
            params,
            session,
            state: Mutex::new(RequestState {
                responses: Vec::new(),
                settle: Some(tx),
            }),
        });
        (request, rx)
    }

    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    /// 读取字符串参数
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn is_closed(&self) -> bool {
        self.lock().settle.is_none()
    }

    /// 以请求自身的事件名缓冲回执
    pub fn respond(&self, payload: Value) {
        let event = self.event.clone();
        self.respond_to(event, payload);
    }

    /// 以指定事件名缓冲回执；同名回执均为对象时浅合并，否则覆盖
    pub fn respond_to(&self, event: impl Into<String>, payload: Value) {
        let event = event.into();
        let mut state = self.lock();
        if state.settle.is_none() {
            tracing::debug!(event = %event, "response after request settled is dropped");
            return;
        }

        match state.responses.iter_mut().find(|(name, _)| *name == event) {
            Some((_, existing)) => match (existing, payload) {
                (Value::Object(current), Value::Object(update)) => current.extend(update),
                (slot, payload) => *slot = payload,
            },
            None => state.responses.push((event, payload)),
        }
    }

    /// 立即向会话下发一帧，携带本请求的关联 ID
    pub fn send(&self, event: &str, data: Value) {
        self.session.send(event, data, self.id.clone());
    }

    /// 下发全部缓冲回执并结算成功。返回是否由本次调用完成结算。
    pub fn close(&self, result: Value) -> bool {
        let (settle, responses) = {
            let mut state = self.lock();
            match state.settle.take() {
                Some(settle) => (settle, std::mem::take(&mut state.responses)),
                None => return false,
            }
        };

        for (event, payload) in responses {
            self.session.send(&event, payload, self.id.clone());
        }
        let _ = settle.send(Ok(result));
        true
    }

    /// 结算失败并下发一帧 `error`。缓冲的回执被丢弃。
    pub fn fail(&self, error: impl std::fmt::Display) -> bool {
        let settle = {
            let mut state = self.lock();
            state.responses.clear();
            match state.settle.take() {
                Some(settle) => settle,
                None => return false,
            }
        };

        let message = error.to_string();
        tracing::warn!(
            session_id = %self.session.id(),
            event = %self.event,
            error = %message,
            "request failed"
        );
        let _ = settle.send(Err(message.clone()));
        self.session.send(EVENT_ERROR, Value::String(message), self.id.clone());
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RequestState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Endpoint;
    use crate::testing::{attach_session, detached_session, RecordingTransport};
    use serde_json::json;

    #[tokio::test]
    async fn responses_merge_objects_and_flush_in_order() {
        let transport = RecordingTransport::new();
        let (session, _connection) = attach_session(Endpoint::default(), transport.clone()).await;
        let frame = Frame::new("send", json!({"msgtype": "text"}), CorrelationId::from(3));
        let (request, mut outcome) = Request::new(frame, session);

        request.respond(json!({"status": "ok"}));
        request.respond_to("notice", json!("first"));
        request.respond(json!({"extra": 1}));
        request.respond_to("notice", json!("second"));

        assert!(request.close(json!(null)));
        assert!(!request.close(json!(null)));
        assert_eq!(outcome.try_recv().unwrap(), Ok(Value::Null));

        let frames = transport.wait_for(2).await;
        assert_eq!(
            frames[0],
            json!({"id": 3, "event": "send", "data": {"status": "ok", "extra": 1}})
        );
        assert_eq!(frames[1], json!({"id": 3, "event": "notice", "data": "second"}));
    }

    #[tokio::test]
    async fn fail_sends_single_error_frame() {
        let transport = RecordingTransport::new();
        let (session, _connection) = attach_session(Endpoint::default(), transport.clone()).await;
        let frame = Frame::new("send", Value::Null, CorrelationId::from(9));
        let (request, mut outcome) = Request::new(frame, session);

        request.respond(json!({"status": "ok"}));
        assert!(request.fail("boom"));
        assert!(!request.fail("again"));
        assert!(!request.close(Value::Null));
        assert_eq!(outcome.try_recv().unwrap(), Err("boom".to_string()));

        let frames = transport.wait_for(1).await;
        assert_eq!(frames, vec![json!({"id": 9, "event": "error", "data": "boom"})]);
    }

    #[test]
    fn missing_data_defaults_to_empty_params() {
        let session = detached_session();
        let (request, _rx) = Request::new(Frame::new("init", Value::Null, CorrelationId::none()), session);
        assert_eq!(request.params(), &json!({}));
        assert_eq!(request.param_str("cid"), None);
    }
}
