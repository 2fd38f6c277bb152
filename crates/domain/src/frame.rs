//! 线路帧定义
//!
//! 每个传输帧承载一个 JSON 文档 `{id, event, data}`，双向通用。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{DomainError, DomainResult};

/// 客户端心跳请求
pub const EVENT_PING: &str = "ping";
/// 心跳应答
pub const EVENT_PONG: &str = "pong";
/// 关闭通知（双向）
pub const EVENT_CLOSE: &str = "close";
/// 请求失败时下发的诊断信息
pub const EVENT_ERROR: &str = "error";

/// 请求关联 ID，原样回显给客户端。
///
/// 缺省或为 `null` 时视为 `0`，表示不需要回执。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct CorrelationId(Value);

impl CorrelationId {
    pub fn none() -> Self {
        Self(Value::from(0))
    }

    pub fn is_none(&self) -> bool {
        self.0 == Value::from(0)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::none()
    }
}

impl From<Value> for CorrelationId {
    fn from(value: Value) -> Self {
        if value.is_null() {
            Self::none()
        } else {
            Self(value)
        }
    }
}

impl From<u64> for CorrelationId {
    fn from(value: u64) -> Self {
        Self(Value::from(value))
    }
}

impl From<CorrelationId> for Value {
    fn from(value: CorrelationId) -> Self {
        value.0
    }
}

/// 传输帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub id: CorrelationId,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value, id: CorrelationId) -> Self {
        Self {
            id,
            event: event.into(),
            data,
        }
    }

    /// 解析入站文本帧。
    ///
    /// 非法 JSON 返回错误；`event` 不是字符串的文档返回 `Ok(None)`，由调用方忽略。
    pub fn parse(text: &str) -> DomainResult<Option<Self>> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| DomainError::malformed_frame(err.to_string()))?;

        if !matches!(value.get("event"), Some(Value::String(_))) {
            return Ok(None);
        }

        serde_json::from_value(value)
            .map(Some)
            .map_err(|err| DomainError::malformed_frame(err.to_string()))
    }

    /// 序列化为线路文本。
    pub fn encode(&self) -> DomainResult<String> {
        serde_json::to_string(self).map_err(|err| DomainError::frame_encoding(err.to_string()))
    }

    pub fn is_ping(&self) -> bool {
        self.event == EVENT_PING
    }

    pub fn is_close(&self) -> bool {
        self.event == EVENT_CLOSE
    }
}
