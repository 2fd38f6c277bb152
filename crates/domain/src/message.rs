//! 历史消息模型
//!
//! 房间内每条聊天消息的作者、类型、内容与排序序列号。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DomainError;
use crate::value_objects::{TimestampMillis, UserId};

/// 消息作者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(alias = "uid")]
    pub id: UserId,
    #[serde(rename = "displayName", alias = "nickname")]
    pub display_name: String,
}

impl Author {
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// 允许发送的消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "imgurl")]
    ImageUrl,
    #[serde(rename = "videourl")]
    VideoUrl,
    #[serde(rename = "list")]
    List,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::ImageUrl => "imgurl",
            MessageKind::VideoUrl => "videourl",
            MessageKind::List => "list",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(MessageKind::Text),
            "imgurl" => Ok(MessageKind::ImageUrl),
            "videourl" => Ok(MessageKind::VideoUrl),
            "list" => Ok(MessageKind::List),
            other => Err(DomainError::UnsupportedMessageKind {
                kind: other.to_owned(),
            }),
        }
    }
}

/// 消息序列号：毫秒时间戳后接三位滚动计数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 历史消息条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "user")]
    pub author: Author,
    #[serde(rename = "msgtype")]
    pub kind: MessageKind,
    pub content: Value,
    pub timestamp: TimestampMillis,
    pub sequence: SequenceNumber,
}

impl HistoryEntry {
    /// 同一作者的显示名变化时就地修正，返回是否发生了修改。
    pub fn correct_author(&mut self, author: &Author) -> bool {
        if self.author.id != author.id || self.author.display_name == author.display_name {
            return false;
        }
        self.author.display_name = author.display_name.clone();
        true
    }
}

/// 消息内容是否存在：`null`、`false`、`0` 和空字符串视为缺失。
pub fn content_is_present(content: &Value) -> bool {
    match content {
        Value::Null | Value::Bool(false) => false,
        Value::String(text) => !text.is_empty(),
        Value::Number(number) => number.as_f64() != Some(0.0),
        _ => true,
    }
}
