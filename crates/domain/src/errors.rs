//! 领域模型错误定义
//!
//! 定义了帧解析、消息校验等环节可能出现的错误类型。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 入站帧不是合法的 JSON 文档
    #[error("帧格式错误: {message}")]
    MalformedFrame { message: String },

    /// 出站帧序列化失败
    #[error("帧编码失败: {message}")]
    FrameEncoding { message: String },

    /// 不在允许列表中的消息类型
    #[error("不支持的消息类型: {kind}")]
    UnsupportedMessageKind { kind: String },

    /// 参数校验失败
    #[error("参数无效: {field}: {reason}")]
    InvalidArgument { field: String, reason: String },
}

impl DomainError {
    /// 创建帧格式错误
    pub fn malformed_frame(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// 创建帧编码错误
    pub fn frame_encoding(message: impl Into<String>) -> Self {
        Self::FrameEncoding {
            message: message.into(),
        }
    }

    /// 创建参数错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
