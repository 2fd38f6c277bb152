//! 持久化文档存储抽象
//!
//! 每个房间的历史消息对应一个键下的 JSON 文档，只用到四个原语：
//! 查询类型、读取、整体覆盖、向数组追加。

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),
    #[error("store command failed: {0}")]
    Command(String),
    #[error("document serialization failed: {0}")]
    Serialization(String),
    #[error("unsupported document path: {0}")]
    UnsupportedPath(String),
}

/// 文档顶层类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentShape {
    Array,
    Object,
    String,
    Integer,
    Number,
    Boolean,
    Null,
}

impl DocumentShape {
    /// 解析 RedisJSON `JSON.TYPE` 返回的类型名
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "null" => Some(Self::Null),
            _ => None,
        }
    }

    pub fn of(value: &Value) -> Self {
        match value {
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
            Value::String(_) => Self::String,
            Value::Number(number) if number.is_i64() || number.is_u64() => Self::Integer,
            Value::Number(_) => Self::Number,
            Value::Bool(_) => Self::Boolean,
            Value::Null => Self::Null,
        }
    }
}

/// 文档根路径
pub const ROOT_PATH: &str = ".";

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 文档类型，键不存在时返回 `None`
    async fn type_of(&self, key: &str) -> Result<Option<DocumentShape>, StoreError>;

    async fn get(&self, key: &str) -> Result<Value, StoreError>;

    async fn set(&self, key: &str, document: &Value) -> Result<(), StoreError>;

    /// 向 `path` 处的数组追加元素，返回追加后的长度
    async fn append(&self, key: &str, path: &str, entries: &[Value]) -> Result<u64, StoreError>;
}

pub mod memory {
    use std::collections::HashMap;
    use std::sync::{Mutex, PoisonError};

    use async_trait::async_trait;
    use serde_json::Value;

    use super::{DocumentShape, DocumentStore, StoreError};

    /// 进程内文档存储，未配置 Redis 时与测试中使用
    #[derive(Debug, Default)]
    pub struct MemoryDocumentStore {
        documents: Mutex<HashMap<String, Value>>,
    }

    impl MemoryDocumentStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn document(&self, key: &str) -> Option<Value> {
            self.lock().get(key).cloned()
        }

        pub fn insert(&self, key: &str, document: Value) {
            self.lock().insert(key.to_owned(), document);
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
            self.documents.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    fn is_root(path: &str) -> bool {
        matches!(path, "." | "$")
    }

    #[async_trait]
    impl DocumentStore for MemoryDocumentStore {
        async fn type_of(&self, key: &str) -> Result<Option<DocumentShape>, StoreError> {
            Ok(self.lock().get(key).map(DocumentShape::of))
        }

        async fn get(&self, key: &str) -> Result<Value, StoreError> {
            Ok(self.lock().get(key).cloned().unwrap_or(Value::Null))
        }

        async fn set(&self, key: &str, document: &Value) -> Result<(), StoreError> {
            self.lock().insert(key.to_owned(), document.clone());
            Ok(())
        }

        async fn append(&self, key: &str, path: &str, entries: &[Value]) -> Result<u64, StoreError> {
            if !is_root(path) {
                return Err(StoreError::UnsupportedPath(path.to_owned()));
            }
            let mut documents = self.lock();
            match documents.get_mut(key) {
                Some(Value::Array(items)) => {
                    items.extend(entries.iter().cloned());
                    Ok(items.len() as u64)
                }
                Some(_) => Err(StoreError::Command(format!("document at `{key}` is not an array"))),
                None => Err(StoreError::Command(format!("no document at `{key}`"))),
            }
        }
    }

}
