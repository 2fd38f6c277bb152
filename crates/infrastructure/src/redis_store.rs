//! RedisJSON 文档存储
//!
//! 每个键保存一个 JSON 文档，使用 `JSON.TYPE` / `JSON.GET` / `JSON.SET` / `JSON.ARRAPPEND`。
//! 需要服务端加载 RedisJSON 模块（redis-stack）。

use std::time::Duration;

use application::store::{DocumentShape, DocumentStore, StoreError};
use application::{retry_async, Backoff, RetryConfig};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Clone)]
pub struct RedisJsonStore {
    connection: ConnectionManager,
}

impl RedisJsonStore {
    /// 建立连接，启动阶段对连接失败做有限次重试
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(map_redis_err)?;
        let config = RetryConfig {
            max_attempts: 5,
            backoff: Backoff::exponential(Duration::from_millis(200), Duration::from_secs(3)),
        };
        let connection = retry_async(config, || ConnectionManager::new(client.clone()))
            .await
            .map_err(map_redis_err)?;
        info!("connected to redis document store");
        Ok(Self { connection })
    }

    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

pub fn map_redis_err(err: redis::RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
        StoreError::Connection(err.to_string())
    } else {
        StoreError::Command(err.to_string())
    }
}

fn encode(document: &Value) -> Result<String, StoreError> {
    serde_json::to_string(document).map_err(|err| StoreError::Serialization(err.to_string()))
}

#[async_trait]
impl DocumentStore for RedisJsonStore {
    async fn type_of(&self, key: &str) -> Result<Option<DocumentShape>, StoreError> {
        let mut conn = self.connection.clone();
        let name: Option<String> = redis::cmd("JSON.TYPE")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        Ok(name.and_then(|name| {
            let shape = DocumentShape::from_type_name(&name);
            if shape.is_none() {
                warn!(key = %key, type_name = %name, "unknown JSON type name");
            }
            shape
        }))
    }

    async fn get(&self, key: &str) -> Result<Value, StoreError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = redis::cmd("JSON.GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        match raw {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|err| StoreError::Serialization(err.to_string()))
            }
            None => Ok(Value::Null),
        }
    }

    async fn set(&self, key: &str, document: &Value) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("JSON.SET")
            .arg(key)
            .arg(application::store::ROOT_PATH)
            .arg(encode(document)?)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn append(&self, key: &str, path: &str, entries: &[Value]) -> Result<u64, StoreError> {
        let mut cmd = redis::cmd("JSON.ARRAPPEND");
        cmd.arg(key).arg(path);
        for entry in entries {
            cmd.arg(encode(entry)?);
        }

        let mut conn = self.connection.clone();
        cmd.query_async(&mut conn).await.map_err(map_redis_err)
    }
}
