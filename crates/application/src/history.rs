//! 有界历史消息日志
//!
//! 内存中的环形日志是唯一可写副本，持久化文档只是尽力同步的镜像。
//! 追加时优先增量写入；增量写入失败或积压的淘汰数超过容量时整体覆盖（cover）。

use std::collections::VecDeque;
use std::sync::Arc;

use domain::{Author, HistoryEntry};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::store::{DocumentShape, DocumentStore, StoreError, ROOT_PATH};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("history rewrite failed: {0}")]
    Cover(#[source] StoreError),
    #[error("history serialization failed: {0}")]
    Serialization(String),
}

pub struct HistoryStore {
    store: Arc<dyn DocumentStore>,
    key: String,
    capacity: usize,
    entries: VecDeque<HistoryEntry>,
    /// 上次成功覆盖以来被淘汰的条目数
    overflow: usize,
}

impl HistoryStore {
    /// 启动时从持久化文档恢复历史。
    ///
    /// 文档是数组时取最后 `capacity` 条（无法解析的条目跳过）；
    /// 不存在或类型不对时把文档初始化为空数组。读取失败按无历史处理。
    pub async fn load(store: Arc<dyn DocumentStore>, key: impl Into<String>, capacity: usize) -> Self {
        let key = key.into();
        let capacity = capacity.max(1);
        let mut history = Self {
            store,
            key,
            capacity,
            entries: VecDeque::with_capacity(capacity),
            overflow: 0,
        };

        match history.read_existing().await {
            Ok(Some(entries)) => {
                let skip = entries.len().saturating_sub(capacity);
                history.entries.extend(entries.into_iter().skip(skip));
                info!(key = %history.key, count = history.entries.len(), "history loaded");
            }
            Ok(None) => {
                if let Err(err) = history.store.set(&history.key, &Value::Array(Vec::new())).await {
                    warn!(key = %history.key, error = %err, "failed to initialize history document");
                }
            }
            Err(err) => {
                warn!(key = %history.key, error = %err, "failed to read history, starting empty");
            }
        }
        history
    }

    async fn read_existing(&self) -> Result<Option<Vec<HistoryEntry>>, StoreError> {
        if self.store.type_of(&self.key).await? != Some(DocumentShape::Array) {
            return Ok(None);
        }
        let document = self.store.get(&self.key).await?;
        let Value::Array(items) = document else {
            return Ok(None);
        };

        let entries = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<HistoryEntry>(item) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(key = %self.key, error = %err, "skipping unreadable history entry");
                    None
                }
            })
            .collect();
        Ok(Some(entries))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    /// 修正同一作者在内存窗口内的显示名，返回是否有条目被修改。
    /// 已被淘汰或只存在于持久化文档中的条目不做处理。
    pub fn correct_author(&mut self, author: &Author) -> bool {
        let mut changed = false;
        for entry in self.entries.iter_mut() {
            changed |= entry.correct_author(author);
        }
        changed
    }

    /// 追加一条消息。内存日志总会更新；持久化失败只有在覆盖也失败时才返回错误。
    pub async fn append(&mut self, entry: HistoryEntry) -> Result<(), HistoryError> {
        let document =
            serde_json::to_value(&entry).map_err(|err| HistoryError::Serialization(err.to_string()))?;

        self.entries.push_back(entry);
        if self.entries.len() > self.capacity {
            self.entries.pop_front();
            self.overflow += 1;
        }

        if self.overflow > self.capacity {
            return self.cover().await;
        }

        if let Err(err) = self.store.append(&self.key, ROOT_PATH, &[document]).await {
            warn!(key = %self.key, error = %err, "history append failed, rewriting document");
            return self.cover().await;
        }
        Ok(())
    }

    /// 用内存日志整体覆盖持久化文档
    pub async fn cover(&mut self) -> Result<(), HistoryError> {
        let document = serde_json::to_value(&self.entries)
            .map_err(|err| HistoryError::Serialization(err.to_string()))?;
        match self.store.set(&self.key, &document).await {
            Ok(()) => {
                self.overflow = 0;
                info!(key = %self.key, count = self.entries.len(), "history document rewritten");
                Ok(())
            }
            Err(err) => {
                error!(key = %self.key, error = %err, "history rewrite failed");
                Err(HistoryError::Cover(err))
            }
        }
    }
}
