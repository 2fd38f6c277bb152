//! 会话级请求准入控制
//!
//! 每个会话同一时刻只执行一个请求，其余已准入的请求按到达顺序排队。
//! 每种事件另有准入上限：计数包含排队中与执行中的请求，超过上限的请求直接拒绝。

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;

use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("event `{event}` is not allowed")]
    Forbidden { event: String },
    #[error("event `{event}` exceeds admission cap {cap}")]
    CapExceeded { event: String, cap: u32 },
    #[error("session closed")]
    Closed,
}

/// 单个事件的准入上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionCap {
    Unlimited,
    Limit(NonZeroU32),
}

impl From<u32> for AdmissionCap {
    fn from(value: u32) -> Self {
        match NonZeroU32::new(value) {
            Some(limit) => AdmissionCap::Limit(limit),
            None => AdmissionCap::Unlimited,
        }
    }
}

/// 准入结果：立即执行，或等待前序请求完成后被唤醒
#[derive(Debug)]
pub enum Ticket {
    Ready,
    Parked(oneshot::Receiver<()>),
}

#[derive(Debug, Default)]
pub struct AdmissionState {
    pending: HashMap<String, u32>,
    executing: bool,
    waiters: VecDeque<(String, oneshot::Sender<()>)>,
}

impl AdmissionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试准入一个事件。`cap` 为 `None` 表示该事件不在允许列表中。
    pub fn admit(&mut self, event: &str, cap: Option<AdmissionCap>) -> Result<Ticket, AdmissionError> {
        let cap = cap.ok_or_else(|| AdmissionError::Forbidden {
            event: event.to_owned(),
        })?;

        let count = self.pending(event) + 1;
        if let AdmissionCap::Limit(limit) = cap {
            if count > limit.get() {
                return Err(AdmissionError::CapExceeded {
                    event: event.to_owned(),
                    cap: limit.get(),
                });
            }
        }
        self.pending.insert(event.to_owned(), count);

        if self.executing {
            let (tx, rx) = oneshot::channel();
            self.waiters.push_back((event.to_owned(), tx));
            Ok(Ticket::Parked(rx))
        } else {
            self.executing = true;
            Ok(Ticket::Ready)
        }
    }

    /// 当前请求结束：释放计数并唤醒下一个仍在等待的请求
    pub fn complete(&mut self, event: &str) {
        self.decrement(event);

        while let Some((next_event, waiter)) = self.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                return;
            }
            // 等待方已放弃
            self.decrement(&next_event);
        }
        self.executing = false;
    }

    /// 会话关闭时丢弃所有等待者
    pub fn clear(&mut self) {
        self.waiters.clear();
        self.pending.clear();
    }

    pub fn pending(&self, event: &str) -> u32 {
        self.pending.get(event).copied().unwrap_or(0)
    }

    pub fn is_executing(&self) -> bool {
        self.executing
    }

    pub fn queued(&self) -> usize {
        self.waiters.len()
    }

    fn decrement(&mut self, event: &str) {
        if let Some(count) = self.pending.get_mut(event) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pending.remove(event);
            }
        }
    }
}
