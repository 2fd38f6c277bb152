use std::sync::atomic::{AtomicI64, Ordering};

use domain::TimestampMillis;

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> TimestampMillis;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> TimestampMillis {
        (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as TimestampMillis
    }
}

/// 手动推进的时钟，测试与回放场景使用
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: TimestampMillis) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: TimestampMillis) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> TimestampMillis {
        self.now.load(Ordering::SeqCst)
    }
}
