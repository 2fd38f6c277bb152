use domain::{SequenceNumber, TimestampMillis};

/// 三位滚动计数的上限
const COUNTER_WRAP: u16 = 999;

/// 消息序列号分配器
///
/// 序列号 = 毫秒时间戳 * 1000 + 三位滚动计数（先自增后取值，超过 999 归零）。
/// 时钟回拨或同一毫秒内超过 1000 条消息时退化为上一个序列号加一，
/// 保证进程内分配的序列号严格递增。
#[derive(Debug, Default)]
pub struct MessageSequencer {
    counter: u16,
    last: Option<SequenceNumber>,
}

impl MessageSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从已有历史的最后一个序列号继续分配
    pub fn resume_after(last: Option<SequenceNumber>) -> Self {
        Self { counter: 0, last }
    }

    pub fn next(&mut self, timestamp: TimestampMillis) -> SequenceNumber {
        self.counter = if self.counter >= COUNTER_WRAP {
            0
        } else {
            self.counter + 1
        };

        let candidate = (timestamp.max(0) as u64) * 1000 + u64::from(self.counter);
        let value = match self.last {
            Some(last) if candidate <= last.value() => last.value() + 1,
            _ => candidate,
        };

        let sequence = SequenceNumber::new(value);
        self.last = Some(sequence);
        sequence
    }

    pub fn last(&self) -> Option<SequenceNumber> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_concatenates_timestamp_and_padded_counter() {
        let mut sequencer = MessageSequencer::new();
        assert_eq!(sequencer.next(1_700_000_000_123).value(), 1_700_000_000_123_001);
        assert_eq!(sequencer.next(1_700_000_000_124).value(), 1_700_000_000_124_002);
    }

    #[test]
    fn counter_wraps_after_999() {
        let mut sequencer = MessageSequencer::new();
        let mut ts = 1_000;
        for _ in 0..999 {
            ts += 1;
            sequencer.next(ts);
        }
        // 第 1000 次分配计数归零
        ts += 1;
        assert_eq!(sequencer.next(ts).value(), (ts as u64) * 1000);
    }

    #[test]
    fn same_millisecond_burst_stays_strictly_increasing() {
        let mut sequencer = MessageSequencer::new();
        let mut previous = sequencer.next(5_000);
        for _ in 0..2_500 {
            let current = sequencer.next(5_000);
            assert!(current > previous);
            previous = current;
        }
    }

    #[test]
    fn clock_regression_does_not_reorder() {
        let mut sequencer = MessageSequencer::resume_after(Some(SequenceNumber::new(9_000_000)));
        let next = sequencer.next(1_000);
        assert_eq!(next.value(), 9_000_001);
        assert_eq!(sequencer.last(), Some(next));
    }
}
