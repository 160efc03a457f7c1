use std::collections::VecDeque;

use pulse_core::MetricRecord;

/// Fixed-capacity, append-only ring of recent records for one channel.
/// Overwrites the oldest entry on overflow; callers must tolerate gaps
/// beyond the last `capacity` records.
pub struct HistoryRing {
    capacity: usize,
    buf: VecDeque<MetricRecord>,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buf: VecDeque::with_capacity(capacity),
        }
    }

    pub fn append(&mut self, record: MetricRecord) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(record);
    }

    /// Records strictly newer than `since_ms`, oldest first.
    pub fn since(&self, since_ms: i64) -> Vec<MetricRecord> {
        self.buf
            .iter()
            .filter(|r| r.timestamp_ms > since_ms)
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<&MetricRecord> {
        self.buf.back()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
