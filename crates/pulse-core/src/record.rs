use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::channel::Channel;

/// Channel-specific field map. Values are whatever the producer sampled:
/// numbers, strings, booleans.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// One normalized sample pushed by a producer. Immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricRecord {
    pub channel: Channel,
    pub payload: Payload,
    pub timestamp_ms: i64,
}

impl MetricRecord {
    pub fn new(channel: Channel, payload: Payload, clock: &WallClock) -> Self {
        Self {
            channel,
            payload,
            timestamp_ms: clock.now_ms(),
        }
    }

    /// Construct with an explicit timestamp (backfill, tests).
    pub fn at(channel: Channel, payload: Payload, timestamp_ms: i64) -> Self {
        Self {
            channel,
            payload,
            timestamp_ms,
        }
    }

    /// Read a numeric payload field, if present and numeric.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.payload.get(field).and_then(|v| v.as_f64())
    }
}

/// Wall-clock source that never runs backwards.
///
/// Record timestamps drive delivery cursors and history backfill, so a
/// system clock step backwards must not reorder them.
#[derive(Debug, Default)]
pub struct WallClock {
    last_ms: AtomicI64,
}

impl WallClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        let prev = self.last_ms.fetch_max(wall, Ordering::AcqRel);
        wall.max(prev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(pairs: &[(&str, serde_json::Value)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn record_serde_roundtrip() {
        let rec = MetricRecord::at(
            Channel::System,
            payload(&[
                ("cpu_percent", serde_json::json!(42.5)),
                ("hostname", serde_json::json!("ops-1")),
            ]),
            1_700_000_000_000,
        );
        let json = serde_json::to_string(&rec).unwrap();
        let parsed: MetricRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.channel, Channel::System);
        assert_eq!(parsed.timestamp_ms, 1_700_000_000_000);
        assert_eq!(parsed.number("cpu_percent"), Some(42.5));
    }

    #[test]
    fn number_ignores_non_numeric_fields() {
        let rec = MetricRecord::at(
            Channel::Agent,
            payload(&[("name", serde_json::json!("builder"))]),
            1,
        );
        assert_eq!(rec.number("name"), None);
        assert_eq!(rec.number("missing"), None);
    }

    #[test]
    fn clock_is_monotonic_non_decreasing() {
        let clock = WallClock::new();
        let mut last = 0;
        for _ in 0..1_000 {
            let now = clock.now_ms();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn clock_survives_backwards_step() {
        let clock = WallClock::new();
        // Pretend a previous reading was far in the future.
        clock.last_ms.store(i64::MAX - 1, Ordering::SeqCst);
        assert_eq!(clock.now_ms(), i64::MAX - 1);
    }

    #[test]
    fn records_from_clock_are_ordered() {
        let clock = WallClock::new();
        let a = MetricRecord::new(Channel::System, Payload::new(), &clock);
        let b = MetricRecord::new(Channel::System, Payload::new(), &clock);
        assert!(b.timestamp_ms >= a.timestamp_ms);
    }
}
