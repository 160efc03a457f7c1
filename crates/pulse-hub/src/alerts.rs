use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use pulse_core::{AlertEvent, AlertLevel, Channel, MetricRecord};
use pulse_telemetry::Recorder;

const RECENT_ALERTS: usize = 100;

/// How a measured field relates to a rule's threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
}

impl Comparator {
    pub fn matches(self, measured: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => measured > threshold,
            Self::Ge => measured >= threshold,
            Self::Lt => measured < threshold,
            Self::Le => measured <= threshold,
            Self::Eq => measured == threshold,
        }
    }
}

/// Declarative threshold rule evaluated against every published record.
#[derive(Clone, Debug)]
pub struct ThresholdRule {
    pub channel: Channel,
    pub field: String,
    pub comparator: Comparator,
    pub value: f64,
    pub level: AlertLevel,
    /// Message template; the measured value is appended, not part of the
    /// dedupe identity.
    pub message: String,
}

impl ThresholdRule {
    pub fn new(
        channel: Channel,
        field: impl Into<String>,
        comparator: Comparator,
        value: f64,
        level: AlertLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            field: field.into(),
            comparator,
            value,
            level,
            message: message.into(),
        }
    }

    fn check(&self, record: &MetricRecord) -> Option<f64> {
        if record.channel != self.channel {
            return None;
        }
        let measured = record.number(&self.field)?;
        self.comparator.matches(measured, self.value).then_some(measured)
    }
}

struct DedupeEntry {
    last_emitted_ms: i64,
    last_seen_ms: i64,
}

/// Evaluates records against threshold rules and suppresses repeats.
///
/// An event whose dedupe key fired within the suppression window is
/// swallowed, but its last-seen marker still advances; once the window
/// elapses a renewed breach alerts again.
pub struct AlertPipeline {
    rules: Vec<ThresholdRule>,
    window_ms: i64,
    state: Mutex<HashMap<String, DedupeEntry>>,
    recent: Mutex<VecDeque<AlertEvent>>,
    stats: Arc<Recorder>,
}

impl AlertPipeline {
    pub fn new(rules: Vec<ThresholdRule>, window_ms: u64, stats: Arc<Recorder>) -> Self {
        Self {
            rules,
            window_ms: window_ms as i64,
            state: Mutex::new(HashMap::new()),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_ALERTS)),
            stats,
        }
    }

    /// Evaluate one record; returns the alerts that survived dedupe.
    pub fn evaluate(&self, record: &MetricRecord, now_ms: i64) -> Vec<AlertEvent> {
        let mut emitted = Vec::new();

        for rule in &self.rules {
            let Some(measured) = rule.check(record) else {
                continue;
            };
            let message = format!("{}: {}={:.1}", rule.message, rule.field, measured);
            let event = AlertEvent::new(
                rule.level,
                rule.channel,
                &rule.message,
                message,
                record.timestamp_ms,
            );

            let mut state = self.state.lock();
            match state.get_mut(&event.dedupe_key) {
                Some(entry) if now_ms - entry.last_emitted_ms < self.window_ms => {
                    entry.last_seen_ms = now_ms;
                    self.stats.counter_inc("alerts.suppressed", 1);
                }
                Some(entry) => {
                    entry.last_emitted_ms = now_ms;
                    entry.last_seen_ms = now_ms;
                    emitted.push(event);
                }
                None => {
                    state.insert(
                        event.dedupe_key.clone(),
                        DedupeEntry {
                            last_emitted_ms: now_ms,
                            last_seen_ms: now_ms,
                        },
                    );
                    emitted.push(event);
                }
            }
        }

        if !emitted.is_empty() {
            self.stats.counter_inc("alerts.emitted", emitted.len() as u64);
            let mut recent = self.recent.lock();
            for event in &emitted {
                if recent.len() == RECENT_ALERTS {
                    recent.pop_front();
                }
                recent.push_back(event.clone());
            }
        }

        emitted
    }

    /// Most recent emitted alerts, oldest first (snapshot API).
    pub fn recent(&self) -> Vec<AlertEvent> {
        self.recent.lock().iter().cloned().collect()
    }

}

/// Default thresholds, mirroring the stock system monitors: CPU, memory and
/// disk pressure on the system channel, warning and critical bands each.
pub fn default_rules() -> Vec<ThresholdRule> {
    vec![
        ThresholdRule::new(
            Channel::System,
            "cpu_percent",
            Comparator::Gt,
            80.0,
            AlertLevel::Warning,
            "high cpu usage",
        ),
        ThresholdRule::new(
            Channel::System,
            "cpu_percent",
            Comparator::Gt,
            90.0,
            AlertLevel::Critical,
            "critical cpu usage",
        ),
        ThresholdRule::new(
            Channel::System,
            "memory_percent",
            Comparator::Gt,
            85.0,
            AlertLevel::Warning,
            "high memory usage",
        ),
        ThresholdRule::new(
            Channel::System,
            "memory_percent",
            Comparator::Gt,
            95.0,
            AlertLevel::Critical,
            "critical memory usage",
        ),
        ThresholdRule::new(
            Channel::System,
            "disk_percent",
            Comparator::Gt,
            90.0,
            AlertLevel::Warning,
            "low disk space",
        ),
        ThresholdRule::new(
            Channel::System,
            "disk_percent",
            Comparator::Gt,
            95.0,
            AlertLevel::Critical,
            "critically low disk space",
        ),
    ]
}
