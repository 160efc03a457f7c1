use std::fmt;

use serde::{Deserialize, Serialize};

use crate::channel::Channel;

/// Alert severity, ordered from least to most severe.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A derived alert emitted by the threshold pipeline.
///
/// `dedupe_key` identifies the *condition* (level + channel + message
/// template), not the individual occurrence: the measured value is not part
/// of it, so repeated breaches of the same rule collapse within the
/// suppression window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertEvent {
    pub level: AlertLevel,
    pub message: String,
    pub source_channel: Channel,
    pub timestamp_ms: i64,
    pub dedupe_key: String,
}

impl AlertEvent {
    pub fn new(
        level: AlertLevel,
        source_channel: Channel,
        template: &str,
        message: String,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            level,
            message,
            source_channel,
            timestamp_ms,
            dedupe_key: format!("{}:{}:{}", level, source_channel, template),
        }
    }
}
