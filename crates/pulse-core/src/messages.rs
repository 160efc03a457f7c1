use serde::{Deserialize, Serialize};

use crate::alert::{AlertEvent, AlertLevel};
use crate::channel::{Channel, RateTier};
use crate::command::CommandResult;
use crate::record::{MetricRecord, Payload};

/// Messages a client sends over the persistent channel (or batched through
/// the poll fallback — both transports carry the same schema).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        channels: Vec<Channel>,
        #[serde(alias = "rateTier")]
        rate_tier: RateTier,
    },
    Heartbeat,
    Command {
        #[serde(alias = "requestId")]
        request_id: String,
        command: String,
        #[serde(default)]
        parameters: Payload,
    },
    Resume {
        #[serde(alias = "sessionToken")]
        session_token: String,
        since: i64,
    },
}

/// Messages the server pushes to a client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Metric {
        channel: Channel,
        payload: Payload,
        timestamp: i64,
    },
    Alert {
        level: AlertLevel,
        message: String,
        source_channel: Channel,
        timestamp: i64,
    },
    CommandResult {
        request_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
    },
    SessionToken {
        value: String,
    },
}

impl ServerMessage {
    /// High-frequency telemetry the backpressure policy may shed. Alerts,
    /// command results and session tokens are never dropped.
    pub fn is_telemetry(&self) -> bool {
        matches!(self, Self::Metric { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Metric { .. } => "metric",
            Self::Alert { .. } => "alert",
            Self::CommandResult { .. } => "command_result",
            Self::SessionToken { .. } => "session_token",
        }
    }
}

impl From<&MetricRecord> for ServerMessage {
    fn from(record: &MetricRecord) -> Self {
        Self::Metric {
            channel: record.channel,
            payload: record.payload.clone(),
            timestamp: record.timestamp_ms,
        }
    }
}

impl From<&AlertEvent> for ServerMessage {
    fn from(event: &AlertEvent) -> Self {
        Self::Alert {
            level: event.level,
            message: event.message.clone(),
            source_channel: event.source_channel,
            timestamp: event.timestamp_ms,
        }
    }
}

impl From<CommandResult> for ServerMessage {
    fn from(result: CommandResult) -> Self {
        Self::CommandResult {
            request_id: result.request_id,
            success: result.success,
            output: result.output,
            error_kind: result.error_kind,
        }
    }
}
