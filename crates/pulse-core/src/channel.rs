use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A named category of metrics, independently subscribable.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    System,
    Agent,
    Hook,
    Mcp,
    Security,
    Performance,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::System,
        Channel::Agent,
        Channel::Hook,
        Channel::Mcp,
        Channel::Security,
        Channel::Performance,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Stable index for per-channel arrays.
    pub fn index(self) -> usize {
        match self {
            Self::System => 0,
            Self::Agent => 1,
            Self::Hook => 2,
            Self::Mcp => 3,
            Self::Security => 4,
            Self::Performance => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Agent => "agent",
            Self::Hook => "hook",
            Self::Mcp => "mcp",
            Self::Security => "security",
            Self::Performance => "performance",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "agent" => Ok(Self::Agent),
            "hook" => Ok(Self::Hook),
            "mcp" => Ok(Self::Mcp),
            "security" => Ok(Self::Security),
            "performance" => Ok(Self::Performance),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

/// Minimum spacing between deliveries to a session for a channel.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateTier {
    Realtime,
    Standard,
    Background,
    Slow,
}

impl RateTier {
    pub fn interval(self) -> Duration {
        Duration::from_millis(self.interval_ms())
    }

    pub fn interval_ms(self) -> u64 {
        match self {
            Self::Realtime => 100,
            Self::Standard => 5_000,
            Self::Background => 30_000,
            Self::Slow => 300_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Standard => "standard",
            Self::Background => "background",
            Self::Slow => "slow",
        }
    }
}

impl fmt::Display for RateTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
