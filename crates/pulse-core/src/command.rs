use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::Payload;

/// Caller privilege, ordered: `User < Admin`.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    User,
    Admin,
}

impl PermissionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client-issued command. `request_id` is chosen by the client and echoed
/// back unmodified on the result for correlation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandRequest {
    pub request_id: String,
    pub command: String,
    #[serde(default)]
    pub parameters: Payload,
}

/// Outcome of an accepted command. Exactly one per accepted request,
/// delivered only to the originating session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandResult {
    pub request_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl CommandResult {
    pub fn ok(request_id: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            output: Some(output),
            error_kind: None,
        }
    }

    pub fn failed(request_id: impl Into<String>, error_kind: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            output: None,
            error_kind: Some(error_kind.into()),
        }
    }
}
