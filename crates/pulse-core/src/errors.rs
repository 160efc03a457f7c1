use std::time::Duration;

use crate::command::PermissionLevel;
use crate::ids::SessionId;

/// Typed error taxonomy for hub operations.
///
/// Command rejections travel back to the client as `error_kind` strings;
/// session/transport errors stay server-side and degrade to eviction.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum HubError {
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("insufficient permission for {command}: requires {required}, caller is {actual}")]
    InsufficientPermission {
        command: String,
        required: PermissionLevel,
        actual: PermissionLevel,
    },

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),
}

impl HubError {
    /// Short classification string for logs and wire `error_kind` fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownSession(_) => "unknown_session",
            Self::UnknownCommand(_) => "unknown_command",
            Self::InsufficientPermission { .. } => "insufficient_permission",
            Self::InvalidParameters(_) => "invalid_parameters",
            Self::Timeout(_) => "timeout",
            Self::TransportFailure(_) => "transport_failure",
            Self::CapacityExceeded(_) => "capacity_exceeded",
        }
    }

    /// True for validation failures the gateway reports back to the caller
    /// without executing anything.
    pub fn is_command_rejection(&self) -> bool {
        matches!(
            self,
            Self::UnknownCommand(_)
                | Self::InsufficientPermission { .. }
                | Self::InvalidParameters(_)
        )
    }

    /// True for errors the hub absorbs by evicting the session rather than
    /// propagating to producers.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::UnknownSession(_) | Self::TransportFailure(_))
    }
}
