use secrecy::{ExposeSecret, SecretString};

use crate::command::PermissionLevel;

/// A shared credential presented at handshake (redacted in Debug,
/// zeroized on drop). Verification is a plain comparison here; anything
/// stronger lives outside the core.
#[derive(Clone)]
pub struct Credential(pub SecretString);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    pub fn matches(&self, presented: &str) -> bool {
        self.0.expose_secret() == presented
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// Who a session is, once the handshake resolved its credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub level: PermissionLevel,
}

impl Identity {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: PermissionLevel::User,
        }
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: PermissionLevel::Admin,
        }
    }
}
