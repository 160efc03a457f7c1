use std::collections::HashMap;

use pulse_core::record::Payload;
use pulse_core::{CommandRequest, HubError, PermissionLevel};

/// Declared shape of one command parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Bool,
}

impl ParamKind {
    fn matches(self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// What one whitelisted command demands of its caller.
#[derive(Clone, Debug)]
pub struct CommandSpec {
    pub required_level: PermissionLevel,
    pub params: Vec<ParamSpec>,
}

impl CommandSpec {
    pub fn user(params: Vec<ParamSpec>) -> Self {
        Self {
            required_level: PermissionLevel::User,
            params,
        }
    }

    pub fn admin(params: Vec<ParamSpec>) -> Self {
        Self {
            required_level: PermissionLevel::Admin,
            params,
        }
    }
}

/// The command whitelist: command name → spec. Built once, validated at
/// startup, and only ever replaced wholesale (never mutated while readers
/// hold it) — see `CommandGateway::reload_policy`.
#[derive(Clone, Debug, Default)]
pub struct PolicyTable {
    commands: HashMap<String, CommandSpec>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, spec: CommandSpec) -> Self {
        self.commands.insert(name.into(), spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Validation order is fixed: whitelist, then permission, then
    /// parameter shape. Rejections never execute side effects.
    pub fn authorize(
        &self,
        request: &CommandRequest,
        caller: PermissionLevel,
    ) -> Result<(), HubError> {
        let spec = self
            .get(&request.command)
            .ok_or_else(|| HubError::UnknownCommand(request.command.clone()))?;

        if caller < spec.required_level {
            return Err(HubError::InsufficientPermission {
                command: request.command.clone(),
                required: spec.required_level,
                actual: caller,
            });
        }

        validate_params(spec, &request.parameters)
    }
}

fn validate_params(spec: &CommandSpec, params: &Payload) -> Result<(), HubError> {
    for param in &spec.params {
        match params.get(&param.name) {
            Some(value) if !param.kind.matches(value) => {
                return Err(HubError::InvalidParameters(format!(
                    "parameter {} must be a {}",
                    param.name,
                    param.kind.as_str()
                )));
            }
            None if param.required => {
                return Err(HubError::InvalidParameters(format!(
                    "missing required parameter: {}",
                    param.name
                )));
            }
            _ => {}
        }
    }

    for key in params.keys() {
        if !spec.params.iter().any(|p| &p.name == key) {
            return Err(HubError::InvalidParameters(format!(
                "unknown parameter: {key}"
            )));
        }
    }

    Ok(())
}

/// The stock whitelist shipped with the binary.
pub fn default_policy() -> PolicyTable {
    PolicyTable::new()
        .with(
            "echo",
            CommandSpec::user(vec![ParamSpec::required("text", ParamKind::String)]),
        )
        .with("server_time", CommandSpec::user(vec![]))
        .with("git_status", CommandSpec::user(vec![]))
        .with("list_agents", CommandSpec::user(vec![]))
        .with(
            "restart_agent",
            CommandSpec::admin(vec![ParamSpec::required("name", ParamKind::String)]),
        )
        .with("clear_alerts", CommandSpec::admin(vec![]))
}
