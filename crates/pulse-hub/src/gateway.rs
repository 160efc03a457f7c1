use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use pulse_core::record::Payload;
use pulse_core::{CommandRequest, CommandResult, HubError, ServerMessage, SessionId};
use pulse_telemetry::Recorder;

use crate::registry::SessionRegistry;

/// Failure from a command's execution (as opposed to its validation).
/// `kind` travels to the client as `error_kind`; `detail` only reaches the
/// logs.
#[derive(Clone, Debug)]
pub struct ExecutionError {
    pub kind: String,
    pub detail: String,
}

impl ExecutionError {
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.into(),
        }
    }

    pub fn unsupported(command: &str) -> Self {
        Self::new(
            "unsupported",
            format!("no executor handles command: {command}"),
        )
    }
}

/// The pluggable side-effect boundary. Whatever a command actually does —
/// poking an agent, shelling out, touching files — lives behind this trait;
/// the gateway only validates, schedules, times out and correlates.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        command: &str,
        parameters: &Payload,
    ) -> Result<serde_json::Value, ExecutionError>;
}

/// Minimal executor wired into the stock binary: commands with no external
/// side effects. Everything else in the whitelist is expected to be handled
/// by a deployment-provided executor.
pub struct BuiltinExecutor;

#[async_trait]
impl CommandExecutor for BuiltinExecutor {
    async fn execute(
        &self,
        command: &str,
        parameters: &Payload,
    ) -> Result<serde_json::Value, ExecutionError> {
        match command {
            "echo" => Ok(serde_json::json!({
                "text": parameters.get("text").cloned().unwrap_or_default(),
            })),
            "server_time" => Ok(serde_json::json!({
                "now": chrono::Utc::now().to_rfc3339(),
            })),
            other => Err(ExecutionError::unsupported(other)),
        }
    }
}

/// Validates client-issued commands against the policy table and runs the
/// accepted ones off the broadcast path.
///
/// Guarantees: rejections return immediately with no side effects; every
/// accepted request produces exactly one `CommandResult`, delivered to the
/// originating session (or buffered under it while detached); executions
/// past the deadline complete as `error_kind = "timeout"` and the underlying
/// operation is abandoned, not killed.
pub struct CommandGateway {
    policy: RwLock<Arc<crate::policy::PolicyTable>>,
    executor: Arc<dyn CommandExecutor>,
    registry: Arc<SessionRegistry>,
    timeout: Duration,
    stats: Arc<Recorder>,
}

impl CommandGateway {
    pub fn new(
        policy: crate::policy::PolicyTable,
        executor: Arc<dyn CommandExecutor>,
        registry: Arc<SessionRegistry>,
        timeout: Duration,
        stats: Arc<Recorder>,
    ) -> Self {
        Self {
            policy: RwLock::new(Arc::new(policy)),
            executor,
            registry,
            timeout,
            stats,
        }
    }

    /// Current policy table (cheap Arc clone; never blocks a reload).
    pub fn policy(&self) -> Arc<crate::policy::PolicyTable> {
        Arc::clone(&self.policy.read())
    }

    /// Swap in a new policy table atomically. In-flight validations keep
    /// the table they already cloned.
    pub fn reload_policy(&self, table: crate::policy::PolicyTable) {
        *self.policy.write() = Arc::new(table);
        tracing::info!("command policy reloaded");
    }

    /// Validate and schedule a command. `Err` means rejected — nothing ran.
    pub fn submit(&self, origin: &SessionId, request: CommandRequest) -> Result<(), HubError> {
        let session = self
            .registry
            .get(origin)
            .ok_or_else(|| HubError::UnknownSession(origin.clone()))?;

        if let Err(err) = self.policy().authorize(&request, session.permission_level()) {
            self.stats.counter_inc("commands.rejected", 1);
            tracing::debug!(
                session_id = %origin,
                command = %request.command,
                reason = err.kind(),
                "command rejected"
            );
            return Err(err);
        }

        self.stats.counter_inc("commands.accepted", 1);

        let executor = Arc::clone(&self.executor);
        let registry = Arc::clone(&self.registry);
        let stats = Arc::clone(&self.stats);
        let origin = origin.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let started = Instant::now();
            let outcome =
                tokio::time::timeout(timeout, executor.execute(&request.command, &request.parameters))
                    .await;

            let result = match outcome {
                Ok(Ok(output)) => CommandResult::ok(request.request_id, output),
                Ok(Err(exec_err)) => {
                    tracing::warn!(
                        command = %request.command,
                        kind = %exec_err.kind,
                        detail = %exec_err.detail,
                        "command execution failed"
                    );
                    CommandResult::failed(request.request_id, exec_err.kind)
                }
                Err(_) => {
                    stats.counter_inc("commands.timed_out", 1);
                    tracing::warn!(
                        command = %request.command,
                        timeout_ms = timeout.as_millis() as u64,
                        "command timed out, abandoning execution"
                    );
                    CommandResult::failed(request.request_id, "timeout")
                }
            };

            stats.histogram_observe(
                "command.duration_ms",
                started.elapsed().as_secs_f64() * 1_000.0,
            );
            deliver(&registry, &origin, result);
        });

        Ok(())
    }
}

/// Route a finished result back to its origin: straight onto the queue if
/// the session is attached, into the resume buffer if not, to the floor if
/// the session is gone for good.
fn deliver(registry: &SessionRegistry, origin: &SessionId, result: CommandResult) {
    match registry.get(origin) {
        Some(session) if session.is_attached() => {
            session.queue.push(ServerMessage::from(result));
        }
        Some(session) => session.buffer_result(result),
        None => {
            tracing::debug!(session_id = %origin, "command result dropped, session gone");
        }
    }
}
