//! Typed dispatch for inbound client messages. One match over the message
//! enum — both transports (WebSocket and poll) funnel through here.

use std::sync::Arc;

use pulse_core::{ClientMessage, CommandRequest, CommandResult, ServerMessage};
use pulse_hub::{BroadcastHub, CommandGateway, Session};

/// Parse and dispatch one raw text frame. Malformed frames are logged and
/// ignored; a client speaking garbage costs itself, not the hub.
pub fn handle_text(
    hub: &Arc<BroadcastHub>,
    gateway: &Arc<CommandGateway>,
    session: &Arc<Session>,
    raw: &str,
) {
    match serde_json::from_str::<ClientMessage>(raw) {
        Ok(message) => dispatch(hub, gateway, session, message),
        Err(err) => {
            tracing::warn!(session_id = %session.id, error = %err, "unparseable client message");
        }
    }
}

/// Apply one client message to hub state. Any inbound message counts as
/// liveness, not just explicit heartbeats.
pub fn dispatch(
    hub: &Arc<BroadcastHub>,
    gateway: &Arc<CommandGateway>,
    session: &Arc<Session>,
    message: ClientMessage,
) {
    let _ = hub.heartbeat(&session.id);

    match message {
        ClientMessage::Subscribe {
            channels,
            rate_tier,
        } => {
            if let Err(err) =
                hub.subscribe_session(&session.id, channels.into_iter().collect(), rate_tier)
            {
                tracing::warn!(session_id = %session.id, error = %err, "subscribe failed");
            }
        }

        ClientMessage::Heartbeat => {}

        ClientMessage::Command {
            request_id,
            command,
            parameters,
        } => {
            let request = CommandRequest {
                request_id: request_id.clone(),
                command,
                parameters,
            };
            if let Err(err) = gateway.submit(&session.id, request) {
                if err.is_command_rejection() {
                    // Rejections are answered immediately, on the same
                    // correlation id, without executing anything.
                    let result = CommandResult::failed(request_id, err.kind());
                    let _ = hub.publish_targeted(&session.id, ServerMessage::from(result));
                } else {
                    tracing::warn!(session_id = %session.id, error = %err, "command submit failed");
                }
            }
        }

        ClientMessage::Resume {
            session_token,
            since,
        } => {
            if let Err(err) = hub.resume(session, &session_token, since) {
                // Expired or bogus token: the client simply continues on
                // its fresh session.
                tracing::debug!(session_id = %session.id, error = %err, "resume declined");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use pulse_core::record::Payload;
    use pulse_core::{Channel, HubConfig, Identity, MetricRecord, RateTier};
    use pulse_hub::{default_policy, CommandExecutor, ExecutionError};

    struct EchoExecutor;

    #[async_trait]
    impl CommandExecutor for EchoExecutor {
        async fn execute(
            &self,
            command: &str,
            _parameters: &Payload,
        ) -> Result<serde_json::Value, ExecutionError> {
            Ok(serde_json::json!({ "ran": command }))
        }
    }

    fn fixture() -> (Arc<BroadcastHub>, Arc<CommandGateway>) {
        let hub = Arc::new(BroadcastHub::new(HubConfig::default()).unwrap());
        let gateway = Arc::new(CommandGateway::new(
            default_policy(),
            Arc::new(EchoExecutor),
            Arc::clone(hub.registry()),
            Duration::from_secs(5),
            Arc::clone(hub.stats()),
        ));
        (hub, gateway)
    }

    #[tokio::test]
    async fn subscribe_message_installs_subscription() {
        let (hub, gateway) = fixture();
        let session = hub.register_session(Identity::user("u")).unwrap();

        handle_text(
            &hub,
            &gateway,
            &session,
            r#"{"type":"subscribe","channels":["system"],"rate_tier":"realtime"}"#,
        );

        let sub = session.subscription().expect("subscription installed");
        assert_eq!(sub.tier, RateTier::Realtime);
        assert!(sub.channels.contains(&Channel::System));
    }

    #[tokio::test]
    async fn malformed_frame_is_ignored() {
        let (hub, gateway) = fixture();
        let session = hub.register_session(Identity::user("u")).unwrap();
        handle_text(&hub, &gateway, &session, "{not json");
        handle_text(&hub, &gateway, &session, r#"{"type":"warp_drive"}"#);
        assert!(session.queue.is_empty());
        assert!(hub.registry().get(&session.id).is_some());
    }

    #[tokio::test]
    async fn rejected_command_answers_on_same_request_id() {
        let (hub, gateway) = fixture();
        let session = hub.register_session(Identity::user("u")).unwrap();

        dispatch(
            &hub,
            &gateway,
            &session,
            ClientMessage::Command {
                request_id: "r42".into(),
                command: "restart_agent".into(),
                parameters: serde_json::json!({"name": "builder"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            },
        );

        let frames = session.queue.drain();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            ServerMessage::CommandResult {
                request_id,
                success,
                error_kind,
                ..
            } => {
                assert_eq!(request_id, "r42");
                assert!(!success);
                assert_eq!(error_kind.as_deref(), Some("insufficient_permission"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn accepted_command_result_arrives() {
        let (hub, gateway) = fixture();
        let session = hub.register_session(Identity::user("u")).unwrap();

        dispatch(
            &hub,
            &gateway,
            &session,
            ClientMessage::Command {
                request_id: "r1".into(),
                command: "server_time".into(),
                parameters: Payload::new(),
            },
        );

        let frame = tokio::time::timeout(Duration::from_secs(2), session.queue.pop())
            .await
            .unwrap()
            .unwrap();
        match frame {
            ServerMessage::CommandResult { success, .. } => assert!(success),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn resume_via_message_reattaches_state() {
        let (hub, gateway) = fixture();
        let original = hub.register_session(Identity::user("u")).unwrap();
        hub.subscribe_session(&original.id, [Channel::System].into(), RateTier::Standard)
            .unwrap();
        let token = original.resume_token.clone();
        let t0 = hub.now_ms();
        hub.detach_session(&original.id);
        hub.publish(MetricRecord::at(Channel::System, Payload::new(), t0 + 5));

        let fresh = hub.register_session(Identity::user("u")).unwrap();
        dispatch(
            &hub,
            &gateway,
            &fresh,
            ClientMessage::Resume {
                session_token: token,
                since: t0,
            },
        );

        assert!(fresh.subscription().is_some());
        let frames = fresh.queue.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind(), "metric");
        // The old session is gone.
        assert!(hub.registry().get(&original.id).is_none());
    }

    #[tokio::test]
    async fn heartbeat_refreshes_liveness() {
        let (hub, gateway) = fixture();
        let session = hub.register_session(Identity::user("u")).unwrap();
        let before = session.last_seen_ms();
        tokio::time::sleep(Duration::from_millis(5)).await;
        dispatch(&hub, &gateway, &session, ClientMessage::Heartbeat);
        assert!(session.last_seen_ms() >= before);
    }
}
