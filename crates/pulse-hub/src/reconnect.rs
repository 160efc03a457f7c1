use std::collections::HashSet;
use std::time::Duration;

use pulse_core::{Channel, ClientMessage, RateTier};

/// Retry timing for the client-side connection state machine.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            cap: Duration::from_millis(30_000),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// `min(base * 2^attempt, cap)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        Duration::from_millis(exp.min(self.cap.as_millis() as f64) as u64)
    }
}

/// Connection phases. `Failed` is terminal: only an explicit manual retry
/// leaves it, and rejected connections (capacity, auth) land there
/// directly rather than looping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Client-side contract for reconnecting to the hub.
///
/// Tracks the backoff schedule, the resume token issued by the server, the
/// last subscription sent, and the high-water mark of observed record
/// timestamps. After a reconnect, `replay_messages()` yields what must be
/// re-sent: the hub forgot nothing only if the resume token is still within
/// grace — the client re-subscribes and asks for backfill either way.
pub struct ReconnectController {
    policy: BackoffPolicy,
    phase: ConnectionPhase,
    attempt: u32,
    ever_connected: bool,
    /// Token of the session before this transport — what `resume` presents.
    previous_token: Option<String>,
    /// Token issued on the current transport.
    current_token: Option<String>,
    subscription: Option<(HashSet<Channel>, RateTier)>,
    last_seen_ms: i64,
}

impl ReconnectController {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            phase: ConnectionPhase::Disconnected,
            attempt: 0,
            ever_connected: false,
            previous_token: None,
            current_token: None,
            subscription: None,
            last_seen_ms: 0,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Begin a connection attempt (initial connect or after backoff).
    pub fn connect(&mut self) {
        debug_assert!(matches!(
            self.phase,
            ConnectionPhase::Disconnected | ConnectionPhase::Reconnecting
        ));
        self.phase = ConnectionPhase::Connecting;
    }

    /// Handshake completed; the server issued a fresh token for this
    /// transport. The token of the prior session (if any) is kept aside for
    /// the resume request.
    pub fn connected(&mut self, session_token: impl Into<String>) {
        self.phase = ConnectionPhase::Connected;
        self.attempt = 0;
        self.ever_connected = true;
        self.previous_token = self.current_token.take();
        self.current_token = Some(session_token.into());
    }

    /// Transport dropped or a connect attempt failed. Returns the delay to
    /// wait before the next attempt, or `None` once the attempt budget is
    /// spent and the machine is `Failed`.
    pub fn connection_lost(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            self.phase = ConnectionPhase::Failed;
            return None;
        }
        let delay = self.policy.delay(self.attempt);
        self.attempt += 1;
        self.phase = ConnectionPhase::Reconnecting;
        Some(delay)
    }

    /// Hard rejection (session cap, bad credential): no automatic retry.
    pub fn connection_rejected(&mut self) {
        self.phase = ConnectionPhase::Failed;
    }

    /// Explicit user-driven retry out of `Failed`.
    pub fn manual_retry(&mut self) {
        if self.phase == ConnectionPhase::Failed {
            self.phase = ConnectionPhase::Disconnected;
            self.attempt = 0;
        }
    }

    /// Record the subscription sent to the server, so it can be replayed.
    pub fn subscribed(&mut self, channels: HashSet<Channel>, tier: RateTier) {
        self.subscription = Some((channels, tier));
    }

    /// Track the newest record timestamp observed (the `since` for
    /// backfill).
    pub fn observe_record(&mut self, timestamp_ms: i64) {
        self.last_seen_ms = self.last_seen_ms.max(timestamp_ms);
    }

    /// Messages to send immediately after a reconnect handshake: the prior
    /// subscription (the hub treats the new transport as a new session),
    /// then a resume request carrying the previous token and the backfill
    /// watermark. Empty on a first-ever connect.
    pub fn replay_messages(&self) -> Vec<ClientMessage> {
        if !self.ever_connected {
            return Vec::new();
        }
        let mut messages = Vec::new();
        if let Some((channels, tier)) = &self.subscription {
            let mut channels: Vec<Channel> = channels.iter().copied().collect();
            channels.sort_by_key(|c| c.index());
            messages.push(ClientMessage::Subscribe {
                channels,
                rate_tier: *tier,
            });
        }
        if let Some(token) = &self.previous_token {
            messages.push(ClientMessage::Resume {
                session_token: token.clone(),
                since: self.last_seen_ms,
            });
        }
        messages
    }
}

impl Default for ReconnectController {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}
