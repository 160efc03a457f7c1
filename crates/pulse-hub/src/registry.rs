use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use pulse_core::{Channel, HubConfig, HubError, Identity, RateTier, SessionId};
use pulse_telemetry::Recorder;

use crate::session::Session;

/// Tracks every logical connected client. Owned by the hub; transports and
/// producers reach it only through hub operations.
///
/// Sessions are keyed by id for delivery and by resume token for
/// reattachment. All operations on an evicted id return `UnknownSession` —
/// callers treat that as a no-op disconnect, never a fault.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    tokens: DashMap<String, SessionId>,
    max_sessions: usize,
    queue_bound: usize,
    idle_timeout_ms: i64,
    resume_grace_ms: i64,
    stats: Arc<Recorder>,
}

impl SessionRegistry {
    pub fn new(config: &HubConfig, stats: Arc<Recorder>) -> Self {
        Self {
            sessions: DashMap::new(),
            tokens: DashMap::new(),
            max_sessions: config.max_sessions,
            queue_bound: config.max_queue_frames,
            idle_timeout_ms: config.session_idle_timeout_ms as i64,
            resume_grace_ms: config.resume_grace_ms as i64,
            stats,
        }
    }

    /// Create a session for a freshly authenticated transport. Rejects at
    /// the hard cap — the one capacity violation that refuses instead of
    /// degrading.
    pub fn register(&self, identity: Identity, now_ms: i64) -> Result<Arc<Session>, HubError> {
        if self.sessions.len() >= self.max_sessions {
            return Err(HubError::CapacityExceeded(format!(
                "session limit reached ({})",
                self.max_sessions
            )));
        }
        let session = Arc::new(Session::new(identity, self.queue_bound, now_ms));
        self.tokens
            .insert(session.resume_token.clone(), session.id.clone());
        self.sessions.insert(session.id.clone(), Arc::clone(&session));
        self.update_gauge();
        tracing::info!(session_id = %session.id, "session registered");
        Ok(session)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn find_by_token(&self, token: &str) -> Option<Arc<Session>> {
        let id = self.tokens.get(token).map(|e| e.value().clone())?;
        self.get(&id)
    }

    pub fn subscribe(
        &self,
        id: &SessionId,
        channels: HashSet<Channel>,
        tier: RateTier,
        now_ms: i64,
    ) -> Result<(), HubError> {
        let session = self
            .get(id)
            .ok_or_else(|| HubError::UnknownSession(id.clone()))?;
        session.subscribe(channels, tier, now_ms);
        Ok(())
    }

    /// Heartbeat: refresh the session's last-seen marker.
    pub fn touch(&self, id: &SessionId, now_ms: i64) -> Result<(), HubError> {
        let session = self
            .get(id)
            .ok_or_else(|| HubError::UnknownSession(id.clone()))?;
        session.touch(now_ms);
        Ok(())
    }

    /// Transport closed. The session stays resumable for the grace window;
    /// a missing id is a no-op (eviction already happened).
    pub fn detach(&self, id: &SessionId, now_ms: i64) {
        if let Some(session) = self.get(id) {
            session.detach(now_ms);
            tracing::debug!(session_id = %id, "session detached");
        }
    }

    /// Destroy a session outright: queue closed, token dead, pending
    /// results discarded.
    pub fn evict(&self, id: &SessionId) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };
        self.tokens.remove(session.resume_token.as_str());
        session.queue.close();
        self.update_gauge();
        tracing::info!(session_id = %id, "session evicted");
        true
    }

    /// Reattach state identified by `token` onto `into` (the session backing
    /// a fresh transport): subscription, identity, and any buffered command
    /// results carry over; the old session and its token die.
    pub fn adopt(&self, token: &str, into: &Arc<Session>, now_ms: i64) -> Result<(), HubError> {
        let old_id = self
            .tokens
            .get(token)
            .map(|e| e.value().clone())
            .ok_or_else(|| HubError::UnknownSession(SessionId::from_raw(token)))?;

        if old_id == into.id {
            return Ok(());
        }

        let (_, old) = self
            .sessions
            .remove(&old_id)
            .ok_or_else(|| HubError::UnknownSession(old_id.clone()))?;
        self.tokens.remove(old.resume_token.as_str());

        // Sweep queued command results into the pending buffer, then close
        // the stale transport's queue (ends any zombie writer).
        old.detach(now_ms);
        old.queue.close();

        if let Some(sub) = old.subscription() {
            into.subscribe(sub.channels, sub.tier, now_ms);
        }
        into.set_identity(old.identity());
        for result in old.take_pending_results() {
            into.buffer_result(result);
        }

        self.update_gauge();
        tracing::info!(old_session = %old_id, new_session = %into.id, "session resumed");
        Ok(())
    }

    /// Attached sessions subscribed to `channel` whose tier interval has
    /// elapsed.
    pub fn for_each_due(&self, channel: Channel, now_ms: i64) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|e| e.value().is_attached() && e.value().is_due(channel, now_ms))
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    pub fn attached_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|e| e.value().is_attached())
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    /// Periodic eviction pass. Attached sessions die after 2x their tier
    /// interval without a heartbeat (the idle-timeout default before any
    /// subscription); detached sessions die when the resume grace expires.
    pub fn sweep(&self, now_ms: i64) -> usize {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter_map(|e| {
                let session = e.value();
                let dead = if session.is_attached() {
                    let timeout = session
                        .subscription()
                        .map(|s| 2 * s.tier.interval_ms() as i64)
                        .unwrap_or(self.idle_timeout_ms);
                    now_ms.saturating_sub(session.last_seen_ms()) > timeout
                } else {
                    now_ms.saturating_sub(session.detached_at_ms()) > self.resume_grace_ms
                };
                dead.then(|| session.id.clone())
            })
            .collect();

        let mut removed = 0;
        for id in expired {
            if self.evict(&id) {
                removed += 1;
            }
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn close_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().queue.close();
        }
        self.sessions.clear();
        self.tokens.clear();
        self.update_gauge();
    }

    fn update_gauge(&self) {
        self.stats
            .gauge_set("sessions.active", self.sessions.len() as f64);
    }
}
