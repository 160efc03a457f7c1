use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::Notify;

use pulse_core::{
    Channel, CommandResult, Identity, PermissionLevel, RateTier, ServerMessage, SessionId,
};

/// Random, non-guessable token a client presents to reattach prior session
/// state after a reconnect. Deliberately not time-ordered.
pub fn generate_resume_token() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    let mut token = String::with_capacity(4 + 32);
    token.push_str("tok_");
    for b in bytes {
        token.push_str(&format!("{b:02x}"));
    }
    token
}

/// Result of pushing a frame onto an outbound queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Frame queued.
    Queued,
    /// Frame queued after shedding the oldest metric frame.
    QueuedDroppedOldest,
    /// Frame itself shed (queue full of undroppable frames).
    Shed,
    /// Queue closed; session is gone.
    Closed,
}

struct QueueInner {
    frames: VecDeque<ServerMessage>,
    closed: bool,
    dropped: u64,
}

/// Bounded per-session frame queue.
///
/// Metric frames beyond the bound are shed oldest-first; alert,
/// command-result and session-token frames are never shed, so the queue
/// may transiently exceed the bound rather than lose one of them.
pub struct OutboundQueue {
    bound: usize,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl OutboundQueue {
    pub fn new(bound: usize) -> Self {
        Self {
            bound,
            inner: Mutex::new(QueueInner {
                frames: VecDeque::new(),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, frame: ServerMessage) -> PushOutcome {
        let outcome = {
            let mut q = self.inner.lock();
            if q.closed {
                return PushOutcome::Closed;
            }
            if frame.is_telemetry() && q.frames.len() >= self.bound {
                match q.frames.iter().position(ServerMessage::is_telemetry) {
                    Some(oldest) => {
                        q.frames.remove(oldest);
                        q.dropped += 1;
                        q.frames.push_back(frame);
                        PushOutcome::QueuedDroppedOldest
                    }
                    None => {
                        // Every queued frame is undroppable; shed the new
                        // telemetry frame instead.
                        q.dropped += 1;
                        return PushOutcome::Shed;
                    }
                }
            } else {
                q.frames.push_back(frame);
                PushOutcome::Queued
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Wait for the next frame. Returns `None` once the queue is closed and
    /// drained. Single-consumer.
    pub async fn pop(&self) -> Option<ServerMessage> {
        loop {
            let notified = self.notify.notified();
            {
                let mut q = self.inner.lock();
                if let Some(frame) = q.frames.pop_front() {
                    return Some(frame);
                }
                if q.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Take everything currently queued (poll-transport drain).
    pub fn drain(&self) -> Vec<ServerMessage> {
        self.inner.lock().frames.drain(..).collect()
    }

    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames shed since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }
}

/// What a session asked to receive.
#[derive(Clone, Debug)]
pub struct Subscription {
    pub channels: HashSet<Channel>,
    pub tier: RateTier,
}

struct ChannelCursor {
    /// Wall time of the last delivery on this channel (tier pacing).
    last_delivery_ms: AtomicI64,
    /// Timestamp of the last record actually sent (redelivery guard).
    last_record_ms: AtomicI64,
}

impl Default for ChannelCursor {
    fn default() -> Self {
        Self {
            last_delivery_ms: AtomicI64::new(0),
            last_record_ms: AtomicI64::new(0),
        }
    }
}

/// Server-side state for one logical connected client. Outlives any single
/// transport handle: a disconnect detaches the session, and a resume token
/// reattaches it within the grace window.
pub struct Session {
    pub id: SessionId,
    pub resume_token: String,
    pub queue: OutboundQueue,
    pub created_at_ms: i64,
    identity: RwLock<Identity>,
    subscription: RwLock<Option<Subscription>>,
    last_seen_ms: AtomicI64,
    attached: AtomicBool,
    detached_at_ms: AtomicI64,
    cursors: [ChannelCursor; Channel::COUNT],
    pending_results: Mutex<Vec<CommandResult>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at_ms", &self.created_at_ms)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(identity: Identity, queue_bound: usize, now_ms: i64) -> Self {
        Self {
            id: SessionId::new(),
            resume_token: generate_resume_token(),
            queue: OutboundQueue::new(queue_bound),
            created_at_ms: now_ms,
            identity: RwLock::new(identity),
            subscription: RwLock::new(None),
            last_seen_ms: AtomicI64::new(now_ms),
            attached: AtomicBool::new(true),
            detached_at_ms: AtomicI64::new(0),
            cursors: std::array::from_fn(|_| ChannelCursor::default()),
            pending_results: Mutex::new(Vec::new()),
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity.read().clone()
    }

    pub fn permission_level(&self) -> PermissionLevel {
        self.identity.read().level
    }

    pub fn set_identity(&self, identity: Identity) {
        *self.identity.write() = identity;
    }

    /// Record client liveness (heartbeat or any inbound message).
    pub fn touch(&self, now_ms: i64) {
        self.last_seen_ms.fetch_max(now_ms, Ordering::AcqRel);
    }

    pub fn last_seen_ms(&self) -> i64 {
        self.last_seen_ms.load(Ordering::Acquire)
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Transport gone. Keeps the session resumable; any queued command
    /// results move to the pending buffer so a resume can redeliver them.
    pub fn detach(&self, now_ms: i64) {
        self.attached.store(false, Ordering::Release);
        self.detached_at_ms.store(now_ms, Ordering::Release);
        let frames = self.queue.drain();
        let mut pending = self.pending_results.lock();
        for frame in frames {
            if let ServerMessage::CommandResult {
                request_id,
                success,
                output,
                error_kind,
            } = frame
            {
                pending.push(CommandResult {
                    request_id,
                    success,
                    output,
                    error_kind,
                });
            }
        }
    }

    pub fn reattach(&self, now_ms: i64) {
        self.attached.store(true, Ordering::Release);
        self.touch(now_ms);
    }

    pub fn detached_at_ms(&self) -> i64 {
        self.detached_at_ms.load(Ordering::Acquire)
    }

    /// Install (or replace) the subscription. Tier pacing starts here: the
    /// first delivery on each channel happens one tier interval after
    /// subscribing, not immediately.
    pub fn subscribe(&self, channels: HashSet<Channel>, tier: RateTier, now_ms: i64) {
        *self.subscription.write() = Some(Subscription { channels, tier });
        for cursor in &self.cursors {
            cursor.last_delivery_ms.store(now_ms, Ordering::Release);
        }
    }

    pub fn subscription(&self) -> Option<Subscription> {
        self.subscription.read().clone()
    }

    /// Whether this session's rate tier permits a delivery on `channel` now.
    pub fn is_due(&self, channel: Channel, now_ms: i64) -> bool {
        let Some(sub) = self.subscription.read().clone() else {
            return false;
        };
        if !sub.channels.contains(&channel) {
            return false;
        }
        let last = self.cursors[channel.index()]
            .last_delivery_ms
            .load(Ordering::Acquire);
        now_ms.saturating_sub(last) >= sub.tier.interval_ms() as i64
    }

    pub fn mark_delivered(&self, channel: Channel, now_ms: i64, record_ts_ms: i64) {
        let cursor = &self.cursors[channel.index()];
        cursor.last_delivery_ms.store(now_ms, Ordering::Release);
        cursor
            .last_record_ms
            .fetch_max(record_ts_ms, Ordering::AcqRel);
    }

    pub fn last_record_ms(&self, channel: Channel) -> i64 {
        self.cursors[channel.index()]
            .last_record_ms
            .load(Ordering::Acquire)
    }

    pub fn buffer_result(&self, result: CommandResult) {
        self.pending_results.lock().push(result);
    }

    pub fn take_pending_results(&self) -> Vec<CommandResult> {
        std::mem::take(&mut *self.pending_results.lock())
    }

    pub fn pending_result_count(&self) -> usize {
        self.pending_results.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::record::Payload;

    fn metric_frame(ts: i64) -> ServerMessage {
        ServerMessage::Metric {
            channel: Channel::System,
            payload: Payload::new(),
            timestamp: ts,
        }
    }

    fn result_frame(id: &str) -> ServerMessage {
        ServerMessage::from(CommandResult::ok(id, serde_json::json!(null)))
    }

    #[test]
    fn resume_tokens_are_unique_and_prefixed() {
        let a = generate_resume_token();
        let b = generate_resume_token();
        assert!(a.starts_with("tok_"));
        assert_eq!(a.len(), 36);
        assert_ne!(a, b);
    }

    #[test]
    fn queue_bounds_metric_frames_drop_oldest() {
        let queue = OutboundQueue::new(3);
        for ts in 0..3 {
            assert_eq!(queue.push(metric_frame(ts)), PushOutcome::Queued);
        }
        assert_eq!(queue.push(metric_frame(3)), PushOutcome::QueuedDroppedOldest);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 1);

        // Oldest (ts=0) was shed; first drained frame is ts=1.
        let frames = queue.drain();
        match &frames[0] {
            ServerMessage::Metric { timestamp, .. } => assert_eq!(*timestamp, 1),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn queue_never_drops_results_or_alerts() {
        let queue = OutboundQueue::new(2);
        queue.push(result_frame("r1"));
        queue.push(result_frame("r2"));
        // Over the bound, but undroppable frames are queued anyway.
        assert_eq!(queue.push(result_frame("r3")), PushOutcome::Queued);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 0);

        // A metric frame cannot displace them and is shed itself.
        assert_eq!(queue.push(metric_frame(1)), PushOutcome::Shed);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn queue_sheds_metric_before_result_when_mixed() {
        let queue = OutboundQueue::new(2);
        queue.push(metric_frame(1));
        queue.push(result_frame("r1"));
        assert_eq!(queue.push(metric_frame(2)), PushOutcome::QueuedDroppedOldest);

        let frames = queue.drain();
        assert_eq!(frames.len(), 2);
        // The surviving frames: result first (metric ts=1 was shed).
        assert_eq!(frames[0].kind(), "command_result");
        assert_eq!(frames[1].kind(), "metric");
    }

    #[tokio::test]
    async fn queue_pop_waits_for_push() {
        use std::sync::Arc;
        let queue = Arc::new(OutboundQueue::new(8));

        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(metric_frame(42));

        let frame = popper.await.unwrap().unwrap();
        match frame {
            ServerMessage::Metric { timestamp, .. } => assert_eq!(timestamp, 42),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn queue_pop_returns_none_after_close() {
        let queue = OutboundQueue::new(8);
        queue.push(metric_frame(1));
        queue.close();

        // Already-queued frame still drains, then None.
        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
        assert_eq!(queue.push(metric_frame(2)), PushOutcome::Closed);
    }

    #[test]
    fn session_due_respects_tier_interval() {
        let session = Session::new(Identity::user("t"), 8, 0);
        session.subscribe([Channel::System].into(), RateTier::Standard, 0);

        // Pacing starts at subscribe time.
        assert!(!session.is_due(Channel::System, 4_999));
        assert!(session.is_due(Channel::System, 5_000));

        session.mark_delivered(Channel::System, 5_000, 5_000);
        assert!(!session.is_due(Channel::System, 9_999));
        assert!(session.is_due(Channel::System, 10_000));

        // Unsubscribed channel is never due.
        assert!(!session.is_due(Channel::Agent, 100_000));
    }

    #[test]
    fn session_without_subscription_is_never_due() {
        let session = Session::new(Identity::user("t"), 8, 0);
        assert!(!session.is_due(Channel::System, i64::MAX));
    }

    #[test]
    fn detach_preserves_queued_command_results() {
        let session = Session::new(Identity::user("t"), 8, 0);
        session.queue.push(metric_frame(1));
        session.queue.push(result_frame("r1"));
        session.queue.push(metric_frame(2));

        session.detach(100);
        assert!(!session.is_attached());
        assert_eq!(session.detached_at_ms(), 100);

        // Metric frames are gone, the result survived into the buffer.
        let pending = session.take_pending_results();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request_id, "r1");
        assert!(session.queue.is_empty());
    }

    #[test]
    fn touch_never_moves_backwards() {
        let session = Session::new(Identity::user("t"), 8, 50);
        session.touch(40);
        assert_eq!(session.last_seen_ms(), 50);
        session.touch(90);
        assert_eq!(session.last_seen_ms(), 90);
    }

    #[test]
    fn identity_adoption() {
        let session = Session::new(Identity::user("viewer"), 8, 0);
        assert_eq!(session.permission_level(), PermissionLevel::User);
        session.set_identity(Identity::admin("operator"));
        assert_eq!(session.permission_level(), PermissionLevel::Admin);
        assert_eq!(session.identity().name, "operator");
    }
}
