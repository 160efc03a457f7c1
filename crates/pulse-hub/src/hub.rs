use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use pulse_core::{
    AlertEvent, Channel, CommandResult, HubConfig, HubError, Identity, MetricRecord, RateTier,
    ServerMessage, SessionId, WallClock,
};
use pulse_telemetry::Recorder;

use crate::alerts::{default_rules, AlertPipeline, ThresholdRule};
use crate::history::HistoryRing;
use crate::registry::SessionRegistry;
use crate::session::{PushOutcome, Session};

struct ChannelSlot {
    history: HistoryRing,
    /// Most recent record staged for delivery (latest-value-wins
    /// coalescing between due ticks).
    latest: Option<MetricRecord>,
}

/// The single authority between producers and sessions.
///
/// Owns the session registry, per-channel history and the alert pipeline.
/// Producers call `publish`; a timer-driven scan fans records out to
/// whichever sessions are due under their rate tier. One lock per channel —
/// unrelated channels never serialize on each other — and delivery never
/// happens while a channel lock is held.
pub struct BroadcastHub {
    config: HubConfig,
    registry: Arc<SessionRegistry>,
    channels: Vec<Mutex<ChannelSlot>>,
    alerts: AlertPipeline,
    clock: WallClock,
    stats: Arc<Recorder>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    started_at_ms: i64,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Result<Self, String> {
        Self::with_rules(config, default_rules())
    }

    pub fn with_rules(config: HubConfig, rules: Vec<ThresholdRule>) -> Result<Self, String> {
        config.validate()?;

        let stats = Arc::new(Recorder::new());
        let registry = Arc::new(SessionRegistry::new(&config, Arc::clone(&stats)));
        let alerts = AlertPipeline::new(
            rules,
            config.alert_suppression_window_ms,
            Arc::clone(&stats),
        );
        let channels = Channel::ALL
            .iter()
            .map(|_| {
                Mutex::new(ChannelSlot {
                    history: HistoryRing::new(config.history_capacity),
                    latest: None,
                })
            })
            .collect();
        let clock = WallClock::new();
        let started_at_ms = clock.now_ms();

        Ok(Self {
            config,
            registry,
            channels,
            alerts,
            clock,
            stats,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started_at_ms,
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<Recorder> {
        &self.stats
    }

    pub fn clock(&self) -> &WallClock {
        &self.clock
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn uptime_ms(&self) -> i64 {
        self.now_ms() - self.started_at_ms
    }

    // ── Producer side ──

    /// Accept one record: ring append, stage as the channel's latest, then
    /// run the alert rules. Never fails back to the producer; a slow or
    /// dead consumer costs that consumer, not the pipeline.
    pub fn publish(&self, record: MetricRecord) {
        {
            let mut slot = self.channels[record.channel.index()].lock();
            slot.history.append(record.clone());
            slot.latest = Some(record.clone());
        }
        self.stats.counter_inc("hub.publishes", 1);

        for event in self.alerts.evaluate(&record, record.timestamp_ms) {
            self.broadcast_alert(&event);
        }
    }

    /// Deliver to one session, bypassing tiers. Command results buffer
    /// under a detached session; telemetry for a detached session is
    /// dropped (backfill covers it on resume).
    pub fn publish_targeted(
        &self,
        id: &SessionId,
        message: ServerMessage,
    ) -> Result<(), HubError> {
        let session = self
            .registry
            .get(id)
            .ok_or_else(|| HubError::UnknownSession(id.clone()))?;

        if session.is_attached() {
            match session.queue.push(message) {
                PushOutcome::Closed => {
                    self.registry.evict(id);
                    Err(HubError::TransportFailure("outbound queue closed".into()))
                }
                outcome => {
                    self.count_push(outcome);
                    Ok(())
                }
            }
        } else {
            if let ServerMessage::CommandResult {
                request_id,
                success,
                output,
                error_kind,
            } = message
            {
                session.buffer_result(CommandResult {
                    request_id,
                    success,
                    output,
                    error_kind,
                });
            }
            Ok(())
        }
    }

    /// Alerts go to every attached session, unconditionally — never
    /// subject to tier pacing or the drop-oldest policy.
    fn broadcast_alert(&self, event: &AlertEvent) {
        let frame = ServerMessage::from(event);
        for session in self.registry.attached_sessions() {
            match session.queue.push(frame.clone()) {
                PushOutcome::Closed => {
                    self.registry.evict(&session.id);
                }
                outcome => self.count_push(outcome),
            }
        }
    }

    // ── Delivery scan ──

    /// One fan-out pass: for each channel, every session whose tier
    /// interval has elapsed gets the latest staged record, if it is newer
    /// than what that session last saw.
    pub fn deliver_due(&self, now_ms: i64) {
        for channel in Channel::ALL {
            let latest = { self.channels[channel.index()].lock().latest.clone() };
            let Some(record) = latest else { continue };

            for session in self.registry.for_each_due(channel, now_ms) {
                if record.timestamp_ms <= session.last_record_ms(channel) {
                    continue;
                }
                match session.queue.push(ServerMessage::from(&record)) {
                    PushOutcome::Closed => {
                        self.registry.evict(&session.id);
                    }
                    outcome => {
                        self.count_push(outcome);
                        if outcome != PushOutcome::Shed {
                            session.mark_delivered(channel, now_ms, record.timestamp_ms);
                        }
                    }
                }
            }
        }
    }

    fn count_push(&self, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Queued => self.stats.counter_inc("frames.sent", 1),
            PushOutcome::QueuedDroppedOldest => {
                self.stats.counter_inc("frames.sent", 1);
                self.stats.counter_inc("frames.dropped", 1);
            }
            PushOutcome::Shed => self.stats.counter_inc("frames.dropped", 1),
            PushOutcome::Closed => {}
        }
    }

    // ── Session operations (transport-facing) ──

    pub fn register_session(&self, identity: Identity) -> Result<Arc<Session>, HubError> {
        self.registry.register(identity, self.now_ms())
    }

    pub fn subscribe_session(
        &self,
        id: &SessionId,
        channels: HashSet<Channel>,
        tier: RateTier,
    ) -> Result<(), HubError> {
        self.registry.subscribe(id, channels, tier, self.now_ms())
    }

    pub fn heartbeat(&self, id: &SessionId) -> Result<(), HubError> {
        self.registry.touch(id, self.now_ms())
    }

    pub fn detach_session(&self, id: &SessionId) {
        self.registry.detach(id, self.now_ms());
    }

    /// Reattach prior session state (identified by its resume token) onto
    /// the session backing a fresh transport, redeliver buffered command
    /// results, and backfill subscribed channels from history.
    pub fn resume(&self, into: &Arc<Session>, token: &str, since_ms: i64) -> Result<(), HubError> {
        let now = self.now_ms();
        self.registry.adopt(token, into, now)?;

        for result in into.take_pending_results() {
            let outcome = into.queue.push(ServerMessage::from(result));
            self.count_push(outcome);
        }

        if let Some(sub) = into.subscription() {
            for channel in &sub.channels {
                let records = self.history_since(*channel, since_ms);
                let mut last_ts = 0;
                for record in &records {
                    let outcome = into.queue.push(ServerMessage::from(record));
                    self.count_push(outcome);
                    last_ts = record.timestamp_ms;
                }
                if last_ts > 0 {
                    into.mark_delivered(*channel, now, last_ts);
                }
            }
        }
        Ok(())
    }

    // ── Snapshot surface ──

    pub fn history_since(&self, channel: Channel, since_ms: i64) -> Vec<MetricRecord> {
        self.channels[channel.index()].lock().history.since(since_ms)
    }

    pub fn recent_alerts(&self) -> Vec<AlertEvent> {
        self.alerts.recent()
    }

    pub fn session_count(&self) -> usize {
        self.registry.count()
    }

    // ── Lifecycle ──

    /// Spawn the delivery tick and the idle-eviction sweep.
    pub fn start(self: Arc<Self>) {
        let hub = Arc::clone(&self);
        let cancel = self.cancel.clone();
        let tick = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(hub.config.update_interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let now = hub.now_ms();
                        hub.deliver_due(now);
                    }
                }
            }
        });

        let hub = Arc::clone(&self);
        let cancel = self.cancel.clone();
        let sweep = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(hub.config.sweep_interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = hub.registry.sweep(hub.now_ms());
                        if removed > 0 {
                            tracing::info!(removed, "idle session sweep");
                        }
                    }
                }
            }
        });

        self.tasks.lock().extend([tick, sweep]);
        tracing::info!(
            update_interval_ms = self.config.update_interval_ms,
            "broadcast hub started"
        );
    }

    /// Stop background tasks and close every session.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        self.registry.close_all();
        tracing::info!("broadcast hub shut down");
    }
}
