/// Hub tuning knobs. Every value has a sane default; `validate()` runs once
/// at startup and rejects configurations the engine cannot honor.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Base broadcast tick. The realtime tier delivers at this granularity;
    /// slower tiers are multiples observed by the due-scan.
    pub update_interval_ms: u64,
    /// Per-channel history ring capacity.
    pub history_capacity: usize,
    /// Idle timeout for sessions that never subscribed (subscribed sessions
    /// use 2x their rate-tier interval instead).
    pub session_idle_timeout_ms: u64,
    /// Maximum command execution duration before a timeout result.
    pub command_timeout_ms: u64,
    /// Alert dedupe suppression window.
    pub alert_suppression_window_ms: u64,
    /// Per-session outbound queue bound (metric frames beyond this are shed
    /// oldest-first).
    pub max_queue_frames: usize,
    /// Hard cap on concurrent sessions; registrations beyond it are
    /// rejected at handshake time.
    pub max_sessions: usize,
    /// How long a disconnected session stays resumable.
    pub resume_grace_ms: u64,
    /// Idle-eviction sweep cadence.
    pub sweep_interval_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 100,
            history_capacity: 1_000,
            session_idle_timeout_ms: 60_000,
            command_timeout_ms: 30_000,
            alert_suppression_window_ms: 60_000,
            max_queue_frames: 200,
            max_sessions: 256,
            resume_grace_ms: 300_000,
            sweep_interval_ms: 1_000,
        }
    }
}

impl HubConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.update_interval_ms == 0 {
            return Err("update_interval_ms must be positive".into());
        }
        if self.history_capacity == 0 {
            return Err("history_capacity must be positive".into());
        }
        if self.max_queue_frames == 0 {
            return Err("max_queue_frames must be positive".into());
        }
        if self.max_sessions == 0 {
            return Err("max_sessions must be positive".into());
        }
        if self.sweep_interval_ms == 0 {
            return Err("sweep_interval_ms must be positive".into());
        }
        if self.command_timeout_ms == 0 {
            return Err("command_timeout_ms must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(HubConfig::default().validate().is_ok());
    }

    #[test]
    fn default_values_match_contract() {
        let config = HubConfig::default();
        assert_eq!(config.update_interval_ms, 100);
        assert_eq!(config.history_capacity, 1_000);
        assert_eq!(config.command_timeout_ms, 30_000);
        assert_eq!(config.alert_suppression_window_ms, 60_000);
        assert_eq!(config.max_queue_frames, 200);
        assert_eq!(config.resume_grace_ms, 300_000);
        assert_eq!(config.sweep_interval_ms, 1_000);
    }

    #[test]
    fn zero_values_are_rejected() {
        for mutate in [
            (|c: &mut HubConfig| c.update_interval_ms = 0) as fn(&mut HubConfig),
            |c| c.history_capacity = 0,
            |c| c.max_queue_frames = 0,
            |c| c.max_sessions = 0,
            |c| c.sweep_interval_ms = 0,
            |c| c.command_timeout_ms = 0,
        ] {
            let mut config = HubConfig::default();
            mutate(&mut config);
            assert!(config.validate().is_err());
        }
    }
}
