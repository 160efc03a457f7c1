use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use pulse_core::record::Payload;
use pulse_core::{Channel, Credential, HubConfig, MetricRecord};
use pulse_hub::BuiltinExecutor;
use pulse_server::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "pulse", about = "Real-time operational dashboard hub")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 8787)]
    port: u16,

    /// Base broadcast tick in milliseconds.
    #[arg(long, default_value_t = 100)]
    update_interval_ms: u64,

    /// Per-channel history ring capacity.
    #[arg(long, default_value_t = 1_000)]
    history_capacity: usize,

    #[arg(long, default_value_t = 60_000)]
    session_idle_timeout_ms: u64,

    #[arg(long, default_value_t = 30_000)]
    command_timeout_ms: u64,

    #[arg(long, default_value_t = 60_000)]
    alert_suppression_window_ms: u64,

    /// Hard cap on concurrent sessions.
    #[arg(long, default_value_t = 256)]
    max_sessions: usize,

    /// Credential granting admin-level sessions.
    #[arg(long, env = "PULSE_ADMIN_CREDENTIAL")]
    admin_credential: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pulse_telemetry::init_logging("info");
    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        hub: HubConfig {
            update_interval_ms: args.update_interval_ms,
            history_capacity: args.history_capacity,
            session_idle_timeout_ms: args.session_idle_timeout_ms,
            command_timeout_ms: args.command_timeout_ms,
            alert_suppression_window_ms: args.alert_suppression_window_ms,
            max_sessions: args.max_sessions,
            ..Default::default()
        },
        admin_credential: args.admin_credential.map(Credential::new),
        ..Default::default()
    };

    let handle = pulse_server::start(config, Arc::new(BuiltinExecutor)).await?;
    tracing::info!(port = handle.port, "pulse ready");

    // Self-telemetry: the hub reports its own vitals on the performance
    // channel. External probes publish through `ServerHandle::hub()`.
    let hub = Arc::clone(handle.hub());
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            let mut payload = Payload::new();
            payload.insert("sessions".into(), serde_json::json!(hub.session_count()));
            payload.insert("uptime_ms".into(), serde_json::json!(hub.uptime_ms()));
            payload.insert(
                "frames_sent".into(),
                serde_json::json!(hub.stats().counter_get("frames.sent")),
            );
            payload.insert(
                "frames_dropped".into(),
                serde_json::json!(hub.stats().counter_get("frames.dropped")),
            );
            hub.publish(MetricRecord::new(Channel::Performance, payload, hub.clock()));
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    reporter.abort();
    handle.shutdown().await;
    Ok(())
}
