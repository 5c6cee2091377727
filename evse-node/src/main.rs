//! EVSE simulator CLI - ramps up a pool of simulated charge points against
//! a CSMS over OCPP-J 1.6.
//!
//! # Usage
//!
//! ```bash
//! # Ramp 1000 simulated charge points up over 60s
//! evse-node --csms-url ws://localhost:8180/ocpp --target-count 1000 --ramp-up-secs 60
//!
//! # Custom id template and hold duration
//! evse-node --csms-url ws://localhost:8180/ocpp --target-count 25000 \
//!     --id-template "LOAD-{index}" --ramp-up-secs 300 --hold-secs 1800
//! ```

use std::time::Duration;

use clap::Parser;
use evse_core::clock::system_clock;
use evse_core::config::PoolConfig;
use evse_core::control::Core;
use evse_core::events::EventBus;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Ramps a pool of simulated OCPP-J 1.6 charge points against a CSMS
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenario name, surfaced in logs and metrics only
    #[arg(long, default_value = "default")]
    scenario: String,

    /// CSMS WebSocket URL, without the trailing charge point id segment
    #[arg(long, default_value = "ws://localhost:8180/ocpp")]
    csms_url: String,

    /// Number of simulated charge points to bring up
    #[arg(long, default_value = "100")]
    target_count: u32,

    /// Charge point id template; `{index}` is substituted
    #[arg(long, default_value = "SIM-{index}")]
    id_template: String,

    /// Seconds to spread session start over
    #[arg(long, default_value = "60")]
    ramp_up_secs: u64,

    /// Seconds to hold the full pool open before exiting
    #[arg(long, default_value = "3600")]
    hold_secs: u64,

    /// Per-connector MeterValues interval, seconds
    #[arg(long, default_value = "60")]
    meter_values_interval_secs: u64,

    /// Refuse StartBatch if available memory (MiB) drops below this
    #[arg(long, default_value = "256")]
    memory_floor_mb: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              EVSE Simulator - OCPP-J 1.6 Load Test            ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Scenario: {:<50} ║", args.scenario);
    println!("║  CSMS URL: {:<50} ║", truncate(&args.csms_url, 50));
    println!("║  Target:   {:<50} ║", args.target_count);
    println!("║  Ramp-up:  {:<50} ║", format!("{}s", args.ramp_up_secs));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let config = PoolConfig::new(args.scenario.clone(), args.csms_url.clone(), args.target_count)
        .with_ramp(Duration::from_secs(args.ramp_up_secs), Duration::from_secs(args.hold_secs))
        .with_id_tag_template(args.id_template)
        .with_memory_floor_mb(args.memory_floor_mb);
    let config = PoolConfig {
        meter_values_interval: Duration::from_secs(args.meter_values_interval_secs),
        ..config
    };

    let mut core = Core::new(system_clock(), EventBus::default(), args.target_count);

    info!(target = args.target_count, "starting batch");
    core.start_batch(config).await?;

    tokio::time::sleep(Duration::from_secs(args.hold_secs)).await;

    let summary = core.metrics_summary();
    info!(
        active = summary.active_sessions,
        ok = summary.successful_connections,
        failed = summary.failed_connections,
        "hold elapsed, shutting pool down"
    );

    core.stop_all().await;

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}
