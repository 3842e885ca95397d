// Simulated GPS position server
// Serves jittered fixes to every client that connects, for exercising gps-overlay without hardware

use gps_overlay::constants::{DEFAULT_PORT, SIM_CENTER_LAT, SIM_CENTER_LON, SIM_JITTER_DEG};
use gps_overlay::logging::init_logging;
use gps_overlay::net::decoder::Framing;
use gps_overlay::net::simulator::{FixSimulator, SimulatorOptions};
use std::time::Duration;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

/// Simulated GPS server configuration
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct SimConfig {
    /// Listen on [host:]port
    #[arg(long, default_value_t = format!("0.0.0.0:{}", DEFAULT_PORT))]
    listen: String,

    /// Seconds between fixes
    #[arg(long, default_value_t = 1.0)]
    interval: f64,

    /// Record framing: lines or json-stream
    #[arg(long, default_value_t = Framing::Lines)]
    framing: Framing,

    #[arg(long, default_value_t = SIM_CENTER_LAT, allow_negative_numbers = true)]
    lat: f64,

    #[arg(long, default_value_t = SIM_CENTER_LON, allow_negative_numbers = true)]
    lon: f64,

    /// Maximum random offset from the centre, in degrees
    #[arg(long, default_value_t = SIM_JITTER_DEG)]
    jitter: f64,

    /// Fraction of fixes sent as invalid (0..1)
    #[arg(long, default_value_t = 0.0)]
    invalid_ratio: f64,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = SimConfig::parse();
    init_logging(config.verbose);

    if !(config.interval.is_finite() && config.interval > 0.0) {
        return Err(format!("--interval must be positive, got {}", config.interval).into());
    }
    if !(0.0..=1.0).contains(&config.invalid_ratio) {
        return Err(format!("--invalid-ratio must be within 0..1, got {}", config.invalid_ratio).into());
    }

    let addr = if config.listen.contains(':') {
        config.listen.clone()
    } else {
        format!("0.0.0.0:{}", config.listen)
    };
    let addr: std::net::SocketAddr = addr.parse()?;

    let options = SimulatorOptions {
        center_lat: config.lat,
        center_lon: config.lon,
        jitter_deg: config.jitter,
        interval: Duration::from_secs_f64(config.interval),
        framing: config.framing,
        invalid_ratio: config.invalid_ratio,
    };
    let mut sim = FixSimulator::start(addr, options).await?;
    info!("[*] GPS simulator running on {}", sim.addr());

    if let Err(err) = signal::ctrl_c().await {
        error!("Unable to listen for shutdown signal: {}", err);
    }
    info!("[*] Shutting down simulator");
    sim.shutdown();
    Ok(())
}
