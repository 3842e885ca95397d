use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use crate::constants::*;
use crate::feed::FeedOptions;
use crate::interpolate::Interpolator;
use crate::mapper::Bounds;
use crate::net::connection::ConnectionOptions;
use crate::net::decoder::Framing;
use crate::net::transport::{TcpTransport, Transport};

/// GPS map overlay configuration
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Position server host
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Position server port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Seconds to wait before reconnecting after a failure. Retries never give up.
    #[arg(long, value_name = "SECS", default_value_t = CONNECTION_RETRY_INTERVAL_SECS)]
    pub retry_interval: f64,

    /// Seconds before a connect attempt is abandoned
    #[arg(long, value_name = "SECS", default_value_t = CONNECT_TIMEOUT_SECS)]
    pub connect_timeout: f64,

    /// Record framing on the wire: lines (newline-delimited JSON) or json-stream (back-to-back objects).
    /// Position servers that write objects without a newline need json-stream.
    #[arg(long, default_value_t = Framing::Lines)]
    pub framing: Framing,

    /// Largest record in bytes before it is discarded
    #[arg(long, default_value_t = MAX_RECORD_LEN)]
    pub max_record_len: usize,

    /// Calibration grid JSON file ({"grid": [{"normalizedX", "normalizedY", "lat", "lon"}, ...]})
    #[arg(long, value_name = "FILE")]
    pub grid: PathBuf,

    /// Number of neighbours for IDW interpolation (values below 1 mean 1)
    #[arg(long, short = 'k', default_value_t = DEFAULT_K_NEIGHBORS, allow_negative_numbers = true)]
    pub k_neighbors: i32,

    /// IDW power parameter. 1=linear, 2=square
    #[arg(long, default_value_t = DEFAULT_DISTANCE_POWER)]
    pub power: f64,

    /// Target-space x of the map's left edge
    #[arg(long, default_value_t = DEFAULT_BOUNDS_LEFT, allow_negative_numbers = true)]
    pub left: f64,

    /// Target-space x of the map's right edge
    #[arg(long, default_value_t = DEFAULT_BOUNDS_RIGHT, allow_negative_numbers = true)]
    pub right: f64,

    /// Target-space y of the map's top edge
    #[arg(long, default_value_t = DEFAULT_BOUNDS_TOP, allow_negative_numbers = true)]
    pub top: f64,

    /// Target-space y of the map's bottom edge
    #[arg(long, default_value_t = DEFAULT_BOUNDS_BOTTOM, allow_negative_numbers = true)]
    pub bottom: f64,

    /// Latitude reported until the first fix arrives
    #[arg(long, default_value_t = DEFAULT_INITIAL_LAT, allow_negative_numbers = true)]
    pub initial_lat: f64,

    /// Longitude reported until the first fix arrives
    #[arg(long, default_value_t = DEFAULT_INITIAL_LON, allow_negative_numbers = true)]
    pub initial_lon: f64,

    /// Fixes buffered per subscriber before they are dropped
    #[arg(long, default_value_t = SUBSCRIBER_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Serve GET /position on this port
    #[arg(long, value_name = "PORT")]
    pub http_port: Option<u16>,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Reject values that would panic or make no sense downstream.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.retry_interval.is_finite() && self.retry_interval > 0.0) {
            return Err(format!("--retry-interval must be a positive number of seconds, got {}", self.retry_interval));
        }
        if !(self.connect_timeout.is_finite() && self.connect_timeout > 0.0) {
            return Err(format!("--connect-timeout must be a positive number of seconds, got {}", self.connect_timeout));
        }
        if !(self.power.is_finite() && self.power >= 0.0) {
            return Err(format!("--power must be a non-negative number, got {}", self.power));
        }
        for (name, v) in [("left", self.left), ("right", self.right), ("top", self.top), ("bottom", self.bottom)] {
            if !v.is_finite() {
                return Err(format!("--{} must be finite", name));
            }
        }
        Ok(())
    }

    pub fn bounds(&self) -> Bounds {
        Bounds {
            left: self.left,
            right: self.right,
            top: self.top,
            bottom: self.bottom,
        }
    }

    pub fn interpolator(&self) -> Interpolator {
        Interpolator::new(self.k_neighbors, self.power)
    }

    pub fn feed_options(&self) -> FeedOptions {
        FeedOptions {
            connection: ConnectionOptions {
                retry_interval: Duration::from_secs_f64(self.retry_interval),
                framing: self.framing,
                max_record_len: self.max_record_len,
            },
            queue_capacity: self.queue_capacity,
        }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(TcpTransport::from_host_port(
            &self.host,
            self.port,
            Duration::from_secs_f64(self.connect_timeout),
        ))
    }
}
