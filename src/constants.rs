// Shared constants and defaults for the position feed and map projection

/// Default position server port (matches the field position servers).
pub const DEFAULT_PORT: u16 = 8085;

/// Fixed delay between a failed connection and the next attempt (s).
pub const CONNECTION_RETRY_INTERVAL_SECS: f64 = 5.0;

/// Upper bound for a single connect attempt before it counts as failed (s).
pub const CONNECT_TIMEOUT_SECS: f64 = 10.0;

/// Bytes requested per read from the transport.
pub const READ_BUFFER_SIZE: usize = 8192;

/// Largest partial record the decoder will buffer before discarding it.
pub const MAX_RECORD_LEN: usize = 64 * 1024;

/// Per-subscriber notification queue depth.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

/// Default number of neighbours used by the interpolator.
pub const DEFAULT_K_NEIGHBORS: i32 = 4;

/// Default IDW power. 1 = linear, 2 = square.
pub const DEFAULT_DISTANCE_POWER: f64 = 1.0;

/// Neighbours closer than this (degrees) count as an exact hit.
pub const EXACT_MATCH_DISTANCE: f64 = 1e-9;

/// Same threshold in squared-distance units, which is what the selection works in.
pub const EXACT_MATCH_DISTANCE_SQ: f64 = EXACT_MATCH_DISTANCE * EXACT_MATCH_DISTANCE;

/// Weight sums below this are treated as underflow.
pub const MIN_WEIGHT_SUM: f64 = 1e-12;

// --- Map image corners in target space (vertical axis flipped) ---

pub const DEFAULT_BOUNDS_LEFT: f64 = -48.0;
pub const DEFAULT_BOUNDS_RIGHT: f64 = 16813.0;
pub const DEFAULT_BOUNDS_TOP: f64 = 48.0;
pub const DEFAULT_BOUNDS_BOTTOM: f64 = -12276.0;

/// Location shown until the first fix arrives.
pub const DEFAULT_INITIAL_LAT: f64 = 63.4;
pub const DEFAULT_INITIAL_LON: f64 = 10.4;

/// Simulator centre point and jitter (degrees).
pub const SIM_CENTER_LAT: f64 = 63.4305;
pub const SIM_CENTER_LON: f64 = 10.3951;
pub const SIM_JITTER_DEG: f64 = 0.001;
