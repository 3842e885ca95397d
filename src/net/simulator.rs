// Fix simulator
// TCP position server emitting jittered fixes, for development and tests

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::decoder::Framing;
use crate::constants::{SIM_CENTER_LAT, SIM_CENTER_LON, SIM_JITTER_DEG};
use crate::fix::PositionFix;

#[derive(Debug, Clone)]
pub struct SimulatorOptions {
    pub center_lat: f64,
    pub center_lon: f64,
    /// Fixes are drawn uniformly within +/- this many degrees of the centre
    pub jitter_deg: f64,
    pub interval: Duration,
    pub framing: Framing,
    /// Fraction of fixes sent as `valid: false` at 0,0 (lost satellite lock)
    pub invalid_ratio: f64,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        SimulatorOptions {
            center_lat: SIM_CENTER_LAT,
            center_lon: SIM_CENTER_LON,
            jitter_deg: SIM_JITTER_DEG,
            interval: Duration::from_secs(1),
            framing: Framing::Lines,
            invalid_ratio: 0.0,
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Draw one fix around the configured centre.
pub fn generate_fix<R: Rng + ?Sized>(options: &SimulatorOptions, rng: &mut R) -> PositionFix {
    if options.invalid_ratio > 0.0 && rng.gen_bool(options.invalid_ratio.min(1.0)) {
        return PositionFix::new(0.0, 0.0, 0.0, now_ms(), false);
    }
    let jitter = options.jitter_deg.abs();
    let (dlat, dlon) = if jitter > 0.0 {
        (rng.gen_range(-jitter..=jitter), rng.gen_range(-jitter..=jitter))
    } else {
        (0.0, 0.0)
    };
    PositionFix::new(
        options.center_lat + dlat,
        options.center_lon + dlon,
        5.0 + rng.gen_range(0.0..10.0),
        now_ms(),
        true,
    )
}

/// Wire bytes for one fix in the given framing.
pub fn encode_fix(fix: &PositionFix, framing: Framing) -> io::Result<Vec<u8>> {
    let mut bytes = fix.to_json()?.into_bytes();
    if framing == Framing::Lines {
        bytes.push(b'\n');
    }
    Ok(bytes)
}

/// Simulated position server. Every connected client gets its own stream of fixes.
pub struct FixSimulator {
    addr: SocketAddr,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl FixSimulator {
    pub async fn start(addr: SocketAddr, options: SimulatorOptions) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        info!(
            "Simulated GPS server listening on {} ({} framing, every {:?})",
            local_addr, options.framing, options.interval
        );

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                info!("Accepted connection from {}", peer_addr);
                                let options = options.clone();
                                let shutdown_rx = shutdown_rx.clone();
                                tokio::spawn(async move {
                                    serve_client(stream, peer_addr, options, shutdown_rx).await;
                                });
                            }
                            Err(e) => error!("Accept failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Simulator accept loop stopped");
        });

        Ok(FixSimulator {
            addr: local_addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and close every client connection.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }
}

impl Drop for FixSimulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve_client(mut stream: TcpStream, peer_addr: SocketAddr, options: SimulatorOptions, mut shutdown_rx: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(options.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // ThreadRng is not Send, keep it out of the await
                let fix = generate_fix(&options, &mut rand::thread_rng());
                let bytes = match encode_fix(&fix, options.framing) {
                    Ok(b) => b,
                    Err(e) => {
                        error!("Failed to encode fix: {}", e);
                        continue;
                    }
                };
                if let Err(e) = stream.write_all(&bytes).await {
                    info!("Connection to {} closed: {}", peer_addr, e);
                    break;
                }
                debug!("Sent to {}: lat={:.6} lon={:.6} valid={}", peer_addr, fix.latitude, fix.longitude, fix.valid);
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::decoder::StreamDecoder;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_generated_fixes_stay_within_jitter() {
        let options = SimulatorOptions::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let fix = generate_fix(&options, &mut rng);
            assert!(fix.valid);
            assert!((fix.latitude - SIM_CENTER_LAT).abs() <= SIM_JITTER_DEG + 1e-12);
            assert!((fix.longitude - SIM_CENTER_LON).abs() <= SIM_JITTER_DEG + 1e-12);
            assert!((5.0..15.0).contains(&fix.altitude));
        }
    }

    #[test]
    fn test_invalid_ratio_one_always_invalid() {
        let options = SimulatorOptions {
            invalid_ratio: 1.0,
            ..SimulatorOptions::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let fix = generate_fix(&options, &mut rng);
        assert!(!fix.valid);
        assert_eq!((fix.latitude, fix.longitude), (0.0, 0.0));
    }

    #[test]
    fn test_encode_framing() {
        let fix = PositionFix::new(1.0, 2.0, 3.0, 4, true);
        let lines = encode_fix(&fix, Framing::Lines).unwrap();
        let stream = encode_fix(&fix, Framing::JsonStream).unwrap();
        assert_eq!(lines.last(), Some(&b'\n'));
        assert_eq!(&lines[..lines.len() - 1], &stream[..]);
    }

    #[tokio::test]
    async fn test_client_receives_decodable_fixes() {
        let options = SimulatorOptions {
            interval: Duration::from_millis(10),
            framing: Framing::JsonStream,
            ..SimulatorOptions::default()
        };
        let mut sim = FixSimulator::start("127.0.0.1:0".parse().unwrap(), options).await.unwrap();
        let mut client = TcpStream::connect(sim.addr()).await.unwrap();

        let mut decoder = StreamDecoder::new(Framing::JsonStream, 1024);
        let mut fixes = Vec::new();
        let mut buf = [0u8; 512];
        while fixes.len() < 3 {
            let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0);
            fixes.extend(decoder.decode(&buf[..n]).into_iter().map(|r| r.unwrap()));
        }
        assert!(fixes.iter().all(|f| f.is_plausible()));

        sim.shutdown();
        // Client connection is closed after shutdown
        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match client.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok());
    }
}
