// GPS Overlay - Main Entry Point
// Licensed under AGPL v3

use gps_overlay::calibration::CalibrationGrid;
use gps_overlay::config::Config;
use gps_overlay::feed::PositionFeed;
use gps_overlay::http::{self, AppState};
use gps_overlay::logging::init_logging;
use gps_overlay::mapper::MapProjector;
use std::sync::Arc;
use tokio::signal;
use clap::Parser;
use tracing::{info, error, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose);

    config.validate()?;

    // Grid load failure is fatal: nothing can be placed without it
    let grid = match CalibrationGrid::load(&config.grid) {
        Ok(grid) => grid.into_shared(),
        Err(e) => {
            error!("Cannot start without a calibration grid ({}): {}", config.grid.display(), e);
            return Err(e.into());
        }
    };
    info!("Loaded {} grid points from {}", grid.len(), config.grid.display());

    let projector = MapProjector::new(grid, config.interpolator(), config.bounds());
    let feed = Arc::new(PositionFeed::new(config.transport(), config.feed_options()));

    info!("Starting GPS feed from {} ({} framing)", feed.endpoint(), config.framing);
    warn!(
        "Reconnects retry every {:.1}s with no backoff and no retry limit",
        config.retry_interval
    );

    // Log every mapped fix, the way the marker would be moved
    let log_projector = projector.clone();
    feed.on_fix(move |fix| match log_projector.project_fix(&fix) {
        Ok(p) => info!(
            "IDW => lat={:.6}, lon={:.6} => map=({:.1},{:.1})",
            fix.latitude, fix.longitude, p.x, p.y
        ),
        Err(e) => warn!("Cannot map fix lat={}, lon={}: {}", fix.latitude, fix.longitude, e),
    });

    match projector.project(config.initial_lat, config.initial_lon) {
        Ok(p) => info!(
            "Initial marker at lat={}, lon={} => map=({:.1},{:.1}), waiting for GPS data",
            config.initial_lat, config.initial_lon, p.x, p.y
        ),
        Err(e) => warn!("Cannot map initial location: {}", e),
    }

    feed.start();

    // Optional: HTTP endpoint for the presentation layer to poll the current position
    if let Some(port) = config.http_port {
        let state = AppState {
            feed: Arc::clone(&feed),
            projector: projector.clone(),
            initial: (config.initial_lat, config.initial_lon),
        };
        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind((std::net::Ipv4Addr::UNSPECIFIED, port)).await {
                Ok(l) => l,
                Err(e) => {
                    error!("HTTP server failed to bind to port {}: {}", port, e);
                    return;
                }
            };
            info!("HTTP server on port {} serving /position", port);
            if let Err(e) = http::serve(listener, state).await {
                error!("HTTP server error: {}", e);
            }
        });
    }

    // Wait for shutdown signal (Ctrl+C)
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal (Ctrl+C)");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
            feed.shutdown();
            return Err(err.into());
        }
    }

    info!("Shutting down...");
    feed.shutdown();

    let conn = feed.connection_stats();
    let stats = feed.stats();
    info!(
        "Feed stopped. {} fixes published, {} filtered, {} corrupt records, {} connection attempts",
        stats.published, stats.filtered, conn.corrupt_records, conn.attempts
    );

    Ok(())
}
