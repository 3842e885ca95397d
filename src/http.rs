// Status HTTP endpoint
// Exposes the current fix and its map coordinate to the presentation layer

use std::io;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::feed::PositionFeed;
use crate::fix::PositionFix;
use crate::mapper::{MapProjector, TargetPoint};

#[derive(Clone)]
pub struct AppState {
    pub feed: Arc<PositionFeed>,
    pub projector: MapProjector,
    /// (lat, lon) reported before the first fix
    pub initial: (f64, f64),
}

#[derive(Debug, Serialize)]
pub struct PositionReport {
    pub state: &'static str,
    pub connected: bool,
    pub fix: Option<PositionFix>,
    pub updated_at_ms: Option<u64>,
    /// "fix" or "initial"
    pub source: &'static str,
    pub mapped: Option<TargetPoint>,
    pub error: Option<String>,
}

impl AppState {
    pub fn report(&self) -> PositionReport {
        let fix = self.feed.current_fix();
        let (lat, lon, source) = match fix {
            Some(f) => (f.latitude, f.longitude, "fix"),
            None => (self.initial.0, self.initial.1, "initial"),
        };
        let (mapped, error) = match self.projector.project(lat, lon) {
            Ok(p) => (Some(p), None),
            Err(e) => (None, Some(e.to_string())),
        };
        PositionReport {
            state: self.feed.state().as_str(),
            connected: self.feed.is_connected(),
            fix,
            updated_at_ms: self
                .feed
                .last_update_time()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64),
            source,
            mapped,
            error,
        }
    }
}

async fn position(State(state): State<AppState>) -> Json<PositionReport> {
    Json(state.report())
}

async fn health() -> &'static str {
    "ok"
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/position", get(position))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> io::Result<()> {
    axum::serve(listener, router(state)).await
}
