//! Fake device status endpoint for local development.
//!
//! Serves the same series a real playback controller exposes, so a kernel
//! can be pointed at localhost instead of a lab. The online count follows a
//! deterministic wave by default, which means WARN and ERROR windows come
//! around on their own without any scripting; instances on different ports
//! drift out of phase so a simulated fleet never moves in lockstep.
//!
//! Environment:
//! - PULSEBOARD_SIM_BIND  (default 0.0.0.0:8084)
//! - PULSEBOARD_SIM_PATH  (default /api/v1/adb-controller/status-all-devices)
//! - PULSEBOARD_SIM_UNITS (default 40)
//! - PULSEBOARD_SIM_MODE  (wave | steady | dead | empty, default wave)

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Sine sweep between 0 and the full unit count.
    Wave,
    /// Always the full unit count.
    Steady,
    /// Always zero online.
    Dead,
    /// Serves an empty series, which a board reads as an outage.
    Empty,
}

#[derive(Clone)]
struct SimState {
    units: u32,
    mode: Mode,
    started: u64,
    /// Seconds of waveform offset, derived from the bound port.
    phase: u64,
}

fn epoch_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Online units at a given epoch second. The wave swings through a full
/// period every ten minutes and touches zero at the trough.
fn online_units(state: &SimState, at: u64) -> u32 {
    match state.mode {
        Mode::Steady => state.units,
        Mode::Dead | Mode::Empty => 0,
        Mode::Wave => {
            let t = at.saturating_sub(state.started) + state.phase;
            let radians = t as f64 * std::f64::consts::TAU / 600.0;
            let factor = (radians.sin() + 1.0) / 2.0;
            (state.units as f64 * factor).round() as u32
        }
    }
}

async fn status_all_devices(State(state): State<SimState>) -> Json<serde_json::Value> {
    if state.mode == Mode::Empty {
        return Json(serde_json::json!({ "data": [] }));
    }
    let now = epoch_seconds();
    // a short backlog of samples, newest last, like the real controller
    let data: Vec<serde_json::Value> = (0..12)
        .rev()
        .map(|i| {
            let at = now.saturating_sub(i * 15);
            serde_json::json!({"total_online": online_units(&state, at), "timestamp": at})
        })
        .collect();
    Json(serde_json::json!({ "data": data }))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "pulseboard_simulator=info".to_string()),
        )
        .init();

    let bind = std::env::var("PULSEBOARD_SIM_BIND").unwrap_or_else(|_| "0.0.0.0:8084".into());
    let path = std::env::var("PULSEBOARD_SIM_PATH")
        .unwrap_or_else(|_| "/api/v1/adb-controller/status-all-devices".into());
    let units = std::env::var("PULSEBOARD_SIM_UNITS").ok().and_then(|v| v.parse().ok()).unwrap_or(40);
    let mode = match std::env::var("PULSEBOARD_SIM_MODE").as_deref() {
        Ok("steady") => Mode::Steady,
        Ok("dead") => Mode::Dead,
        Ok("empty") => Mode::Empty,
        _ => Mode::Wave,
    };

    let listener =
        TcpListener::bind(bind.as_str()).await.with_context(|| format!("failed to bind {bind}"))?;
    let port = listener.local_addr().context("no local address")?.port();
    let state =
        SimState { units, mode, started: epoch_seconds(), phase: u64::from(port) * 37 % 600 };
    let app = Router::new().route(&path, get(status_all_devices)).with_state(state);

    info!("simulated device on http://{bind}{path}");
    axum::serve(listener, app).await.context("http server exited")?;
    Ok(())
}
