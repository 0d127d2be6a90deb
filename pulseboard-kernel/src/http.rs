use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio_stream::{wrappers, Stream, StreamExt};

use crate::alerts::AlertPipeline;
use crate::audio::{AudioDirector, AudioStatus, SoundFlavor};
use crate::carousel::Carousel;
use crate::config::{project_accent, BoardConfig};
use crate::events::EventSender;
use crate::health::{BoardHealth, HealthTracker};
use crate::models::{to_view, DeviceView, DevicesMap};
use crate::mqtt::{PowerAction, PowerError, PowerSwitch};
use crate::poller::DevicePoller;
use crate::store::UiStore;
use crate::Shared;

#[derive(Clone)]
pub struct AppState {
    pub devices: Shared<DevicesMap>,
    pub cfg: Arc<BoardConfig>,
    pub store: Arc<UiStore>,
    pub poller: Arc<DevicePoller>,
    pub carousel: Arc<Carousel>,
    pub director: Arc<AudioDirector>,
    pub pipeline: AlertPipeline,
    pub tracker: HealthTracker,
    pub power: Option<Arc<PowerSwitch>>,
    pub events: EventSender,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/api/devices", get(get_devices))
        .route("/api/device-status", get(get_device_status))
        .route("/api/projects", get(get_projects))
        .route("/api/power", post(post_power))
        .route("/api/acks", get(get_acks))
        .route("/api/acks/{key}", put(put_ack).delete(delete_ack))
        .route("/api/mute", get(get_mute).put(put_mute))
        .route("/api/carousel", get(get_carousel).put(put_carousel))
        .route("/api/carousel/next", post(post_carousel_next))
        .route("/api/carousel/prev", post(post_carousel_prev))
        .route("/api/audio", get(get_audio))
        .route("/api/audio/unlock", post(post_audio_unlock))
        .route("/api/audio/ready", post(post_audio_ready))
        .route("/api/audio/test", post(post_audio_test))
        .route("/api/events", get(get_events))
        .with_state(app_state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceListResponse {
    devices: Vec<DeviceView>,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectView {
    id: String,
    name: String,
    accent: String,
    devices: Vec<DeviceView>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CarouselView {
    index: usize,
    total: usize,
    active_project_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AckView {
    key: String,
    expires_at: String,
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<BoardHealth> {
    let devices = app.devices.lock().len();
    Json(app.tracker.snapshot(app.cfg.projects.len(), devices))
}

// GET /api/devices (whole fleet, latest observations)
async fn get_devices(State(app): State<AppState>) -> Json<DeviceListResponse> {
    let now = OffsetDateTime::now_utc();
    let stale_after = app.cfg.poller.stale_after();
    let mut devices: Vec<DeviceView> =
        app.devices.lock().values().map(|obs| to_view(obs, now, stale_after)).collect();
    devices.sort_by(|a, b| {
        (a.project_id.as_str(), a.ip.as_str()).cmp(&(b.project_id.as_str(), b.ip.as_str()))
    });
    Json(DeviceListResponse { devices, timestamp: now.format(&Rfc3339).unwrap_or_default() })
}

// GET /api/device-status?ip= (live single probe, debug tool)
async fn get_device_status(
    State(app): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<DeviceView>, (StatusCode, Json<serde_json::Value>)> {
    let Some(ip) = params.get("ip") else {
        return Err((StatusCode::BAD_REQUEST, Json(json!({"error": "missing ip parameter"}))));
    };
    let project_id = app.cfg.project_of(ip).map(|p| p.id.clone()).unwrap_or_default();
    let obs = app.poller.probe(ip, &project_id).await;
    Ok(Json(to_view(&obs, OffsetDateTime::now_utc(), app.cfg.poller.stale_after())))
}

// GET /api/projects (configured projects with their device views)
async fn get_projects(State(app): State<AppState>) -> Json<Vec<ProjectView>> {
    let now = OffsetDateTime::now_utc();
    let stale_after = app.cfg.poller.stale_after();
    let map = app.devices.lock();
    let list = app
        .cfg
        .projects
        .iter()
        .map(|p| {
            let mut devices: Vec<DeviceView> = p
                .hosts
                .iter()
                .filter_map(|ip| map.get(ip))
                .map(|obs| to_view(obs, now, stale_after))
                .collect();
            devices.sort_by(|a, b| a.ip.cmp(&b.ip));
            ProjectView {
                id: p.id.clone(),
                name: p.display_name().to_string(),
                accent: project_accent(&p.id).to_string(),
                devices,
            }
        })
        .collect();
    Json(list)
}

#[derive(Debug, Deserialize)]
struct PowerBody {
    action: String,
}

// POST /api/power {action: "on"|"off"}
async fn post_power(
    State(app): State<AppState>,
    Json(body): Json<PowerBody>,
) -> (StatusCode, Json<serde_json::Value>) {
    let Some(action) = PowerAction::parse(&body.action) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid action, expected \"on\" or \"off\""})),
        );
    };
    let Some(power) = app.power.as_ref() else {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "mqtt not configured"})));
    };
    match power.switch(action).await {
        Ok(receipt) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "requestId": receipt.request_id,
                "action": action.as_str(),
                "command": receipt.command,
                "topic": receipt.topic,
            })),
        ),
        Err(PowerError::Timeout) => {
            (StatusCode::GATEWAY_TIMEOUT, Json(json!({"error": "mqtt broker unreachable"})))
        }
        Err(PowerError::Publish(e)) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e}))),
    }
}

// GET /api/acks (active entries only)
async fn get_acks(State(app): State<AppState>) -> Json<serde_json::Value> {
    let now = OffsetDateTime::now_utc();
    let acks: Vec<AckView> = app
        .store
        .active_acks(now)
        .into_iter()
        .map(|(key, expires_at)| AckView {
            key,
            expires_at: expires_at.format(&Rfc3339).unwrap_or_default(),
        })
        .collect();
    Json(json!({"acks": acks}))
}

// PUT /api/acks/{key}
async fn put_ack(State(app): State<AppState>, Path(key): Path<String>) -> Json<AckView> {
    let expires_at = app.store.ack(&key, OffsetDateTime::now_utc());
    Json(AckView { key, expires_at: expires_at.format(&Rfc3339).unwrap_or_default() })
}

// DELETE /api/acks/{key}
async fn delete_ack(
    State(app): State<AppState>,
    Path(key): Path<String>,
) -> Json<serde_json::Value> {
    Json(json!({"removed": app.store.unack(&key)}))
}

#[derive(Debug, Deserialize)]
struct MuteBody {
    muted: bool,
}

// GET /api/mute
async fn get_mute(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({"muted": app.store.muted()}))
}

// PUT /api/mute {muted}
async fn put_mute(
    State(app): State<AppState>,
    Json(body): Json<MuteBody>,
) -> Json<serde_json::Value> {
    let muted = app.store.set_muted(body.muted);
    if muted {
        app.director.stop_now();
    }
    Json(json!({"muted": muted}))
}

fn carousel_view(app: &AppState) -> CarouselView {
    CarouselView {
        index: app.carousel.index(),
        total: app.carousel.len(),
        active_project_id: app.carousel.active_project(),
    }
}

// GET /api/carousel
async fn get_carousel(State(app): State<AppState>) -> Json<CarouselView> {
    Json(carousel_view(&app))
}

#[derive(Debug, Deserialize)]
struct GotoBody {
    index: usize,
}

// PUT /api/carousel {index}
async fn put_carousel(
    State(app): State<AppState>,
    Json(body): Json<GotoBody>,
) -> Result<Json<CarouselView>, (StatusCode, Json<serde_json::Value>)> {
    if !app.carousel.goto(body.index) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("index {} out of range", body.index)})),
        ));
    }
    let snapshot = app.devices.lock().clone();
    app.pipeline.after_navigation(&snapshot, OffsetDateTime::now_utc());
    Ok(Json(carousel_view(&app)))
}

// POST /api/carousel/next
async fn post_carousel_next(State(app): State<AppState>) -> Json<CarouselView> {
    app.carousel.advance();
    let snapshot = app.devices.lock().clone();
    app.pipeline.after_navigation(&snapshot, OffsetDateTime::now_utc());
    Json(carousel_view(&app))
}

// POST /api/carousel/prev
async fn post_carousel_prev(State(app): State<AppState>) -> Json<CarouselView> {
    app.carousel.step_back();
    let snapshot = app.devices.lock().clone();
    app.pipeline.after_navigation(&snapshot, OffsetDateTime::now_utc());
    Json(carousel_view(&app))
}

// GET /api/audio
async fn get_audio(State(app): State<AppState>) -> Json<AudioStatus> {
    Json(app.director.status(OffsetDateTime::now_utc()))
}

// POST /api/audio/unlock (operator gesture happened on the display)
async fn post_audio_unlock(State(app): State<AppState>) -> Json<AudioStatus> {
    app.director.set_unlocked();
    Json(app.director.status(OffsetDateTime::now_utc()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadyBody {
    flavor: SoundFlavor,
    ready: bool,
    #[serde(default)]
    error: Option<String>,
}

// POST /api/audio/ready {flavor, ready, error?}
async fn post_audio_ready(
    State(app): State<AppState>,
    Json(body): Json<ReadyBody>,
) -> Json<AudioStatus> {
    app.director.set_ready(body.flavor, body.ready, body.error);
    Json(app.director.status(OffsetDateTime::now_utc()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestBody {
    #[serde(default)]
    project_id: Option<String>,
}

// POST /api/audio/test {projectId?}
async fn post_audio_test(
    State(app): State<AppState>,
    Json(body): Json<TestBody>,
) -> Json<serde_json::Value> {
    let project_id = body
        .project_id
        .or_else(|| app.carousel.active_project())
        .unwrap_or_default();
    let outcome = app.director.test_sound(&project_id);
    Json(json!({"projectId": project_id, "outcome": outcome}))
}

// GET /api/events (SSE stream of BoardEvents)
async fn get_events(
    State(app): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = app.events.subscribe();
    let stream = wrappers::BroadcastStream::new(receiver).filter_map(|result| match result {
        Ok(event) => {
            serde_json::to_string(&event).ok().map(|data| Ok(Event::default().data(data)))
        }
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
