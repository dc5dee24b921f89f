//! HTTP control surface and the listener stream.

use std::str::FromStr;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{Result, StationError};
use crate::library::{FolderDebug, TrackSource, TrackSummary};
use crate::station::{Broadcaster, LoopMode, NextChunk, StatusSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub station: Broadcaster,
    pub source: TrackSource,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(|| async { "OK" }))
        .route("/stream", get(stream))
        .route("/play", post(play))
        .route("/pause", post(pause))
        .route("/next", post(next))
        .route("/prev", post(prev))
        .route("/select", post(select))
        .route("/loop", post(set_loop))
        .route("/status", get(status))
        .route("/files", get(files))
        .route("/rescan", get(rescan).post(rescan))
        .route("/debug", get(debug))
        .route("/control", post(control))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> &'static str {
    "LAN radio engine is running. Listen at /stream, status at /status"
}

/// Chunked audio for one listener, until it hangs up or is dropped.
async fn stream(State(state): State<AppState>) -> Response {
    let client = state.station.connect();
    state.station.ensure_running();
    let idle = state.station.config().idle_timeout;

    let body = futures::stream::unfold(client, move |mut client| async move {
        loop {
            match client.next_chunk(idle).await {
                NextChunk::Chunk(bytes) => return Some((Ok::<_, std::io::Error>(bytes), client)),
                // No audio right now (paused, between tracks); keep the connection.
                NextChunk::Timeout => continue,
                NextChunk::Closed => return None,
            }
        }
    });

    (
        [
            (header::CONTENT_TYPE, state.station.content_type().to_string()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

async fn play(State(state): State<AppState>) -> Result<Json<Value>> {
    state.station.request_play()?;
    state.station.ensure_running();
    Ok(Json(json!({"status": "playing"})))
}

async fn pause(State(state): State<AppState>) -> Json<Value> {
    state.station.request_pause();
    Json(json!({"status": "paused"}))
}

async fn next(State(state): State<AppState>) -> Result<Json<Value>> {
    state.station.request_next()?;
    Ok(Json(json!({"status": "skipped", "action": "next"})))
}

async fn prev(State(state): State<AppState>) -> Result<Json<Value>> {
    state.station.request_prev()?;
    Ok(Json(json!({"status": "previous", "action": "prev"})))
}

#[derive(Debug, Default, Deserialize)]
struct SelectReq {
    id: Option<String>,
}

async fn select(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    let req: SelectReq = parse_body(&body)?;
    let id = req.id.as_deref().map(str::trim).unwrap_or_default();
    if id.is_empty() {
        return Err(StationError::BadRequest("id is required".into()));
    }
    let selected = state.station.request_jump(id)?;
    Ok(Json(json!({"status": "ok", "selected": selected.id})))
}

#[derive(Debug, Default, Deserialize)]
struct LoopReq {
    mode: Option<String>,
}

async fn set_loop(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    let req: LoopReq = parse_body(&body)?;
    let mode: LoopMode = req.mode.unwrap_or_default().parse()?;
    state.station.set_loop_mode(mode);
    Ok(Json(json!({"loop": mode})))
}

async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.station.status())
}

async fn files(State(state): State<AppState>) -> Json<Vec<TrackSummary>> {
    state.station.rescan(&state.source).await;
    Json(state.station.status().playlist)
}

async fn rescan(State(state): State<AppState>) -> Json<Value> {
    let count = state.station.rescan(&state.source).await;
    Json(json!({"status": "scanned", "count": count}))
}

async fn debug(State(state): State<AppState>) -> Json<FolderDebug> {
    Json(state.source.debug_info())
}

/// Single-endpoint command set used by older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Play,
    Pause,
    Toggle,
    Next,
    Prev,
    LoopOne,
    LoopAll,
    LoopOff,
}

impl FromStr for ControlAction {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "play" => Ok(ControlAction::Play),
            "pause" => Ok(ControlAction::Pause),
            "toggle" => Ok(ControlAction::Toggle),
            "next" => Ok(ControlAction::Next),
            "prev" => Ok(ControlAction::Prev),
            "loop_one" => Ok(ControlAction::LoopOne),
            "loop_all" => Ok(ControlAction::LoopAll),
            "loop_off" => Ok(ControlAction::LoopOff),
            _ => Err(StationError::UnknownCommand(s.to_string())),
        }
    }
}

impl ControlAction {
    pub fn apply(self, station: &Broadcaster) -> Result<()> {
        match self {
            ControlAction::Play => {
                station.request_play()?;
                station.ensure_running();
            }
            ControlAction::Pause => station.request_pause(),
            ControlAction::Toggle => {
                if !station.toggle_pause()? {
                    station.ensure_running();
                }
            }
            ControlAction::Next => station.request_next()?,
            ControlAction::Prev => station.request_prev()?,
            ControlAction::LoopOne => station.set_loop_mode(LoopMode::One),
            ControlAction::LoopAll => station.set_loop_mode(LoopMode::All),
            ControlAction::LoopOff => station.set_loop_mode(LoopMode::None),
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ControlReq {
    action: Option<String>,
}

async fn control(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    let req: ControlReq = parse_body(&body)?;
    let action: ControlAction = req.action.unwrap_or_default().parse()?;
    action.apply(&state.station)?;

    let snap = state.station.status();
    info!("control action {action:?}; current: {:?}", snap.current.as_ref().map(|t| &t.id));
    Ok(Json(json!({
        "status": "ok",
        "paused": snap.paused,
        "loop_mode": snap.loop_mode,
        "current": snap.current,
    })))
}

/// JSON body without insisting on a content type; an empty body means "no fields".
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| StationError::BadRequest(format!("invalid JSON: {e}")))
}
