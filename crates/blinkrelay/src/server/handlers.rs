//! REST handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Json;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use super::error::ApiError;
use super::AppState;
use crate::gateway::{BlinkReport, HeartbeatReport, LightReport};

type JsonBody<T> = Result<Json<T>, JsonRejection>;
type ApiResult = Result<Json<Value>, ApiError>;

/// `GET /healthz`
pub async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true, "timestamp": Utc::now() }))
}

/// `POST /api/heartbeat`
pub async fn heartbeat(State(state): State<AppState>, body: JsonBody<HeartbeatReport>) -> ApiResult {
    let Json(report) = body?;
    let device = state.gateway.report_heartbeat(report)?;
    Ok(Json(json!({ "success": true, "device": device })))
}

/// `POST /api/blink`
pub async fn blink(State(state): State<AppState>, body: JsonBody<BlinkReport>) -> ApiResult {
    let Json(report) = body?;
    let event = state.gateway.report_blink(report)?;
    Ok(Json(json!({ "success": true, "event": event })))
}

/// `POST /api/light`
pub async fn light(State(state): State<AppState>, body: JsonBody<LightReport>) -> ApiResult {
    let Json(report) = body?;
    let event = state.gateway.send_light_command(report)?;
    Ok(Json(json!({ "success": true, "event": event })))
}

/// `POST /api/light-state`
pub async fn light_state(State(state): State<AppState>, body: JsonBody<Value>) -> ApiResult {
    let Json(update) = body?;
    state.gateway.report_light_state(update);
    Ok(Json(json!({ "success": true })))
}

/// `POST /api/dispatch`
pub async fn dispatch(State(state): State<AppState>, body: JsonBody<Value>) -> ApiResult {
    let Json(payload) = body?;
    info!(dispatcher = state.dispatcher.name(), "Forwarding payload downstream");
    let data = state.dispatcher.forward(&payload).await?;
    Ok(Json(json!({
        "success": true,
        "message": "webhook triggered",
        "data": data,
    })))
}

/// `GET /api/devices`
pub async fn devices(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "devices": state.gateway.devices() }))
}
