#![allow(dead_code)]
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::api::{error::ApiError, response::ApiResponse};
use crate::domain::{PlantState, Schedule};
use crate::supervisor::MultiSiteSupervisor;

pub type AppState = Arc<MultiSiteSupervisor>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sites", get(list_sites))
        .route("/sites/:site_id/state", get(get_state))
        .route("/sites/:site_id/plan", get(get_plan))
        .route("/sites/:site_id/telemetry", get(get_recent_telemetry))
        .route("/sites/:site_id/power-flow", get(get_power_flow))
        .route("/sites/:site_id/strategies", get(list_strategies))
        .route("/sites/:site_id/strategies/manual", post(set_manual_strategy))
        .route("/sites/:site_id/strategies/auto", post(set_auto_mode))
        .route("/sites/:site_id/snapshots", get(subscribe_snapshot))
        .route("/sites/:site_id/start", post(start_site))
        .route("/sites/:site_id/stop", post(stop_site))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(ApiResponse::success("ok"))
}

async fn list_sites(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.list_sites()))
}

fn site_or_404(
    state: &AppState,
    site_id: u32,
) -> Result<Arc<crate::site_controller::SiteController<Box<dyn crate::modbus::transport::ModbusTransport>>>, ApiError> {
    state.get_site(site_id).ok_or_else(|| ApiError::NotFound(format!("site {site_id}")))
}

async fn get_state(State(state): State<AppState>, Path(site_id): Path<u32>) -> Result<impl IntoResponse, ApiError> {
    let site = site_or_404(&state, site_id)?;
    Ok(Json(ApiResponse::success(site.snapshot().await)))
}

async fn get_plan(State(state): State<AppState>, Path(site_id): Path<u32>) -> Result<impl IntoResponse, ApiError> {
    let site = site_or_404(&state, site_id)?;
    let plan: Option<Schedule> = site.current_plan().await;
    Ok(Json(ApiResponse::success(plan)))
}

#[derive(Debug, Deserialize)]
pub struct TelemetryQuery {
    #[serde(default = "default_telemetry_minutes")]
    pub minutes: i64,
    #[serde(default = "default_telemetry_limit")]
    pub limit: usize,
}

fn default_telemetry_minutes() -> i64 {
    60
}
fn default_telemetry_limit() -> usize {
    500
}

async fn get_recent_telemetry(
    State(state): State<AppState>,
    Path(site_id): Path<u32>,
    Query(query): Query<TelemetryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let site = site_or_404(&state, site_id)?;
    let entries = site.recent_telemetry(query.minutes, query.limit).await;
    Ok(Json(ApiResponse::success(entries)))
}

#[derive(Debug, Deserialize)]
pub struct PowerFlowQuery {
    #[serde(default = "default_telemetry_minutes")]
    pub minutes: i64,
}

async fn get_power_flow(
    State(state): State<AppState>,
    Path(site_id): Path<u32>,
    Query(query): Query<PowerFlowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let site = site_or_404(&state, site_id)?;
    Ok(Json(ApiResponse::success(site.power_flow(query.minutes).await)))
}

async fn list_strategies(State(state): State<AppState>, Path(site_id): Path<u32>) -> Result<impl IntoResponse, ApiError> {
    let site = site_or_404(&state, site_id)?;
    Ok(Json(ApiResponse::success(site.strategy_names().await)))
}

#[derive(Debug, Deserialize)]
pub struct ManualStrategyRequest {
    pub name: String,
}

async fn set_manual_strategy(
    State(state): State<AppState>,
    Path(site_id): Path<u32>,
    Json(body): Json<ManualStrategyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let site = site_or_404(&state, site_id)?;
    if !site.strategy_names().await.contains(&body.name) {
        return Err(ApiError::BadRequest(format!("unknown strategy: {}", body.name)));
    }
    site.set_manual_strategy(body.name).await;
    Ok(Json(ApiResponse::success(())))
}

async fn set_auto_mode(State(state): State<AppState>, Path(site_id): Path<u32>) -> Result<impl IntoResponse, ApiError> {
    let site = site_or_404(&state, site_id)?;
    site.set_auto_mode().await;
    Ok(Json(ApiResponse::success(())))
}

async fn subscribe_snapshot(
    State(state): State<AppState>,
    Path(site_id): Path<u32>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, ApiError> {
    let site = site_or_404(&state, site_id)?;
    let rx = site.subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(|item: Result<PlantState, _>| async move {
        let state = item.ok()?;
        Some(Ok(Event::default().json_data(&state).ok()?))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Serialize)]
struct ActionResult {
    site_id: u32,
}

async fn start_site(State(state): State<AppState>, Path(site_id): Path<u32>) -> Result<impl IntoResponse, ApiError> {
    let site = site_or_404(&state, site_id)?;
    site.clone().spawn();
    Ok(Json(ApiResponse::success(ActionResult { site_id })))
}

async fn stop_site(State(state): State<AppState>, Path(site_id): Path<u32>) -> Result<impl IntoResponse, ApiError> {
    let site = site_or_404(&state, site_id)?;
    site.stop();
    Ok(Json(ApiResponse::success(ActionResult { site_id })))
}
