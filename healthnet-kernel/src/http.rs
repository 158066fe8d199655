/**
 * API REST HEALTHNET - Transport HTTP du kernel
 *
 * RÔLE :
 * Enveloppe fine autour du Monitor : désérialise les requêtes, appelle le
 * protocole, traduit les rejets typés en codes HTTP.
 *
 * ROUTES :
 * - GET  /               message d'accueil
 * - GET  /health         liveness du kernel lui-même
 * - GET  /system/health  KernelHealth (clients, timers, notifications, mqtt)
 * - POST /register       enregistrement d'un client
 * - POST /heartbeat      rapport de statut
 * - GET  /clients        liste des clients
 * - GET  /clients/{id}   détail d'un client
 *
 * ERREURS : 409 déjà enregistré, 404 client inconnu, 422 intervalle invalide,
 * corps JSON `{"error": ..., "message": ...}`.
 */

use crate::health::{HealthTracker, KernelHealth};
use crate::models::{
    ClientId, ClientRecord, Heartbeat, HeartbeatRequest, RegistrationRequest, RegistrationResponse, Status,
    WatchState,
};
use crate::monitor::{Monitor, MonitorError};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

#[derive(serde::Serialize)]
struct ClientView {
    id: ClientId,
    name: String,
    interval_secs: u64,
    last_checkin: String,    // format RFC3339 pour l'API
    last_status: Status,
    last_status_code: u8,
    watch: WatchState,
    overdue: bool,           // true si > interval depuis le dernier check-in
    seconds_since_checkin: i64,
}

fn to_view(r: &ClientRecord) -> ClientView {
    let now = OffsetDateTime::now_utc();
    let age = now - r.last_checkin;
    ClientView {
        id: r.id,
        name: r.name.clone(),
        interval_secs: r.interval.secs(),
        last_checkin: r.last_checkin.format(&Rfc3339).unwrap_or_default(),
        last_status: r.last_status,
        last_status_code: r.last_status.code(),
        watch: r.watch,
        overdue: age > Duration::seconds(r.interval.secs() as i64),
        seconds_since_checkin: age.whole_seconds().max(0),
    }
}

/// Rejet du protocole traduit en réponse HTTP
pub struct ApiError(MonitorError);

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, kind) = match &self.0 {
            MonitorError::AlreadyRegistered(_) => (StatusCode::CONFLICT, "already_registered"),
            MonitorError::UnknownClient(_) => (StatusCode::NOT_FOUND, "unknown_client"),
            MonitorError::InvalidInterval(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_interval"),
        };
        let body = serde_json::json!({ "error": kind, "message": self.0.to_string() });
        (code, Json(body)).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
    pub health_tracker: HealthTracker,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat))
        .route("/clients", get(get_clients))
        .route("/clients/{id}", get(get_client))
        .with_state(app_state)
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "healthnet kernel" }))
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.monitor))
}

// POST /register
async fn register(
    State(app): State<AppState>,
    Json(req): Json<RegistrationRequest>,
) -> Result<Json<RegistrationResponse>, ApiError> {
    let machine_id = app.monitor.register(&req.client_name, req.interval)?;
    Ok(Json(RegistrationResponse { machine_id }))
}

// POST /heartbeat
async fn heartbeat(
    State(app): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<ClientView>, ApiError> {
    let record = app.monitor.heartbeat(Heartbeat::now(req.machine_id, req.status.into()))?;
    Ok(Json(to_view(&record)))
}

// GET /clients
async fn get_clients(State(app): State<AppState>) -> Json<Vec<ClientView>> {
    Json(app.monitor.clients().iter().map(to_view).collect())
}

// GET /clients/{id}
async fn get_client(
    State(app): State<AppState>,
    Path(id): Path<ClientId>,
) -> Result<Json<ClientView>, ApiError> {
    let record = app.monitor.client(&id).ok_or(MonitorError::UnknownClient(id))?;
    Ok(Json(to_view(&record)))
}
