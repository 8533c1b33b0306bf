use std::{net::SocketAddr, str::FromStr};

use axum::{
    Json, Router,
    body::Body,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    analysis::AnalysisRequest,
    schedule::{ADVISORY_NOTE, ScheduleConfig, ScheduleOptions},
    state::AppContext,
    storage::{LogLevel, NewLogEntry, TimeRange},
};

#[derive(Clone)]
pub struct ServerState {
    ctx: AppContext,
}

impl ServerState {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    fn ctx(&self) -> &AppContext {
        &self.ctx
    }
}

pub async fn serve(state: ServerState) -> anyhow::Result<()> {
    let addr: SocketAddr = state.ctx().config().server.addr().parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve_with_listener(listener, state).await
}

pub async fn serve_with_listener(listener: TcpListener, state: ServerState) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "server listening");

    let app = router(state.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.ctx().clone()))
        .await?;

    Ok(())
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/write-log", post(write_log))
        .route("/api/logs", get(read_logs).post(read_logs))
        .route("/api/analyze", post(analyze))
        .route(
            "/api/schedules",
            get(list_schedules)
                .post(create_schedule)
                .delete(cancel_schedules),
        )
        .route(
            "/api/schedules/:id",
            get(get_schedule).delete(cancel_schedule),
        )
        .route("/api/agent/chat", post(agent_chat))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal(ctx: AppContext) {
    ctx.shutdown_notifier().notified().await;
}

async fn health() -> &'static str {
    "ok"
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn rejection_response(rejection: JsonRejection) -> Response {
    error_response(StatusCode::BAD_REQUEST, rejection.body_text())
}

#[derive(Debug, Deserialize)]
struct WriteLogRequest {
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

async fn write_log(
    State(state): State<ServerState>,
    payload: Result<Json<WriteLogRequest>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection_response(rejection),
    };

    let level = payload.level.as_deref().map(str::trim).unwrap_or_default();
    let message = payload.message.unwrap_or_default();
    if level.is_empty() || message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "level and message are required");
    }
    let level = match LogLevel::from_str(level) {
        Ok(level) => level,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };

    let mut entry = NewLogEntry::new(level, message);
    if let Some(status) = payload.status {
        entry = entry.with_status(status);
    }
    state.ctx().store().append(entry).await;

    (
        StatusCode::CREATED,
        Json(json!({ "message": "Log entry added" })),
    )
        .into_response()
}

type QueryPairs = Vec<(String, String)>;

/// First value for `key`; repeated keys fall back to their first occurrence.
fn first_param<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.as_str())
}

async fn read_logs(
    State(state): State<ServerState>,
    query: Result<Query<QueryPairs>, QueryRejection>,
) -> Response {
    let pairs = match query {
        Ok(Query(pairs)) => pairs,
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "unreadable log query; exporting unbounded");
            Vec::new()
        }
    };
    let range = TimeRange::from_query(first_param(&pairs, "from"), first_param(&pairs, "to"));
    match state.ctx().store().export(range).await {
        Ok(stream) => (
            [(header::CONTENT_TYPE, "application/json")],
            Body::from_stream(stream),
        )
            .into_response(),
        Err(err) => {
            warn!(error = ?err, "failed to open log store for export");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read logs")
        }
    }
}

async fn analyze(
    State(state): State<ServerState>,
    payload: Result<Json<AnalysisRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection_response(rejection),
    };

    let endpoint = request.endpoint.clone();
    match state.ctx().analyzer().analyze(request).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => {
            warn!(error = ?err, kind = err.kind(), %endpoint, "log analysis failed");
            err.into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct ScheduleListResponse {
    schedules: Vec<ScheduleConfig>,
    note: &'static str,
}

async fn list_schedules(State(state): State<ServerState>) -> Json<ScheduleListResponse> {
    let schedules = state.ctx().schedules().read().list();
    Json(ScheduleListResponse {
        schedules,
        note: ADVISORY_NOTE,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateScheduleRequest {
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    interval: String,
    #[serde(default)]
    auth_token: Option<String>,
    #[serde(default)]
    time_range: Option<String>,
}

#[derive(Debug, Serialize)]
struct ScheduleCreatedResponse {
    schedule: ScheduleConfig,
    note: &'static str,
}

async fn create_schedule(
    State(state): State<ServerState>,
    payload: Result<Json<CreateScheduleRequest>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection_response(rejection),
    };
    if payload.endpoint.trim().is_empty() || payload.interval.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "endpoint and interval are required");
    }

    let options = ScheduleOptions {
        auth_token: payload.auth_token,
        time_range: payload.time_range,
    };
    match state
        .ctx()
        .agent()
        .schedule_analysis(&payload.endpoint, &payload.interval, options)
        .await
    {
        Ok(schedule) => (
            StatusCode::CREATED,
            Json(ScheduleCreatedResponse {
                schedule,
                note: ADVISORY_NOTE,
            }),
        )
            .into_response(),
        Err(err) => {
            warn!(error = ?err, endpoint = %payload.endpoint, "failed to create schedule");
            error_response(StatusCode::BAD_GATEWAY, format!("{err:#}"))
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleDetailResponse {
    schedule: ScheduleConfig,
    has_auth_token: bool,
    note: &'static str,
}

async fn get_schedule(State(state): State<ServerState>, Path(id): Path<String>) -> Response {
    let schedules = state.ctx().schedules();
    let Some(schedule) = schedules.read().get(&id).cloned() else {
        return error_response(StatusCode::NOT_FOUND, format!("No schedule found with id {id}"));
    };
    Json(ScheduleDetailResponse {
        has_auth_token: schedule.has_auth_token(),
        schedule,
        note: ADVISORY_NOTE,
    })
    .into_response()
}

async fn cancel_schedule(State(state): State<ServerState>, Path(id): Path<String>) -> Response {
    let outcome = state.ctx().schedules().write().cancel(&id);
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (status, Json(outcome)).into_response()
}

#[derive(Debug, Default, Deserialize)]
struct CancelSchedulesQuery {
    endpoint: Option<String>,
}

async fn cancel_schedules(
    State(state): State<ServerState>,
    Query(query): Query<CancelSchedulesQuery>,
) -> Json<serde_json::Value> {
    let schedules = state.ctx().schedules();
    let cancelled = match query.endpoint.as_deref().filter(|value| !value.is_empty()) {
        Some(endpoint) => schedules.write().cancel_by_endpoint(endpoint),
        None => schedules.write().cancel_all(),
    };
    info!(cancelled, endpoint = ?query.endpoint, "schedules cancelled");
    Json(json!({ "cancelled": cancelled }))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
}

async fn agent_chat(
    State(state): State<ServerState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection_response(rejection),
    };
    if payload.message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "message is required");
    }

    match state.ctx().agent().handle(&payload.message).await {
        Ok(reply) => Json(reply).into_response(),
        Err(err) => {
            warn!(error = ?err, "agent chat failed");
            error_response(StatusCode::BAD_GATEWAY, format!("{err:#}"))
        }
    }
}
