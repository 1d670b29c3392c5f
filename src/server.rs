//! HTTP adapter over the read service.
//!
//! A thin axum layer: every handler delegates to [`ReadService`] or
//! [`RunCoordinator`] and maps their errors onto HTTP status codes.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness plus readiness (503 while `NOT_READY`) |
//! | `GET`  | `/status` | Readiness, current store, draining count, run history |
//! | `GET`  | `/tables` | Tables of the current store |
//! | `GET`  | `/tables/{name}?limit=N` | Rows of one table |
//! | `POST` | `/query` | `{"sql": "SELECT ..."}` read-only passthrough |
//! | `POST` | `/refresh` | Trigger a run now (dropped if one is in flight) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "service temporarily unavailable: no snapshot loaded yet" } }
//! ```
//!
//! Error codes: `not_ready` (503), `rejected` (400), `bad_request` (400),
//! `query_error` (400), `not_found` (404).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use snapshot_relay_core::models::Trigger;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::error::QueryError;
use crate::query::{ReadService, StatusView};
use crate::readiness::Readiness;
use crate::scheduler::{RunCoordinator, TriggerOutcome};
use crate::store::{RowSet, TableInfo};

#[derive(Clone)]
struct AppState {
    read: Arc<ReadService>,
    coordinator: Arc<RunCoordinator>,
}

/// Build the router. Exposed separately from [`run_server`] for tests.
pub fn router(read: Arc<ReadService>, coordinator: Arc<RunCoordinator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/tables", get(handle_tables))
        .route("/tables/{name}", get(handle_table_rows))
        .route("/query", post(handle_query))
        .route("/refresh", post(handle_refresh))
        .layer(cors)
        .with_state(AppState { read, coordinator })
}

/// Serve until `shutdown_rx` flips to true.
pub async fn run_server(
    bind: &str,
    read: Arc<ReadService>,
    coordinator: Arc<RunCoordinator>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = router(read, coordinator);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %bind, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        let (status, code) = match &err {
            QueryError::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
            QueryError::Rejected(_) => (StatusCode::BAD_REQUEST, "rejected"),
            QueryError::UnknownTable(_) => (StatusCode::NOT_FOUND, "not_found"),
            QueryError::Execution(_) => (StatusCode::BAD_REQUEST, "query_error"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    readiness: Readiness,
    version: &'static str,
}

async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let readiness = state.read.readiness();
    let (code, status) = match readiness {
        Readiness::Ready => (StatusCode::OK, "ok"),
        Readiness::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
    };
    (
        code,
        Json(HealthResponse {
            status,
            readiness,
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

// ============ GET /status ============

async fn handle_status(State(state): State<AppState>) -> Json<StatusView> {
    Json(state.read.status())
}

// ============ GET /tables ============

#[derive(Serialize)]
struct TablesResponse {
    tables: Vec<TableInfo>,
}

async fn handle_tables(State(state): State<AppState>) -> Result<Json<TablesResponse>, AppError> {
    let tables = state.read.tables()?;
    Ok(Json(TablesResponse { tables }))
}

// ============ GET /tables/{name} ============

#[derive(Deserialize)]
struct RowsParams {
    limit: Option<usize>,
}

async fn handle_table_rows(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<RowsParams>,
) -> Result<Json<RowSet>, AppError> {
    let rows = state.read.table_rows(&name, params.limit).await?;
    Ok(Json(rows))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    sql: String,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<RowSet>, AppError> {
    if req.sql.trim().is_empty() {
        return Err(bad_request("sql must not be empty"));
    }
    let rows = state.read.query(&req.sql).await?;
    Ok(Json(rows))
}

// ============ POST /refresh ============

#[derive(Serialize)]
struct RefreshResponse {
    started: bool,
}

async fn handle_refresh(State(state): State<AppState>) -> (StatusCode, Json<RefreshResponse>) {
    match state.coordinator.trigger(Trigger::Manual) {
        TriggerOutcome::Started(_) => (StatusCode::ACCEPTED, Json(RefreshResponse { started: true })),
        TriggerOutcome::Dropped => (StatusCode::OK, Json(RefreshResponse { started: false })),
    }
}
