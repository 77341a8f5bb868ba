//! Read-only reporting HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/health` | Liveness, version and database path |
//! | `GET`  | `/api/stats` | Totals, high-severity count, sources, last 24 h |
//! | `GET`  | `/api/sources` | Configured and observed sources with counts |
//! | `GET`  | `/api/evidence` | Evidence list; `search`, `severity`, `source`, `limit` |
//! | `GET`  | `/api/evidence/{id}` | One row, last 5 history versions and latest diff |
//! | `GET`  | `/api/alerts` | Newest 50 CRITICAL/HIGH rows as alert entries |
//! | `GET`  | `/api/chain` | Hash chain verification report |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "evidence not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser dashboard
//! can be served from anywhere.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::evidence::{ChainReport, EvidenceStore};
use crate::report::{
    self, AlertEntry, EvidenceDetail, EvidenceFilter, EvidenceView, SourceOverview, Stats,
};

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: EvidenceStore,
}

/// Build the API router over an open store.
pub fn router(config: Arc<Config>, store: EvidenceStore) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/stats", get(handle_stats))
        .route("/api/sources", get(handle_sources))
        .route("/api/evidence", get(handle_list_evidence))
        .route("/api/evidence/{id}", get(handle_get_evidence))
        .route("/api/alerts", get(handle_alerts))
        .route("/api/chain", get(handle_chain))
        .layer(cors)
        .with_state(AppState { config, store })
}

/// Serve the API on `[server].bind` until the process is terminated
/// (the `serve` command).
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = EvidenceStore::open(&config.app.db_path).await?;
    let app = router(Arc::new(config.clone()), store);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "reporting API listening");
    println!("Reporting API listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;
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

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %format!("{:#}", err), "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
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

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    database: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        database: state.config.app.db_path.display().to_string(),
    })
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<Stats>, AppError> {
    Ok(Json(report::stats(state.store.pool()).await?))
}

async fn handle_sources(
    State(state): State<AppState>,
) -> Result<Json<Vec<SourceOverview>>, AppError> {
    Ok(Json(
        report::source_overview(state.store.pool(), &state.config).await?,
    ))
}

async fn handle_list_evidence(
    State(state): State<AppState>,
    Query(filter): Query<EvidenceFilter>,
) -> Result<Json<Vec<EvidenceView>>, AppError> {
    if matches!(filter.limit, Some(n) if n <= 0) {
        return Err(bad_request("limit must be > 0"));
    }
    let rows = report::list_evidence(state.store.pool(), &filter).await?;
    Ok(Json(rows.into_iter().map(EvidenceView::from).collect()))
}

async fn handle_get_evidence(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<EvidenceDetail>, AppError> {
    match report::get_evidence(state.store.pool(), id).await? {
        Some(detail) => Ok(Json(detail)),
        None => Err(not_found(format!("evidence not found: {}", id))),
    }
}

async fn handle_alerts(State(state): State<AppState>) -> Result<Json<Vec<AlertEntry>>, AppError> {
    Ok(Json(report::alerts(state.store.pool()).await?))
}

async fn handle_chain(State(state): State<AppState>) -> Result<Json<ChainReport>, AppError> {
    Ok(Json(state.store.verify_chain().await?))
}
