//! HTTP surface over [`RelayService`].

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::{RelayError, Result};
use crate::service::{RelayService, StartRequest, StartResponse};
use crate::state_machine::JobSnapshot;

/// Error body: `{ "code", "message" }`, plus `details` where useful.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code.to_string(),
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        let message = err.to_string();
        match err {
            RelayError::NoValidSources { rejected } => {
                ApiError::new(StatusCode::BAD_REQUEST, "NO_VALID_SOURCES", message)
                    .with_details(json!({ "rejected": rejected }))
            }
            RelayError::EndpointProvisionFailed(_) => {
                ApiError::new(StatusCode::BAD_GATEWAY, "ENDPOINT_PROVISION_FAILED", message)
            }
            RelayError::DestinationBusy { .. } => {
                ApiError::new(StatusCode::CONFLICT, "DESTINATION_BUSY", message)
            }
            RelayError::JobNotFound(_) => ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", message),
            other => {
                error!("Request failed: {}", other);
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An unexpected error occurred",
                )
            }
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RelayService>,
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    /// Only jobs that are still running.
    #[serde(default)]
    active: bool,
}

#[derive(Debug, Serialize)]
struct JobList {
    jobs: Vec<JobSnapshot>,
}

#[derive(Debug, Serialize)]
struct Cancelled {
    cancelled: usize,
}

pub fn router(service: Arc<RelayService>) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/jobs", post(start_job).get(list_jobs))
        .route("/jobs/{id}", get(get_job).delete(cancel_job))
        .route("/stop-all", post(stop_all))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}

/// Serve until Ctrl+C or SIGTERM, then cancel every job and wait for cleanup.
pub async fn serve(service: Arc<RelayService>, listen: &str) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    match service.destinations().as_slice() {
        [] => warn!("No destination configured; set rtmp_url or [youtube]"),
        names => info!("Destinations: {}", names.join(", ")),
    }

    axum::serve(listener, router(service.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.shutdown().await;
    Ok(())
}

async fn liveness() -> &'static str {
    "stream relay running"
}

async fn start_job(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> ApiResult<(StatusCode, Json<StartResponse>)> {
    let response = state.service.start(request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<JobList>> {
    let jobs = if params.active {
        state.service.active()
    } else {
        state.service.status(None)?
    };
    Ok(Json(JobList { jobs }))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    let mut jobs = state.service.status(Some(&id))?;
    jobs.pop()
        .map(Json)
        .ok_or_else(|| RelayError::JobNotFound(id).into())
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Cancelled>> {
    let cancelled = state.service.cancel(Some(&id))?;
    Ok(Json(Cancelled { cancelled }))
}

async fn stop_all(State(state): State<AppState>) -> ApiResult<Json<Cancelled>> {
    let cancelled = state.service.cancel(None)?;
    Ok(Json(Cancelled { cancelled }))
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
