// HTTP server for the issuance API
//
// Routes:
// - POST /api/v1/verification-codes            request a code
// - POST /api/v1/verification-codes/verify     consume a code
// - GET  /api/v1/verification-codes/{recipient}/usage
// - GET  /api/v1/dead-letters                  undeliverable codes
// - GET  /metrics, GET /health

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::error::IssuanceError;
use crate::issuance::{AdmissionResponse, IssuanceService, Outcome};
use crate::metrics;
use crate::rate_limit::QuotaUsage;

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: IssuanceService,
    pub metrics_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub recipient: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub recipient: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    verified: bool,
    code_id: uuid::Uuid,
}

/// Maps service errors to status codes
struct ApiError(IssuanceError);

impl From<IssuanceError> for ApiError {
    fn from(err: IssuanceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            IssuanceError::InvalidRecipient(_) | IssuanceError::CodeNotFound => {
                StatusCode::BAD_REQUEST
            }
            IssuanceError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/verification-codes", post(request_code_handler))
        .route("/api/v1/verification-codes/verify", post(verify_handler))
        .route(
            "/api/v1/verification-codes/{recipient}/usage",
            get(usage_handler),
        )
        .route("/api/v1/dead-letters", get(dead_letters_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and run until Ctrl-C
pub async fn serve(state: AppState, addr: SocketAddr, housekeeping: Duration) -> Result<()> {
    if state.metrics_enabled {
        metrics::init().context("Failed to initialize metrics")?;
    }

    let cleanup = spawn_housekeeping(state.service.clone(), housekeeping);
    let app = router(state);

    info!("Starting codeguard server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    cleanup.abort();
    Ok(())
}

/// Periodically purge expired codes, prune the ledger and archive old dead letters
pub fn spawn_housekeeping(service: IssuanceService, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = service.purge_expired_codes().await {
                warn!("Expired code purge failed: {}", e);
            }
            if let Err(e) = service.prune_ledger().await {
                warn!("Ledger prune failed: {}", e);
            }
            let archived = service.dispatcher().archive_old_dead_letters().await;
            if archived > 0 {
                debug!("Archived {} dead letters", archived);
            }
        }
    })
}

async fn request_code_handler(
    State(state): State<AppState>,
    Json(request): Json<CodeRequest>,
) -> Result<Response, ApiError> {
    let outcome = state.service.request_code(&request.recipient).await?;
    let body = AdmissionResponse::from(&outcome);

    Ok(match outcome {
        Outcome::Admitted(_) => (StatusCode::OK, Json(body)).into_response(),
        Outcome::Rejected(rejection) => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, rejection.retry_after_secs().to_string())],
            Json(body),
        )
            .into_response(),
    })
}

async fn verify_handler(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let code = state
        .service
        .verify_code(&request.recipient, &request.code)
        .await?;

    Ok(Json(VerifyResponse {
        verified: code.verified,
        code_id: code.id,
    }))
}

async fn usage_handler(
    State(state): State<AppState>,
    Path(recipient): Path<String>,
) -> Result<Json<QuotaUsage>, ApiError> {
    Ok(Json(state.service.usage(&recipient).await?))
}

async fn dead_letters_handler(State(state): State<AppState>) -> impl IntoResponse {
    let dispatcher = state.service.dispatcher();
    let stats = dispatcher.dead_letter_stats().await;
    let pending = dispatcher.pending_dead_letters().await;

    Json(json!({
        "stats": stats,
        "delivery": dispatcher.stats(),
        "pending": pending,
    }))
}

/// Metrics endpoint handler
async fn metrics_handler(State(state): State<AppState>) -> Response {
    if !state.metrics_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}
