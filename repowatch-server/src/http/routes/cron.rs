//! Cron trigger endpoints
//!
//! POST /api/v1/cron/status  - run a status pass
//! POST /api/v1/cron/storage - run a storage pass
//!
//! Both require `Authorization: Bearer <CRONJOB_KEY>`.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use repowatch_core::{PassKind, PassOutcome};
use serde::Serialize;

use crate::http::error::ApiError;
use crate::http::extractors::CronAuth;
use crate::http::server::AppState;

#[derive(Debug, Serialize)]
pub struct CronResponse {
    pub message: String,
}

impl CronResponse {
    fn for_outcome(kind: PassKind, outcome: &PassOutcome) -> Self {
        let message = match outcome {
            PassOutcome::NothingToCheck => {
                format!("{} cron executed. No repository to check.", kind.label())
            }
            PassOutcome::Completed(_) => {
                format!("{} cron executed successfully", kind.label())
            }
        };
        Self { message }
    }
}

/// Run a pass on its own task so a dropped connection cannot stop it
/// between persisting the alert stamp and dispatching the alert.
async fn run_pass(state: Arc<AppState>, kind: PassKind) -> Result<Json<CronResponse>, ApiError> {
    let pass = tokio::spawn(async move { state.reconciler.run(kind).await });

    let outcome = pass
        .await
        .map_err(|e| ApiError::Internal {
            message: format!("{} pass task failed: {}", kind.label(), e),
        })?
        .map_err(|e| {
            tracing::warn!(pass = kind.label(), error = %e, "cron pass failed");
            ApiError::from(e)
        })?;

    if let PassOutcome::Completed(summary) = &outcome {
        tracing::info!(
            pass = kind.label(),
            matched = summary.matched,
            alerted = summary.alerted.len(),
            "cron pass completed"
        );
    }

    Ok(Json(CronResponse::for_outcome(kind, &outcome)))
}

/// POST /api/v1/cron/status
async fn status(
    _auth: CronAuth,
    State(state): State<Arc<AppState>>,
) -> Result<Json<CronResponse>, ApiError> {
    run_pass(state, PassKind::Status).await
}

/// POST /api/v1/cron/storage
async fn storage(
    _auth: CronAuth,
    State(state): State<Arc<AppState>>,
) -> Result<Json<CronResponse>, ApiError> {
    run_pass(state, PassKind::Storage).await
}

/// Cron routes
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/cron/status", post(status))
        .route("/api/v1/cron/storage", post(storage))
}
