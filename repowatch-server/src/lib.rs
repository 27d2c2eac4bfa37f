//! repowatch-server: HTTP trigger surface
//!
//! Exposes the reconciliation passes to an external scheduler. A cron job
//! (or any periodic caller) POSTs to `/api/v1/cron/status` and
//! `/api/v1/cron/storage` with the shared `CRONJOB_KEY`.

pub mod http;

pub use http::{build_router, run_server, ApiError, AppState, ServerConfig, ServerError};
