use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub db_healthy: bool,
    /// Open and idle connections in the pool.
    pub pool: PoolUsage,
    /// Zone given to workflows created without one.
    pub default_time_zone: String,
}

#[derive(Debug, Serialize)]
pub struct PoolUsage {
    pub size: u32,
    pub idle: usize,
}

/// GET /health
///
/// 503 when the database cannot be reached.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_healthy = match ontask_db::health_check(&state.pool).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the database");
            false
        }
    };
    let status = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = HealthResponse {
        status: if db_healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        pool: PoolUsage {
            size: state.pool.size(),
            idle: state.pool.num_idle(),
        },
        default_time_zone: state.config.time_zone.to_string(),
    };
    (status, Json(body))
}

/// Mounted at the root, outside `/api/v1` and its bearer token.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
