use std::sync::Arc;

use ontask_core::transport::ArtifactTransport;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub pool: ontask_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// Finished runs are published here; `run_logs` are written from it.
    pub event_bus: Arc<ontask_events::EventBus>,
    /// Delivery channel for action runs.
    pub transport: Arc<dyn ArtifactTransport>,
}
