use std::sync::Arc;

use typology_db::store::RunStore;

use crate::config::ServerConfig;
use crate::engine::RunQueueWorker;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Run persistence, shared with the queue worker.
    pub store: Arc<dyn RunStore>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// The process-wide queue worker. Handlers call `start()` after every
    /// mutation that enqueues work.
    pub worker: Arc<RunQueueWorker>,
}
