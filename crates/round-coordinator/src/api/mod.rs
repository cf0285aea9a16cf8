pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::coordinator::RoundCoordinator;

/// HTTP boundary of the coordinator.
#[derive(Clone)]
pub struct ApiServer {
    coordinator: Arc<RoundCoordinator>,
}

impl ApiServer {
    pub fn new(coordinator: Arc<RoundCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<RoundCoordinator> {
        &self.coordinator
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/task/{round}", get(handlers::task_handler))
            .route("/submission/{round}", post(handlers::submission_handler))
            .route("/audit", get(handlers::audit_handler))
            .route("/health", get(handlers::health_handler))
            .route("/healthz", get(handlers::health_handler))
            .route("/health/{component}", post(handlers::component_handler))
            .route("/rounds/advance", post(handlers::advance_handler))
            .route("/stats", get(handlers::stats_handler))
            .route("/metrics", get(handlers::metrics_handler))
            .with_state(Arc::new(self))
    }
}
