//! API route handlers for the darkroom server.

pub mod health;
pub mod jobs;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET /api/health - Health check
/// - GET /api/jobs - List jobs with status/parent filters
/// - GET /api/jobs/stream - SSE stream of lifecycle events
/// - GET /api/jobs/:id - Get a single job
/// - DELETE /api/jobs/:id - Delete a terminal job
/// - POST /api/jobs/:id/cancel - Request cancellation
/// - POST /api/jobs/:id/input - Resume a paused job
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_api_routes_creation() {
        let state = AppState::new();
        let _router = api_routes(state);
    }
}
