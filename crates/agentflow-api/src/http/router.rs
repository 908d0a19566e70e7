//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, request tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(health_check))
        // Workflow definitions
        .route(
            "/workflows",
            get(handlers::workflow::list_workflows).post(handlers::workflow::create_workflow),
        )
        .route("/workflows/validate", post(handlers::workflow::validate_workflow))
        .route(
            "/workflows/{id}",
            get(handlers::workflow::get_workflow)
                .put(handlers::workflow::publish_workflow)
                .delete(handlers::workflow::delete_workflow),
        )
        .route(
            "/workflows/{id}/activate",
            post(handlers::workflow::activate_workflow),
        )
        .route("/workflows/{id}/pause", post(handlers::workflow::pause_workflow))
        .route(
            "/workflows/{id}/archive",
            post(handlers::workflow::archive_workflow),
        )
        .route(
            "/workflows/{id}/duplicate",
            post(handlers::workflow::duplicate_workflow),
        )
        // Agent profiles
        .route(
            "/agents",
            get(handlers::agent::list_agents).post(handlers::agent::create_agent),
        )
        .route(
            "/agents/{id}",
            get(handlers::agent::get_agent)
                .put(handlers::agent::update_agent)
                .delete(handlers::agent::delete_agent),
        )
        .route("/agents/{id}/test", post(handlers::agent::test_agent))
        // Executions
        .route(
            "/executions",
            get(handlers::execution::list_executions).post(handlers::execution::create_execution),
        )
        .route("/executions/{id}", get(handlers::execution::get_execution))
        .route(
            "/executions/{id}/start",
            post(handlers::execution::start_execution),
        )
        .route(
            "/executions/{id}/cancel",
            post(handlers::execution::cancel_execution),
        )
        .route(
            "/executions/{id}/history",
            get(handlers::execution::get_history),
        )
        .route(
            "/executions/{id}/interactions",
            get(handlers::execution::list_interactions),
        )
        .route(
            "/executions/{id}/interactions/{iid}/respond",
            post(handlers::execution::respond_interaction),
        )
        .route(
            "/interactions/pending",
            get(handlers::execution::list_pending_interactions),
        )
        // Tools
        .route("/tools", get(handlers::tool::list_tools))
        .route("/tools/{name}", get(handlers::tool::get_tool))
        .route(
            "/tools/providers/{name}/models",
            get(handlers::tool::list_provider_models),
        )
        // Event stream
        .route("/ws/events", get(handlers::ws::ws_handler));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /api/v1/health - Liveness.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
