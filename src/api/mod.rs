mod handlers;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::tracker::Tracker;

pub fn create_router(tracker: Tracker) -> Router {
    let api = Router::new()
        // Projects
        .route(
            "/projects",
            get(handlers::list_projects).post(handlers::ingest_checklist),
        )
        .route(
            "/projects/{id}",
            get(handlers::get_project).delete(handlers::delete_project),
        )
        .route("/projects/{id}/status", get(handlers::get_project_status))
        .route("/projects/{id}/dashboard", get(handlers::get_dashboard))
        .route("/projects/{id}/items", get(handlers::list_items))
        .route("/projects/{id}/run", post(handlers::run_project))
        .route("/projects/{id}/cancel", post(handlers::cancel_project))
        // Template pool and context store
        .route(
            "/projects/{id}/templates",
            get(handlers::list_templates).post(handlers::register_template),
        )
        .route(
            "/projects/{id}/context",
            get(handlers::list_context).post(handlers::ingest_context),
        )
        // Items
        .route("/items/{id}", get(handlers::get_item))
        .route("/items/{id}/transitions", get(handlers::list_transitions))
        .route("/items/{id}/artifacts", get(handlers::list_artifacts))
        .route("/items/{id}/retry", post(handlers::retry_item))
        .route("/items/{id}/template", post(handlers::override_template))
        .route("/items/{id}/regenerate", post(handlers::regenerate_item))
        .route("/items/{id}/fields/{field}", put(handlers::supply_field))
        // Artifacts
        .route("/artifacts/{id}", get(handlers::get_artifact))
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(tracker)
}
