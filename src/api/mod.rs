mod handlers;

pub use handlers::{
    AddSubTaskInput, CreateMapInput, CreateNodeInput, NodeInfo, QuickDateInput, SetDueDateInput,
};

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::workspace::Workspace;

pub fn create_router(workspace: Workspace) -> Router {
    let api = Router::new()
        // Tasks
        .route("/tasks", get(handlers::list_tasks))
        .route("/tasks/pending", get(handlers::list_pending_tasks))
        .route("/tasks/completed", get(handlers::list_completed_tasks))
        .route("/tasks/buckets", get(handlers::bucket_counts))
        // Maps
        .route("/trees", get(handlers::list_trees))
        .route("/trees", post(handlers::create_tree))
        .route("/trees/{id}", get(handlers::get_tree))
        .route("/trees/{id}", delete(handlers::delete_tree))
        .route("/trees/{id}/stats", get(handlers::get_sync_stats))
        // Nodes
        .route("/trees/{id}/nodes", post(handlers::create_node))
        .route("/trees/{id}/nodes/{node}", delete(handlers::delete_node))
        .route("/trees/{id}/nodes/{node}/subtasks", post(handlers::add_sub_task))
        // Due dates and completion, all written through node attributes
        .route("/trees/{id}/nodes/{node}/due-date", put(handlers::set_due_date))
        .route("/trees/{id}/nodes/{node}/due-date", delete(handlers::clear_due_date))
        .route("/trees/{id}/nodes/{node}/due-date/quick", post(handlers::quick_due_date))
        .route("/trees/{id}/nodes/{node}/complete", post(handlers::complete_task))
        .route("/trees/{id}/nodes/{node}/reopen", post(handlers::reopen_task))
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(workspace)
}
