use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Admin Router Module
///
/// The admin area: programs, chapters, volunteer opportunities and site settings.
/// `create_router` wraps this router in `guard::require_admin`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin
        .route("/admin", get(handlers::get_admin_dashboard))
}
