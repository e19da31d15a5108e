use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Chapter Head Router Module
///
/// Volunteer opportunities of the chapter head's own chapter.
/// `create_router` wraps this router in `guard::require_chapter_head`.
pub fn chapter_head_routes() -> Router<AppState> {
    Router::new()
        // GET /chapter-head
        .route("/chapter-head", get(handlers::get_chapter_head_dashboard))
}
