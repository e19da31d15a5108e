use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints that do not pass through an Authorization Gate. The session actions work for
/// anonymous callers too: signing out twice is a no-op and refreshing without an actor
/// simply reports no profile.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        .route("/health", get(|| async { "ok" }))
        // GET /sign-in?role=...&from=...
        // Target of the guard's redirect. Normalizes the untrusted `role` parameter.
        .route("/sign-in", get(handlers::get_sign_in))
        // POST /auth/sign-in
        .route("/auth/sign-in", post(handlers::post_sign_in))
        // GET /auth/state
        // Read-only view of the Session Store.
        .route("/auth/state", get(handlers::get_auth_state))
        // POST /auth/sign-out
        .route("/auth/sign-out", post(handlers::post_sign_out))
        // POST /auth/refresh
        // Used after an action that may have changed the caller's own provisioning.
        .route("/auth/refresh", post(handlers::post_refresh_profile))
}
