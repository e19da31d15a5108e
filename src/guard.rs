use axum::{
    Json,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::{
    gate::{Decision, authorize, sign_in_redirect},
    models::{GatePanel, GatePanelKind},
    roles::Role,
    session::SessionStore,
};

/// require_admin
///
/// Route guard for the admin area.
pub async fn require_admin(
    State(session): State<SessionStore>,
    request: Request,
    next: Next,
) -> Response {
    enforce(Role::Admin, &session, request, next).await
}

/// require_chapter_head
///
/// Route guard for the chapter head area.
pub async fn require_chapter_head(
    State(session): State<SessionStore>,
    request: Request,
    next: Next,
) -> Response {
    enforce(Role::ChapterHead, &session, request, next).await
}

/// enforce
///
/// Turns an Authorization Gate decision into a response. On `Allow` the request continues
/// with the `Actor` and `Profile` of the snapshot the decision was made on attached as
/// extensions, so handlers never re-read a newer state than the one that was authorized.
async fn enforce(required: Role, session: &SessionStore, mut request: Request, next: Next) -> Response {
    let state = session.snapshot();
    let decision = authorize(required, &state);

    match decision {
        Decision::Allow => {
            if let (Some(actor), Some(profile)) = (state.actor, state.profile) {
                request.extensions_mut().insert(actor);
                request.extensions_mut().insert(profile);
            }
            next.run(request).await
        }
        Decision::Pending => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, "1")],
            Json(pending_panel()),
        )
            .into_response(),
        Decision::DenyUnauthenticated => {
            let from = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or_else(|| required.dashboard_path());
            tracing::debug!(%required, from, "unauthenticated request redirected to sign-in");
            Redirect::to(&sign_in_redirect(required, from)).into_response()
        }
        Decision::DenyUnprovisioned => {
            tracing::info!(%required, "access denied: not provisioned");
            (StatusCode::FORBIDDEN, Json(not_provisioned_panel())).into_response()
        }
        Decision::DenyWrongRole { actual, required } => {
            tracing::info!(%required, %actual, "access denied: wrong role");
            (StatusCode::FORBIDDEN, Json(restricted_panel(actual, required))).into_response()
        }
    }
}

pub fn pending_panel() -> GatePanel {
    GatePanel {
        kind: GatePanelKind::Pending,
        title: "Loading".to_string(),
        message: "Checking your session.".to_string(),
    }
}

pub fn not_provisioned_panel() -> GatePanel {
    GatePanel {
        kind: GatePanelKind::NotProvisioned,
        title: "Access not provisioned".to_string(),
        message: "Your account exists, but it hasn't been assigned a role yet. Ask the admin to create your profile record in the database.".to_string(),
    }
}

pub fn restricted_panel(actual: Role, required: Role) -> GatePanel {
    GatePanel {
        kind: GatePanelKind::Restricted,
        title: "Restricted".to_string(),
        message: format!("You're signed in as {actual} but tried to access {required} routes."),
    }
}
