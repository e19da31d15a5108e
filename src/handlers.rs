use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::time::Duration;
use utoipa::IntoParams;

use crate::{
    error::{AuthError, SignInError},
    models::{
        Actor, AuthSnapshot, DashboardSummary, Profile, SignInPrompt, SignInRequest,
        SignInResponse,
    },
    profile::ProfileResolver,
    roles::{Role, normalize_role},
    session::SessionStore,
    sign_in::sign_in_as,
};

// How long a sign-in response waits for the Session Store to pick up the new actor.
const SIGN_IN_SETTLE: Duration = Duration::from_secs(5);

/// Query parameters written by the route guard's sign-in redirect.
#[derive(Debug, Deserialize, IntoParams)]
pub struct SignInQuery {
    pub role: Option<String>,
    pub from: Option<String>,
}

/// get_sign_in
///
/// [Public Route] Describes the sign-in entry point. An unknown or missing `role`
/// falls back to chapter head.
#[utoipa::path(
    get,
    path = "/sign-in",
    params(SignInQuery),
    responses((status = 200, description = "Sign-in prompt", body = SignInPrompt))
)]
pub async fn get_sign_in(Query(query): Query<SignInQuery>) -> Json<SignInPrompt> {
    let role = normalize_role(query.role.as_deref()).unwrap_or(Role::ChapterHead);
    Json(SignInPrompt {
        role,
        action: format!("Sign in as {}", role.label()),
        from: query.from,
        roles: Role::ALL.to_vec(),
    })
}

/// post_sign_in
///
/// [Public Route] Password sign-in for a privileged role.
///
/// *Flow*: authenticates with the identity provider, checks provisioning and role, then
/// waits briefly for the Session Store to settle on the new actor so the returned
/// `redirect_to` passes the route guard.
#[utoipa::path(
    post,
    path = "/auth/sign-in",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in", body = SignInResponse),
        (status = 401, description = "Credentials rejected"),
        (status = 403, description = "Not provisioned or role mismatch")
    )
)]
pub async fn post_sign_in(
    State(resolver): State<ProfileResolver>,
    State(session): State<SessionStore>,
    Json(payload): Json<SignInRequest>,
) -> Result<Json<SignInResponse>, SignInError> {
    let role = normalize_role(payload.role.as_deref()).unwrap_or(Role::ChapterHead);

    let signed_in = sign_in_as(
        &resolver,
        &payload.email,
        &payload.password,
        role,
        payload.from.as_deref(),
    )
    .await?;

    if session
        .settled_for(signed_in.profile.id, SIGN_IN_SETTLE)
        .await
        .is_none()
    {
        tracing::warn!(actor_id = %signed_in.profile.id, "session store did not settle after sign-in");
    }

    Ok(Json(SignInResponse {
        profile: signed_in.profile,
        redirect_to: signed_in.redirect_to,
    }))
}

/// get_auth_state
///
/// [Public Route] Token-free snapshot of the current session.
#[utoipa::path(
    get,
    path = "/auth/state",
    responses((status = 200, description = "Current auth state", body = AuthSnapshot))
)]
pub async fn get_auth_state(State(session): State<SessionStore>) -> Json<AuthSnapshot> {
    Json(AuthSnapshot::from(&session.snapshot()))
}

/// post_sign_out
///
/// [Public Route] Signs out. Safe to call when already signed out.
#[utoipa::path(
    post,
    path = "/auth/sign-out",
    responses(
        (status = 204, description = "Signed out"),
        (status = 502, description = "Identity provider fault (local session still cleared)")
    )
)]
pub async fn post_sign_out(State(session): State<SessionStore>) -> Result<StatusCode, AuthError> {
    session.sign_out().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// post_refresh_profile
///
/// [Public Route] Re-resolves the current actor's profile, e.g. after an admin provisioned it.
/// A backend fault is reported as 502, distinct from a 200 with `profile: null`.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "Refreshed auth state", body = AuthSnapshot),
        (status = 502, description = "Identity or profile store fault")
    )
)]
pub async fn post_refresh_profile(
    State(session): State<SessionStore>,
) -> Result<Json<AuthSnapshot>, AuthError> {
    session.refresh_profile().await?;
    Ok(Json(AuthSnapshot::from(&session.snapshot())))
}

/// get_admin_dashboard
///
/// [Admin Route] Entry point of the admin area.
#[utoipa::path(
    get,
    path = "/admin",
    responses(
        (status = 200, description = "Admin dashboard", body = DashboardSummary),
        (status = 303, description = "Redirect to sign-in"),
        (status = 403, description = "Not provisioned or restricted", body = crate::models::GatePanel),
        (status = 503, description = "Session still loading", body = crate::models::GatePanel)
    )
)]
pub async fn get_admin_dashboard(
    Extension(actor): Extension<Actor>,
    Extension(profile): Extension<Profile>,
) -> Json<DashboardSummary> {
    Json(DashboardSummary {
        role: profile.role,
        email: actor.email,
        chapter_id: profile.chapter_id,
        sections: ["programs", "chapters", "volunteer-opportunities", "site-settings"]
            .into_iter()
            .map(String::from)
            .collect(),
    })
}

/// get_chapter_head_dashboard
///
/// [Chapter Head Route] Entry point of the chapter head area, scoped to the profile's chapter.
#[utoipa::path(
    get,
    path = "/chapter-head",
    responses(
        (status = 200, description = "Chapter head dashboard", body = DashboardSummary),
        (status = 303, description = "Redirect to sign-in"),
        (status = 403, description = "Not provisioned or restricted", body = crate::models::GatePanel),
        (status = 503, description = "Session still loading", body = crate::models::GatePanel)
    )
)]
pub async fn get_chapter_head_dashboard(
    Extension(actor): Extension<Actor>,
    Extension(profile): Extension<Profile>,
) -> Json<DashboardSummary> {
    let sections = match profile.chapter_id {
        Some(_) => vec!["volunteer-opportunities".to_string()],
        // Nothing to manage until an admin assigns a chapter.
        None => Vec::new(),
    };
    Json(DashboardSummary {
        role: profile.role,
        email: actor.email,
        chapter_id: profile.chapter_id,
        sections,
    })
}
