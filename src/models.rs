use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::roles::Role;

// --- Identity (mirrored from the external identity provider) ---

/// Actor
///
/// The authenticated identity derived 1:1 from a non-null `Session`.
/// Carries no authorization information; that lives on `Profile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Actor {
    // Same identifier space as `profiles.id`.
    pub id: Uuid,
    pub email: String,
}

/// Session
///
/// Opaque, time-bounded proof of authentication issued by the identity provider.
/// The Session Store mirrors it and never mutates it.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub user: Actor,
}

impl Session {
    pub fn actor(&self) -> &Actor {
        &self.user
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

// Tokens never reach log output.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Profile
///
/// The secondary, role-bearing record in the `profiles` table. An actor may
/// authenticate successfully and still have no profile ("not provisioned").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Profile {
    pub id: Uuid,
    pub role: Role,
    pub chapter_id: Option<Uuid>,
    #[ts(type = "string | null")]
    pub created_at: Option<DateTime<Utc>>,
}

// --- Session Store state ---

/// AuthState
///
/// The single belief about the current actor. Owned and written exclusively by the
/// Session Store; everything else observes snapshots of it.
///
/// Invariants maintained by the store:
/// - `actor.is_some() == session.is_some()`
/// - `profile.is_some()` implies `profile.id == actor.id`
/// - `loading` goes from `true` to `false` once and never back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    pub session: Option<Session>,
    pub actor: Option<Actor>,
    pub profile: Option<Profile>,
    pub loading: bool,
}

impl AuthState {
    /// State at process start, before either initialization path has reported.
    pub fn initial() -> Self {
        Self {
            session: None,
            actor: None,
            profile: None,
            loading: true,
        }
    }

    /// Settled, signed-out state.
    pub fn anonymous() -> Self {
        Self {
            loading: false,
            ..Self::initial()
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.profile.as_ref().map(|p| p.role)
    }

    pub fn is_authenticated(&self) -> bool {
        self.actor.is_some()
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::initial()
    }
}

// --- Output Schemas ---

/// AuthSnapshot
///
/// Token-free view of `AuthState` served to consumers (GET /auth/state).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AuthSnapshot {
    pub loading: bool,
    pub authenticated: bool,
    pub actor: Option<Actor>,
    pub profile: Option<Profile>,
    pub role: Option<Role>,
    #[ts(type = "string | null")]
    pub session_expires_at: Option<DateTime<Utc>>,
}

impl From<&AuthState> for AuthSnapshot {
    fn from(state: &AuthState) -> Self {
        Self {
            loading: state.loading,
            authenticated: state.is_authenticated(),
            actor: state.actor.clone(),
            profile: state.profile.clone(),
            role: state.role(),
            session_expires_at: state.session.as_ref().map(|s| s.expires_at),
        }
    }
}

/// Which panel the gate rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum GatePanelKind {
    Pending,
    NotProvisioned,
    Restricted,
}

/// GatePanel
///
/// Body rendered in place of protected content when the Authorization Gate does not allow
/// the request (loading placeholder, not provisioned, restricted).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct GatePanel {
    pub kind: GatePanelKind,
    pub title: String,
    pub message: String,
}

/// DashboardSummary
///
/// Entry payload for a protected area. The CRUD screens behind each section are served
/// by the data backend directly.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DashboardSummary {
    pub role: Role,
    pub email: String,
    pub chapter_id: Option<Uuid>,
    pub sections: Vec<String>,
}

// --- Request Payloads ---

/// SignInPrompt
///
/// Describes the sign-in entry point after normalizing the `role` and `from` query
/// parameters written by the route guard.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SignInPrompt {
    pub role: Role,
    // Submit label, e.g. "Sign in as Chapter Head".
    pub action: String,
    pub from: Option<String>,
    pub roles: Vec<Role>,
}

/// SignInRequest
///
/// Input payload for POST /auth/sign-in. `role` is untrusted and normalized server-side.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
    pub role: Option<String>,
    pub from: Option<String>,
}

/// SignInResponse
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SignInResponse {
    pub profile: Profile,
    pub redirect_to: String,
}
