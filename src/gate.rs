use crate::{models::AuthState, roles::Role};

/// Path of the sign-in entry point that unauthenticated requests are sent to.
pub const SIGN_IN_PATH: &str = "/sign-in";

/// Decision
///
/// Outcome of the Authorization Gate for one (required role, state) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Initialization has not settled yet: show a neutral placeholder.
    Pending,
    /// No actor: redirect to sign-in, carrying the required role and return path.
    DenyUnauthenticated,
    /// Actor without a profile row: explain, never redirect.
    DenyUnprovisioned,
    /// Profile role differs from the required role.
    DenyWrongRole { actual: Role, required: Role },
    Allow,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// authorize
///
/// Pure decision function over an immutable snapshot. The checks run in a fixed order
/// (loading, actor, profile, role), so a settled state never yields `Pending`.
pub fn authorize(required: Role, state: &AuthState) -> Decision {
    if state.loading {
        return Decision::Pending;
    }
    if state.actor.is_none() {
        return Decision::DenyUnauthenticated;
    }
    match &state.profile {
        None => Decision::DenyUnprovisioned,
        Some(profile) if profile.role != required => Decision::DenyWrongRole {
            actual: profile.role,
            required,
        },
        Some(_) => Decision::Allow,
    }
}

/// sign_in_redirect
///
/// Location for a `DenyUnauthenticated` decision, e.g.
/// `/sign-in?role=admin&from=%2Fadmin`.
pub fn sign_in_redirect(required: Role, from_path: &str) -> String {
    format!(
        "{SIGN_IN_PATH}?role={}&from={}",
        required.as_str(),
        urlencoding::encode(from_path)
    )
}
