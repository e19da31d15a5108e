use axum::http::Uri;
use tracing::{info, warn};

use crate::{
    error::SignInError,
    models::Profile,
    profile::ProfileResolver,
    roles::Role,
};

/// SignedIn
///
/// Successful outcome of `sign_in_as`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedIn {
    pub profile: Profile,
    pub redirect_to: String,
}

/// sign_in_as
///
/// Password sign-in for one of the privileged roles.
///
/// The identity provider may accept the credentials while the actor still cannot use the
/// requested area. In that case the fresh session is signed out again so no half-authorized
/// session lingers, and the reason is returned:
/// - no profile row: `SignInError::NotProvisioned`
/// - profile role differs from `role`: `SignInError::RoleMismatch`
pub async fn sign_in_as(
    resolver: &ProfileResolver,
    email: &str,
    password: &str,
    role: Role,
    from: Option<&str>,
) -> Result<SignedIn, SignInError> {
    let identity = resolver.identity();
    let session = identity.sign_in_with_password(email, password).await?;

    let actor = session.actor();
    let profile = match resolver.resolve_profile(actor.id).await {
        Ok(profile) => profile,
        Err(e) => {
            revoke(resolver).await;
            return Err(e.into());
        }
    };

    let Some(profile) = profile else {
        revoke(resolver).await;
        info!(actor_id = %actor.id, "sign-in refused: not provisioned");
        return Err(SignInError::NotProvisioned);
    };

    if profile.role != role {
        revoke(resolver).await;
        info!(actor_id = %actor.id, actual = %profile.role, requested = %role, "sign-in refused: role mismatch");
        return Err(SignInError::RoleMismatch {
            actual: profile.role,
            requested: role,
        });
    }

    Ok(SignedIn {
        redirect_to: redirect_after_sign_in(from, role),
        profile,
    })
}

async fn revoke(resolver: &ProfileResolver) {
    if let Err(e) = resolver.identity().sign_out().await {
        warn!(error = %e, "failed to revoke session after refused sign-in");
    }
}

/// redirect_after_sign_in
///
/// `from` (the path the guard bounced) when present, otherwise the role's dashboard,
/// tagged with `signed_in=1` so the destination can greet the user.
pub fn redirect_after_sign_in(from: Option<&str>, role: Role) -> String {
    let target = from
        .filter(|path| is_local_path(path))
        .unwrap_or_else(|| role.dashboard_path());
    let separator = if target.contains('?') { '&' } else { '?' };
    format!("{target}{separator}signed_in=1")
}

// Only same-origin absolute paths. Browsers read `\` as `/` and drop tabs and newlines,
// so "/\\host" or "/\t/host" would turn into "//host" and leave the portal.
fn is_local_path(path: &str) -> bool {
    if !path.starts_with('/') || path.chars().any(|c| c == '\\' || c.is_control()) {
        return false;
    }
    if path.starts_with("//") {
        return false;
    }
    path.parse::<Uri>()
        .is_ok_and(|uri| uri.scheme().is_none() && uri.authority().is_none())
}
