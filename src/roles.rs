use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;
use utoipa::ToSchema;

/// Role
///
/// The closed set of authorization labels recognized by the portal.
/// A `Profile` carries exactly one of these, and every privileged route declares
/// exactly one as its requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Role {
    /// Manages programs, chapters, opportunities and site settings.
    Admin,
    /// Manages volunteer opportunities for a single chapter.
    ChapterHead,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Admin, Role::ChapterHead];

    /// The wire identifier, as stored in `profiles.role` and used in query strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::ChapterHead => "chapter_head",
        }
    }

    /// Human readable label used in sign-in prompts and error panels.
    pub fn label(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::ChapterHead => "Chapter Head",
        }
    }

    /// The protected area owned by this role.
    pub fn dashboard_path(&self) -> &'static str {
        match self {
            Role::Admin => "/admin",
            Role::ChapterHead => "/chapter-head",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// normalize_role
///
/// Maps untrusted input (typically the `role` query parameter) to a valid `Role`.
/// Exact, case-sensitive match only: `"Admin"`, `" admin"` or an empty string all yield `None`.
pub fn normalize_role(input: Option<&str>) -> Option<Role> {
    match input? {
        "admin" => Some(Role::Admin),
        "chapter_head" => Some(Role::ChapterHead),
        _ => None,
    }
}
