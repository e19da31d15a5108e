/// Router Module Index
///
/// Routes are split by who may reach them. The guard for each protected module is applied
/// as a route layer in `create_router`, so a handler in `admin` or `chapter_head` only runs
/// after the Authorization Gate returned `Allow` for that module's role.

/// Routes reachable by anyone: health, sign-in, session state and session actions.
pub mod public;

/// The admin area. Requires `Role::Admin`.
pub mod admin;

/// The chapter head area. Requires `Role::ChapterHead`.
pub mod chapter_head;
