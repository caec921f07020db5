// Route module decomposition — each resource area in its own file.
// Shared ownership/demo-protection helpers live here; route functions in
// submodules.

mod agents;
mod conversations;
mod internal;
mod logs;
mod messages;
mod projects;
mod sessions;
mod settings;
mod stream;
mod system;
mod tokens;

// --- Re-exports (all route functions used by lib.rs mount) ---

pub use agents::{create_agent, list_agents};
pub use conversations::{create_conversation, list_conversations};
pub use internal::{
    internal_active_projects, internal_context, internal_create_log, internal_create_message,
    internal_decrement_budget, internal_flags, internal_get_summary, internal_increment_count,
    internal_list_summaries, internal_oldest_pending, internal_pause, internal_pending,
    internal_recent_agent_messages, internal_update_message_status, internal_upsert_summary,
};
pub use logs::{clear_logs, list_logs};
pub use messages::{list_messages, send_message};
pub use projects::{create_project, delete_project, get_project, list_projects, set_status};
pub use sessions::{login, logout, register, whoami};
pub use settings::{set_limit, set_pause, set_token};
pub use stream::live_updates;
pub use system::{
    bad_request, forbidden, health, not_found, server_error, unauthorized, unprocessable,
};
pub use tokens::{create_token, delete_token, disable_token, enable_token, list_tokens};

use crate::config::Config;
use crate::errors::ApiError;
use crate::models::Project;
use crate::store;
use rusqlite::Connection;

/// Load a project and check ownership. Not-owned is indistinguishable from
/// absent (404) so project ids cannot be probed.
pub(crate) fn project_owned(
    conn: &Connection,
    project_id: i64,
    user_id: i64,
) -> Result<Project, ApiError> {
    match store::get_project(conn, project_id)? {
        Some(project) if project.user_id == user_id => Ok(project),
        _ => Err(ApiError::NotFound),
    }
}

/// Demo and snapshot projects are read-only: every mutation path calls this
/// first.
pub(crate) fn ensure_mutable_project(config: &Config, project_id: i64) -> Result<(), ApiError> {
    if config.is_protected_project(project_id) {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}
