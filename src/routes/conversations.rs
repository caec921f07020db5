use crate::auth::AuthedUser;
use crate::config::Config;
use crate::db::{Db, SYSTEM_AGENT_ID};
use crate::errors::ApiError;
use crate::models::*;
use crate::store;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use rusqlite::params;

use super::{ensure_mutable_project, project_owned};

#[get("/api/conversations/<project_id>")]
pub fn list_conversations(
    db: &State<Db>,
    user: AuthedUser,
    project_id: i64,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let conn = db.conn();
    project_owned(&conn, project_id, user.0.id)?;

    let mut stmt = conn.prepare(
        "SELECT id, project_id, sender_id, receiver_id, created_at
         FROM conversations WHERE project_id = ?1 ORDER BY id ASC",
    )?;
    let conversations = stmt
        .query_map(params![project_id], |row| {
            Ok(Conversation {
                id: row.get(0)?,
                project_id: row.get(1)?,
                sender_id: row.get(2)?,
                receiver_id: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Json(conversations))
}

/// User-initiated conversation creation: the user acts as the System agent,
/// so the pair is always (System, receiver).
#[post("/api/conversations/<project_id>", format = "json", data = "<body>")]
pub fn create_conversation(
    db: &State<Db>,
    config: &State<Config>,
    user: AuthedUser,
    project_id: i64,
    body: Json<CreateConversation>,
) -> Result<Json<Conversation>, ApiError> {
    ensure_mutable_project(config, project_id)?;
    let conn = db.conn();
    project_owned(&conn, project_id, user.0.id)?;

    let receiver_id = body.receiver_id;
    let is_member: i64 = conn.query_row(
        "SELECT COUNT(*) FROM project_agents WHERE project_id = ?1 AND agent_id = ?2",
        params![project_id, receiver_id],
        |row| row.get(0),
    )?;
    if is_member == 0 {
        return Err(ApiError::Validation(
            "Receiver is not a member of this project".to_string(),
        ));
    }

    if store::conversation_for_pair(&conn, project_id, SYSTEM_AGENT_ID, receiver_id)?.is_some() {
        return Err(ApiError::Conflict(
            "A conversation with this agent already exists".to_string(),
        ));
    }

    let created_at = store::now();
    conn.execute(
        "INSERT INTO conversations (project_id, sender_id, receiver_id, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![project_id, SYSTEM_AGENT_ID, receiver_id, created_at],
    )?;

    Ok(Json(Conversation {
        id: conn.last_insert_rowid(),
        project_id,
        sender_id: SYSTEM_AGENT_ID,
        receiver_id,
        created_at,
    }))
}
