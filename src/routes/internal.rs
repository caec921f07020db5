// Internal surface: exactly the operations the turn worker and watchdog
// need, pre-shared-key authenticated. The in-process worker calls the same
// store functions directly; these routes keep an out-of-process worker
// possible.

use crate::auth::InternalKey;
use crate::db::Db;
use crate::errors::ApiError;
use crate::events::ProjectEvent;
use crate::hub::Hub;
use crate::models::*;
use crate::store;
use rocket::serde::json::Json;
use rocket::{get, patch, post, put, State};
use rusqlite::params;

/// Messages included in the whole-project tail of a context snapshot.
const RECENT_CONTEXT_LIMIT: i64 = 50;

#[get("/api/internal/projects/<project_id>/context")]
pub fn internal_context(
    db: &State<Db>,
    _key: InternalKey,
    project_id: i64,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = db.conn();
    let ctx = store::get_context(&mut conn, project_id, RECENT_CONTEXT_LIMIT)?
        .ok_or(ApiError::NotFound)?;

    let mut members: Vec<_> = ctx.members.into_values().collect();
    members.sort_by_key(|m| m.agent_id);
    let members: Vec<serde_json::Value> = members
        .into_iter()
        .map(|m| {
            serde_json::json!({
                "agentId": m.agent_id,
                "name": m.name,
                "role": m.role,
                "prompt": m.prompt,
                "model": m.model,
                "canMessageIds": m.can_message,
                "summary": m.summary,
                "messageCount": m.message_count,
            })
        })
        .collect();

    let token = ctx.token.map(|t| {
        serde_json::json!({
            "id": t.id,
            "active": t.active,
            // Still encrypted; the worker decrypts with the process key.
            "secretEnc": t.secret_enc,
        })
    });

    Ok(Json(serde_json::json!({
        "project": ctx.project,
        "members": members,
        "conversations": ctx.conversations,
        "token": token,
        "recentMessages": ctx.recent,
    })))
}

#[get("/api/internal/projects/<project_id>/pending")]
pub fn internal_pending(
    db: &State<Db>,
    _key: InternalKey,
    project_id: i64,
) -> Result<Json<Vec<Message>>, ApiError> {
    let conn = db.conn();
    Ok(Json(store::pending_queue(&conn, project_id)?))
}

/// Insert an assistant message. Publishes `new_message` but does not nudge
/// — the caller is the already-active worker.
#[post("/api/internal/messages", format = "json", data = "<body>")]
pub fn internal_create_message(
    db: &State<Db>,
    hub: &State<Hub>,
    _key: InternalKey,
    body: Json<CreateAgentMessage>,
) -> Result<Json<Message>, ApiError> {
    let mut conn = db.conn();
    let conversation_id =
        store::conversation_for_pair(&conn, body.project_id, body.sender_id, body.receiver_id)?
            .ok_or_else(|| {
                ApiError::Validation(
                    "No conversation exists for this sender/receiver pair".to_string(),
                )
            })?;

    let message = store::create_message(
        &mut conn,
        conversation_id,
        body.project_id,
        body.sender_id,
        body.receiver_id,
        body.content.trim(),
        body.kind.unwrap_or(MessageType::Assistant),
    )?;

    hub.publish(ProjectEvent::NewMessage(message.clone()));
    Ok(Json(message))
}

#[patch("/api/internal/messages/<message_id>/status", format = "json", data = "<body>")]
pub fn internal_update_message_status(
    db: &State<Db>,
    hub: &State<Hub>,
    _key: InternalKey,
    message_id: i64,
    body: Json<UpdateMessageStatus>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.status == MessageStatus::Pending {
        return Err(ApiError::Validation(
            "Messages can only transition to sent or failed".to_string(),
        ));
    }

    let conn = db.conn();
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE id = ?1",
        params![message_id],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Err(ApiError::NotFound);
    }

    match store::update_message_status(&conn, message_id, body.status)? {
        Some((conversation_id, project_id)) => {
            hub.publish(ProjectEvent::MessageUpdated {
                id: message_id,
                conversation_id,
                project_id,
                status: body.status,
            });
            Ok(Json(serde_json::json!({ "id": message_id, "status": body.status })))
        }
        None => Err(ApiError::Conflict(
            "Message is not pending".to_string(),
        )),
    }
}

#[post("/api/internal/logs", format = "json", data = "<body>")]
pub fn internal_create_log(
    db: &State<Db>,
    hub: &State<Hub>,
    _key: InternalKey,
    body: Json<CreateLog>,
) -> Result<Json<Log>, ApiError> {
    let conn = db.conn();
    let log = store::create_log(
        &conn,
        body.project_id,
        body.level,
        body.code.as_deref(),
        body.message.trim(),
    )?;
    hub.publish(ProjectEvent::log_appended(&log));
    Ok(Json(log))
}

#[put(
    "/api/internal/projects/<project_id>/summaries/<agent_id>",
    format = "json",
    data = "<body>"
)]
pub fn internal_upsert_summary(
    db: &State<Db>,
    _key: InternalKey,
    project_id: i64,
    agent_id: i64,
    body: Json<UpsertSummary>,
) -> Result<Json<AgentSummary>, ApiError> {
    let conn = db.conn();
    Ok(Json(store::upsert_summary(
        &conn,
        project_id,
        agent_id,
        body.summary.trim(),
        body.snapshot.as_deref(),
    )?))
}

#[get("/api/internal/projects/<project_id>/summaries/<agent_id>")]
pub fn internal_get_summary(
    db: &State<Db>,
    _key: InternalKey,
    project_id: i64,
    agent_id: i64,
) -> Result<Json<AgentSummary>, ApiError> {
    let conn = db.conn();
    store::get_summary(&conn, project_id, agent_id)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

#[get("/api/internal/projects/<project_id>/summaries")]
pub fn internal_list_summaries(
    db: &State<Db>,
    _key: InternalKey,
    project_id: i64,
) -> Result<Json<Vec<AgentSummary>>, ApiError> {
    let conn = db.conn();
    Ok(Json(store::list_summaries(&conn, project_id)?))
}

#[post("/api/internal/projects/<project_id>/budget/decrement")]
pub fn internal_decrement_budget(
    db: &State<Db>,
    hub: &State<Hub>,
    _key: InternalKey,
    project_id: i64,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = {
        let mut conn = db.conn();
        if store::get_project(&conn, project_id)?.is_none() {
            return Err(ApiError::NotFound);
        }
        store::decrement_budget(&mut conn, project_id)?
    };

    if let Some(ref log) = outcome.limit_log {
        hub.publish(ProjectEvent::log_appended(log));
    }
    if outcome.newly_paused {
        hub.publish(ProjectEvent::paused_changed(project_id, true));
    }
    Ok(Json(serde_json::json!({ "remaining": outcome.remaining })))
}

#[post("/api/internal/projects/<project_id>/agents/<agent_id>/count")]
pub fn internal_increment_count(
    db: &State<Db>,
    _key: InternalKey,
    project_id: i64,
    agent_id: i64,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = db.conn();
    let count = store::increment_agent_count(&conn, project_id, agent_id)?;
    Ok(Json(serde_json::json!({ "count": count })))
}

#[get("/api/internal/projects/<project_id>/flags")]
pub fn internal_flags(
    db: &State<Db>,
    _key: InternalKey,
    project_id: i64,
) -> Result<Json<ProjectFlags>, ApiError> {
    let conn = db.conn();
    store::project_flags(&conn, project_id)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

#[get("/api/internal/projects/<project_id>/agents/<agent_id>/recent?<limit>")]
pub fn internal_recent_agent_messages(
    db: &State<Db>,
    _key: InternalKey,
    project_id: i64,
    agent_id: i64,
    limit: Option<i64>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let limit = limit.unwrap_or(20).clamp(1, 200);
    let conn = db.conn();
    Ok(Json(store::recent_agent_messages(
        &conn, project_id, agent_id, limit,
    )?))
}

#[get("/api/internal/projects/active")]
pub fn internal_active_projects(
    db: &State<Db>,
    _key: InternalKey,
) -> Result<Json<Vec<i64>>, ApiError> {
    let conn = db.conn();
    Ok(Json(store::active_projects(&conn)?))
}

#[get("/api/internal/projects/<project_id>/oldest-pending")]
pub fn internal_oldest_pending(
    db: &State<Db>,
    _key: InternalKey,
    project_id: i64,
) -> Result<Json<Option<Message>>, ApiError> {
    let conn = db.conn();
    Ok(Json(store::oldest_pending(&conn, project_id)?))
}

/// Idempotent pause with a machine code (watchdog surface).
#[post("/api/internal/projects/<project_id>/pause", format = "json", data = "<body>")]
pub fn internal_pause(
    db: &State<Db>,
    hub: &State<Hub>,
    _key: InternalKey,
    project_id: i64,
    body: Json<PauseProject>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let log = {
        let mut conn = db.conn();
        if store::get_project(&conn, project_id)?.is_none() {
            return Err(ApiError::NotFound);
        }
        store::pause_project(&mut conn, project_id, &body.code, &body.message)?
    };

    if let Some(ref log) = log {
        hub.publish(ProjectEvent::log_appended(log));
        hub.publish(ProjectEvent::paused_changed(project_id, true));
    }
    Ok(Json(serde_json::json!({ "paused": true })))
}
