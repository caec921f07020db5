use crate::auth::AuthedUser;
use crate::config::Config;
use crate::db::{Db, SYSTEM_AGENT_ID};
use crate::errors::ApiError;
use crate::events::ProjectEvent;
use crate::hub::Hub;
use crate::models::*;
use crate::store;
use crate::worker::Worker;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

use super::{ensure_mutable_project, project_owned};

fn conversation_by_id(
    conn: &Connection,
    conversation_id: i64,
) -> Result<Conversation, ApiError> {
    conn.query_row(
        "SELECT id, project_id, sender_id, receiver_id, created_at
         FROM conversations WHERE id = ?1",
        params![conversation_id],
        |row| {
            Ok(Conversation {
                id: row.get(0)?,
                project_id: row.get(1)?,
                sender_id: row.get(2)?,
                receiver_id: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or(ApiError::NotFound)
}

#[get("/api/messages/<conversation_id>")]
pub fn list_messages(
    db: &State<Db>,
    user: AuthedUser,
    conversation_id: i64,
) -> Result<Json<Vec<Message>>, ApiError> {
    let conn = db.conn();
    let conversation = conversation_by_id(&conn, conversation_id)?;
    project_owned(&conn, conversation.project_id, user.0.id)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC, id ASC",
        store::MESSAGE_COLUMNS
    ))?;
    let messages = stmt
        .query_map(params![conversation_id], store::message_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Json(messages))
}

/// User send: attributed to the System agent; the receiver is the
/// non-System member of the conversation. The row lands `pending` and the
/// worker is nudged — on a paused project it simply stays pending until
/// the project resumes.
#[post("/api/messages/<conversation_id>", format = "json", data = "<body>")]
pub fn send_message(
    db: &State<Db>,
    config: &State<Config>,
    hub: &State<Hub>,
    worker: &State<Arc<Worker>>,
    user: AuthedUser,
    conversation_id: i64,
    body: Json<SendMessage>,
) -> Result<Json<Message>, ApiError> {
    let content = body.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::Validation(
            "Message content must not be empty".to_string(),
        ));
    }
    if content.len() > config.max_message_length {
        return Err(ApiError::Validation(format!(
            "Message content exceeds the {} character limit",
            config.max_message_length
        )));
    }
    let kind = body.kind.unwrap_or(MessageType::User);
    if !matches!(kind, MessageType::User | MessageType::System) {
        return Err(ApiError::Validation(
            "Message type must be user or system".to_string(),
        ));
    }

    let message = {
        let mut conn = db.conn();
        let conversation = conversation_by_id(&conn, conversation_id)?;
        ensure_mutable_project(config, conversation.project_id)?;
        project_owned(&conn, conversation.project_id, user.0.id)?;

        let receiver_id = if conversation.sender_id != SYSTEM_AGENT_ID {
            conversation.sender_id
        } else {
            conversation.receiver_id
        };

        store::create_message(
            &mut conn,
            conversation_id,
            conversation.project_id,
            SYSTEM_AGENT_ID,
            receiver_id,
            &content,
            kind,
        )?
    };

    hub.publish(ProjectEvent::NewMessage(message.clone()));
    worker.nudge(message.project_id);
    Ok(Json(message))
}
