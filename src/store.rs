// Shared persistence operations: everything the turn worker and the
// internal API surface need. Request-route CRUD that is not shared lives
// inline in the route modules.

use crate::models::*;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

pub fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn message_from_row(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let kind: String = row.get(6)?;
    let status: String = row.get(7)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        project_id: row.get(2)?,
        sender_id: row.get(3)?,
        receiver_id: row.get(4)?,
        content: row.get(5)?,
        kind: MessageType::parse(&kind).unwrap_or(MessageType::User),
        status: MessageStatus::parse(&status).unwrap_or(MessageStatus::Pending),
        created_at: row.get(8)?,
    })
}

pub const MESSAGE_COLUMNS: &str =
    "id, conversation_id, project_id, sender_id, receiver_id, content, type, status, created_at";

fn summary_from_row(row: &rusqlite::Row) -> rusqlite::Result<AgentSummary> {
    Ok(AgentSummary {
        project_id: row.get(0)?,
        agent_id: row.get(1)?,
        summary: row.get(2)?,
        snapshot: row.get(3)?,
        message_count: row.get(4)?,
        summary_count: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub fn project_from_row(row: &rusqlite::Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        system_prompt: row.get(4)?,
        paused: row.get::<_, i64>(5)? != 0,
        message_limit: row.get(6)?,
        token_id: row.get(7)?,
        created_at: row.get(8)?,
        last_activity_at: row.get(9)?,
    })
}

pub const PROJECT_COLUMNS: &str = "id, user_id, title, description, system_prompt, paused, \
     message_limit, token_id, created_at, last_activity_at";

pub fn get_project(conn: &Connection, project_id: i64) -> rusqlite::Result<Option<Project>> {
    conn.query_row(
        &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
        params![project_id],
        project_from_row,
    )
    .optional()
}

// --- Context snapshot ---

#[derive(Debug, Clone)]
pub struct MemberContext {
    pub agent_id: i64,
    pub name: String,
    /// Role after applying the per-project override.
    pub role: String,
    /// Base prompt after applying the per-project override.
    pub prompt: String,
    pub model: String,
    pub can_message: Vec<i64>,
    pub summary: Option<String>,
    pub message_count: i64,
}

#[derive(Debug, Clone)]
pub struct TokenContext {
    pub id: i64,
    pub secret_enc: String,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub project: Project,
    pub members: HashMap<i64, MemberContext>,
    pub conversations: Vec<Conversation>,
    pub token: Option<TokenContext>,
    /// Last messages across the whole project, oldest first.
    pub recent: Vec<Message>,
}

/// Read-consistent snapshot of everything a run needs: one transaction.
pub fn get_context(
    conn: &mut Connection,
    project_id: i64,
    recent_limit: i64,
) -> rusqlite::Result<Option<ProjectContext>> {
    let tx = conn.transaction()?;

    let Some(project) = tx
        .query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
            params![project_id],
            project_from_row,
        )
        .optional()?
    else {
        return Ok(None);
    };

    let token = match project.token_id {
        Some(token_id) => tx
            .query_row(
                "SELECT id, secret_enc, active FROM tokens WHERE id = ?1",
                params![token_id],
                |row| {
                    Ok(TokenContext {
                        id: row.get(0)?,
                        secret_enc: row.get(1)?,
                        active: row.get::<_, i64>(2)? != 0,
                    })
                },
            )
            .optional()?,
        None => None,
    };

    let mut members = HashMap::new();
    {
        let mut stmt = tx.prepare(
            "SELECT a.id, a.name, COALESCE(pa.role, a.role), COALESCE(pa.prompt, a.description),
                    a.model, pa.can_message,
                    s.summary, COALESCE(s.message_count, 0)
             FROM project_agents pa
             JOIN agents a ON a.id = pa.agent_id
             LEFT JOIN agent_summaries s
                    ON s.project_id = pa.project_id AND s.agent_id = pa.agent_id
             WHERE pa.project_id = ?1",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            let can_message_raw: String = row.get(5)?;
            let summary: Option<String> = row.get(6)?;
            Ok(MemberContext {
                agent_id: row.get(0)?,
                name: row.get(1)?,
                role: row.get(2)?,
                prompt: row.get(3)?,
                model: row.get(4)?,
                can_message: serde_json::from_str(&can_message_raw).unwrap_or_default(),
                summary: summary.filter(|s| !s.is_empty()),
                message_count: row.get(7)?,
            })
        })?;
        for member in rows {
            let member = member?;
            members.insert(member.agent_id, member);
        }
    }

    let conversations = {
        let mut stmt = tx.prepare(
            "SELECT id, project_id, sender_id, receiver_id, created_at
             FROM conversations WHERE project_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok(Conversation {
                id: row.get(0)?,
                project_id: row.get(1)?,
                sender_id: row.get(2)?,
                receiver_id: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut recent = {
        let mut stmt = tx.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE project_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![project_id, recent_limit], message_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    recent.reverse();

    tx.commit()?;
    Ok(Some(ProjectContext {
        project,
        members,
        conversations,
        token,
        recent,
    }))
}

// --- Pending queue ---

/// All pending messages for a project, oldest first (created_at, then id).
pub fn pending_queue(conn: &Connection, project_id: i64) -> rusqlite::Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE project_id = ?1 AND status = 'pending'
         ORDER BY created_at ASC, id ASC"
    ))?;
    let rows = stmt.query_map(params![project_id], message_from_row)?;
    rows.collect()
}

pub fn oldest_pending(conn: &Connection, project_id: i64) -> rusqlite::Result<Option<Message>> {
    conn.query_row(
        &format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE project_id = ?1 AND status = 'pending'
             ORDER BY created_at ASC, id ASC LIMIT 1"
        ),
        params![project_id],
        message_from_row,
    )
    .optional()
}

// --- Message writes ---

/// Insert a message and bump the project's last_activity_at in one
/// transaction. Returns the stored row.
pub fn create_message(
    conn: &mut Connection,
    conversation_id: i64,
    project_id: i64,
    sender_id: i64,
    receiver_id: i64,
    content: &str,
    kind: MessageType,
) -> rusqlite::Result<Message> {
    let tx = conn.transaction()?;
    let created_at = now();
    tx.execute(
        "INSERT INTO messages (conversation_id, project_id, sender_id, receiver_id, content, type, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
        params![conversation_id, project_id, sender_id, receiver_id, content, kind.as_str(), created_at],
    )?;
    let id = tx.last_insert_rowid();
    tx.execute(
        "UPDATE projects SET last_activity_at = ?1 WHERE id = ?2",
        params![created_at, project_id],
    )?;
    tx.commit()?;

    Ok(Message {
        id,
        conversation_id,
        project_id,
        sender_id,
        receiver_id,
        content: content.to_string(),
        kind,
        status: MessageStatus::Pending,
        created_at,
    })
}

/// Transition a pending message to sent/failed. Returns the message's
/// (conversation_id, project_id) when a row actually changed.
pub fn update_message_status(
    conn: &Connection,
    message_id: i64,
    status: MessageStatus,
) -> rusqlite::Result<Option<(i64, i64)>> {
    let changed = conn.execute(
        "UPDATE messages SET status = ?1 WHERE id = ?2 AND status = 'pending'",
        params![status.as_str(), message_id],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    conn.query_row(
        "SELECT conversation_id, project_id FROM messages WHERE id = ?1",
        params![message_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

pub fn conversation_for_pair(
    conn: &Connection,
    project_id: i64,
    a: i64,
    b: i64,
) -> rusqlite::Result<Option<i64>> {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    conn.query_row(
        "SELECT id FROM conversations WHERE project_id = ?1 AND sender_id = ?2 AND receiver_id = ?3",
        params![project_id, low, high],
        |row| row.get(0),
    )
    .optional()
}

// --- Logs ---

pub fn create_log(
    conn: &Connection,
    project_id: i64,
    level: LogLevel,
    code: Option<&str>,
    message: &str,
) -> rusqlite::Result<Log> {
    let created_at = now();
    conn.execute(
        "INSERT INTO logs (project_id, level, code, message, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![project_id, level.as_str(), code, message, created_at],
    )?;
    Ok(Log {
        id: conn.last_insert_rowid(),
        project_id,
        level,
        code: code.map(String::from),
        message: message.to_string(),
        created_at,
    })
}

// --- Agent memory summaries ---

/// Replace an agent's summary: zero the message counter, increment the
/// summary counter, refresh updated_at.
pub fn upsert_summary(
    conn: &Connection,
    project_id: i64,
    agent_id: i64,
    summary: &str,
    snapshot: Option<&str>,
) -> rusqlite::Result<AgentSummary> {
    conn.execute(
        "INSERT INTO agent_summaries (project_id, agent_id, summary, snapshot, message_count, summary_count, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, 1, ?5)
         ON CONFLICT(project_id, agent_id) DO UPDATE SET
            summary = excluded.summary,
            snapshot = excluded.snapshot,
            message_count = 0,
            summary_count = agent_summaries.summary_count + 1,
            updated_at = excluded.updated_at",
        params![project_id, agent_id, summary, snapshot, now()],
    )?;
    get_summary(conn, project_id, agent_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn get_summary(
    conn: &Connection,
    project_id: i64,
    agent_id: i64,
) -> rusqlite::Result<Option<AgentSummary>> {
    conn.query_row(
        "SELECT project_id, agent_id, summary, snapshot, message_count, summary_count, updated_at
         FROM agent_summaries WHERE project_id = ?1 AND agent_id = ?2",
        params![project_id, agent_id],
        summary_from_row,
    )
    .optional()
}

pub fn list_summaries(conn: &Connection, project_id: i64) -> rusqlite::Result<Vec<AgentSummary>> {
    let mut stmt = conn.prepare(
        "SELECT project_id, agent_id, summary, snapshot, message_count, summary_count, updated_at
         FROM agent_summaries WHERE project_id = ?1 ORDER BY agent_id ASC",
    )?;
    let rows = stmt.query_map(params![project_id], summary_from_row)?;
    rows.collect()
}

/// Bump an agent's per-project message counter (upserting the memory row)
/// and return the new count.
pub fn increment_agent_count(
    conn: &Connection,
    project_id: i64,
    agent_id: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO agent_summaries (project_id, agent_id, summary, snapshot, message_count, summary_count, updated_at)
         VALUES (?1, ?2, '', NULL, 1, 0, ?3)
         ON CONFLICT(project_id, agent_id) DO UPDATE SET
            message_count = agent_summaries.message_count + 1,
            updated_at = excluded.updated_at",
        params![project_id, agent_id, now()],
    )?;
    conn.query_row(
        "SELECT message_count FROM agent_summaries WHERE project_id = ?1 AND agent_id = ?2",
        params![project_id, agent_id],
        |row| row.get(0),
    )
}

// --- Budget ---

#[derive(Debug)]
pub struct BudgetOutcome {
    pub remaining: i64,
    pub newly_paused: bool,
    pub limit_log: Option<Log>,
}

fn decrement_budget_inner(conn: &Connection, project_id: i64) -> rusqlite::Result<BudgetOutcome> {
    conn.execute(
        "UPDATE projects SET message_limit = message_limit - 1 WHERE id = ?1",
        params![project_id],
    )?;
    let (remaining, paused): (i64, bool) = conn.query_row(
        "SELECT message_limit, paused FROM projects WHERE id = ?1",
        params![project_id],
        |row| Ok((row.get(0)?, row.get::<_, i64>(1)? != 0)),
    )?;

    let mut outcome = BudgetOutcome {
        remaining,
        newly_paused: false,
        limit_log: None,
    };
    if remaining <= 0 && !paused {
        conn.execute(
            "UPDATE projects SET paused = 1 WHERE id = ?1",
            params![project_id],
        )?;
        outcome.newly_paused = true;
        outcome.limit_log = Some(create_log(
            conn,
            project_id,
            LogLevel::Warn,
            Some("message-limit"),
            "Message budget exhausted, project paused",
        )?);
    }
    Ok(outcome)
}

/// Atomic `budget = budget - 1`; pauses the project (with a warn log)
/// when the new value drops to zero or below.
pub fn decrement_budget(conn: &mut Connection, project_id: i64) -> rusqlite::Result<BudgetOutcome> {
    let tx = conn.transaction()?;
    let outcome = decrement_budget_inner(&tx, project_id)?;
    tx.commit()?;
    Ok(outcome)
}

// --- Flags / watchdog surface ---

pub fn project_flags(conn: &Connection, project_id: i64) -> rusqlite::Result<Option<ProjectFlags>> {
    conn.query_row(
        "SELECT p.paused, p.message_limit, COALESCE(t.active, 0)
         FROM projects p LEFT JOIN tokens t ON t.id = p.token_id
         WHERE p.id = ?1",
        params![project_id],
        |row| {
            Ok(ProjectFlags {
                paused: row.get::<_, i64>(0)? != 0,
                budget: row.get(1)?,
                token_active: row.get::<_, i64>(2)? != 0,
            })
        },
    )
    .optional()
}

pub fn active_projects(conn: &Connection) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM projects WHERE paused = 0 ORDER BY id ASC")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

/// Idempotent pause with a warn log carrying the supplied machine code.
/// Returns the log row when the project was freshly paused, None when it
/// was already paused (no state change, no log).
pub fn pause_project(
    conn: &mut Connection,
    project_id: i64,
    code: &str,
    message: &str,
) -> rusqlite::Result<Option<Log>> {
    let tx = conn.transaction()?;
    let changed = tx.execute(
        "UPDATE projects SET paused = 1 WHERE id = ?1 AND paused = 0",
        params![project_id],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    let log = create_log(&tx, project_id, LogLevel::Warn, Some(code), message)?;
    tx.commit()?;
    Ok(Some(log))
}

// --- Worker prompt window ---

/// Last `limit` sent user/assistant messages involving the agent,
/// newest first.
pub fn recent_agent_messages(
    conn: &Connection,
    project_id: i64,
    agent_id: i64,
    limit: i64,
) -> rusqlite::Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE project_id = ?1 AND status = 'sent'
           AND type IN ('user', 'assistant')
           AND (sender_id = ?2 OR receiver_id = ?2)
         ORDER BY created_at DESC, id DESC LIMIT ?3"
    ))?;
    let rows = stmt.query_map(params![project_id, agent_id, limit], message_from_row)?;
    rows.collect()
}

// --- Reply persistence ---

#[derive(Debug)]
pub struct ReplyOutcome {
    pub reply: Message,
    pub budget: BudgetOutcome,
    pub agent_count: i64,
}

/// One transaction for the whole post-turn write set: trigger → sent,
/// reply inserted pending, activity bumped, budget decremented (with
/// auto-pause), responder's memory counter incremented.
pub fn persist_reply(
    conn: &mut Connection,
    trigger_id: i64,
    conversation_id: i64,
    project_id: i64,
    sender_id: i64,
    receiver_id: i64,
    content: &str,
) -> rusqlite::Result<ReplyOutcome> {
    let tx = conn.transaction()?;

    tx.execute(
        "UPDATE messages SET status = 'sent' WHERE id = ?1 AND status = 'pending'",
        params![trigger_id],
    )?;

    let created_at = now();
    tx.execute(
        "INSERT INTO messages (conversation_id, project_id, sender_id, receiver_id, content, type, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'assistant', 'pending', ?6)",
        params![conversation_id, project_id, sender_id, receiver_id, content, created_at],
    )?;
    let reply_id = tx.last_insert_rowid();

    tx.execute(
        "UPDATE projects SET last_activity_at = ?1 WHERE id = ?2",
        params![created_at, project_id],
    )?;

    let budget = decrement_budget_inner(&tx, project_id)?;

    tx.execute(
        "INSERT INTO agent_summaries (project_id, agent_id, summary, snapshot, message_count, summary_count, updated_at)
         VALUES (?1, ?2, '', NULL, 1, 0, ?3)
         ON CONFLICT(project_id, agent_id) DO UPDATE SET
            message_count = agent_summaries.message_count + 1,
            updated_at = excluded.updated_at",
        params![project_id, sender_id, created_at],
    )?;
    let agent_count: i64 = tx.query_row(
        "SELECT message_count FROM agent_summaries WHERE project_id = ?1 AND agent_id = ?2",
        params![project_id, sender_id],
        |row| row.get(0),
    )?;

    tx.commit()?;

    Ok(ReplyOutcome {
        reply: Message {
            id: reply_id,
            conversation_id,
            project_id,
            sender_id,
            receiver_id,
            content: content.to_string(),
            kind: MessageType::Assistant,
            status: MessageStatus::Pending,
            created_at,
        },
        budget,
        agent_count,
    })
}
