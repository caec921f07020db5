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
use rocket::{delete, get, post, State};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{ensure_mutable_project, project_owned};

#[get("/api/projects")]
pub fn list_projects(db: &State<Db>, user: AuthedUser) -> Result<Json<Vec<Project>>, ApiError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM projects WHERE user_id = ?1 ORDER BY last_activity_at DESC, id DESC",
        store::PROJECT_COLUMNS
    ))?;
    let projects = stmt
        .query_map(params![user.0.id], store::project_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Json(projects))
}

/// Full project view: row + members (overrides applied) + conversations.
pub(crate) fn detail(conn: &Connection, project_id: i64) -> Result<ProjectDetail, ApiError> {
    let project = store::get_project(conn, project_id)?.ok_or(ApiError::NotFound)?;

    let token_active = match project.token_id {
        Some(token_id) => conn
            .query_row(
                "SELECT active FROM tokens WHERE id = ?1",
                params![token_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(|v| v != 0)
            .unwrap_or(false),
        None => false,
    };

    let members = {
        let mut stmt = conn.prepare(
            "SELECT a.id, a.name, COALESCE(pa.role, a.role), a.description, a.model,
                    pa.prompt, pa.can_message
             FROM project_agents pa
             JOIN agents a ON a.id = pa.agent_id
             WHERE pa.project_id = ?1 ORDER BY a.id ASC",
        )?;
        stmt.query_map(params![project_id], |row| {
            let can_message_raw: String = row.get(6)?;
            Ok(ProjectMember {
                agent_id: row.get(0)?,
                name: row.get(1)?,
                role: row.get(2)?,
                description: row.get(3)?,
                model: row.get(4)?,
                prompt: row.get(5)?,
                can_message_ids: serde_json::from_str(&can_message_raw).unwrap_or_default(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
    };

    let conversations = {
        let mut stmt = conn.prepare(
            "SELECT id, project_id, sender_id, receiver_id, created_at
             FROM conversations WHERE project_id = ?1 ORDER BY id ASC",
        )?;
        stmt.query_map(params![project_id], |row| {
            Ok(Conversation {
                id: row.get(0)?,
                project_id: row.get(1)?,
                sender_id: row.get(2)?,
                receiver_id: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
    };

    Ok(ProjectDetail {
        project,
        token_active,
        members,
        conversations,
    })
}

#[get("/api/projects/<project_id>")]
pub fn get_project(
    db: &State<Db>,
    user: AuthedUser,
    project_id: i64,
) -> Result<Json<ProjectDetail>, ApiError> {
    let conn = db.conn();
    project_owned(&conn, project_id, user.0.id)?;
    Ok(Json(detail(&conn, project_id)?))
}

#[post("/api/projects", format = "json", data = "<body>")]
pub fn create_project(
    db: &State<Db>,
    config: &State<Config>,
    user: AuthedUser,
    body: Json<CreateProject>,
) -> Result<Json<ProjectDetail>, ApiError> {
    let title = body.title.trim().to_string();
    if title.is_empty() || title.len() > 200 {
        return Err(ApiError::Validation(
            "Project title must be 1-200 characters".to_string(),
        ));
    }
    if body.agents.is_empty() {
        return Err(ApiError::Validation(
            "A project needs at least one agent".to_string(),
        ));
    }

    let mut conn = db.conn();
    let tx = conn.transaction()?;

    // Token binding checks: must exist, be owned, and be active.
    if let Some(token_id) = body.token_id {
        let row: Option<(i64, i64)> = tx
            .query_row(
                "SELECT user_id, active FROM tokens WHERE id = ?1",
                params![token_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            None => return Err(ApiError::NotFound),
            Some((owner, _)) if owner != user.0.id => return Err(ApiError::Forbidden),
            Some((_, active)) if active == 0 => {
                return Err(ApiError::Validation(
                    "Cannot bind a disabled token".to_string(),
                ))
            }
            Some(_) => {}
        }
    }

    let mut message_limit = config.default_message_limit;
    if config.is_demo_user(user.0.id) {
        message_limit = message_limit.min(config.demo_message_limit);
    }

    let now = store::now();
    match tx.execute(
        "INSERT INTO projects (user_id, title, description, system_prompt, paused, message_limit, token_id, created_at, last_activity_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?7)",
        params![
            user.0.id,
            title,
            body.description.trim(),
            body.system_prompt.trim(),
            message_limit,
            body.token_id,
            now
        ],
    ) {
        Ok(_) => {}
        Err(e) if e.to_string().contains("UNIQUE") => return Err(ApiError::DuplicateTitle),
        Err(e) => return Err(e.into()),
    }
    let project_id = tx.last_insert_rowid();

    // Resolve the member list: referenced agents must be owned; inline
    // definitions are inserted as new agents owned by the caller.
    let mut member_ids: Vec<i64> = Vec::new();
    for spec in &body.agents {
        let agent_id = match spec.id {
            Some(id) => {
                if id == SYSTEM_AGENT_ID {
                    return Err(ApiError::Validation(
                        "The System agent is an implicit member of every project".to_string(),
                    ));
                }
                let owner: Option<Option<i64>> = tx
                    .query_row(
                        "SELECT user_id FROM agents WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                match owner {
                    Some(Some(uid)) if uid == user.0.id => id,
                    Some(_) => return Err(ApiError::Forbidden),
                    None => return Err(ApiError::NotFound),
                }
            }
            None => {
                let name = spec
                    .name
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        ApiError::Validation("Inline agents need a name".to_string())
                    })?;
                tx.execute(
                    "INSERT INTO agents (user_id, name, role, description, model, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        user.0.id,
                        name,
                        spec.role.as_deref().unwrap_or("").trim(),
                        spec.description,
                        spec.model.trim(),
                        now
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };
        if member_ids.contains(&agent_id) {
            return Err(ApiError::Validation(
                "An agent can only be added to a project once".to_string(),
            ));
        }
        member_ids.push(agent_id);
    }

    // Membership rows with resolved allowed-recipient sets, and the
    // conversation edges they imply. Every member also gets a System edge.
    let mut edges: BTreeSet<(i64, i64)> = BTreeSet::new();
    for (agent_id, spec) in member_ids.iter().zip(body.agents.iter()) {
        let can: Vec<i64> = match &spec.can_message_ids {
            Some(ids) => {
                let mut seen = BTreeSet::new();
                ids.iter()
                    .copied()
                    .filter(|id| *id != *agent_id && member_ids.contains(id) && seen.insert(*id))
                    .collect()
            }
            // Omitted ⇒ full mesh with the other members.
            None => member_ids
                .iter()
                .copied()
                .filter(|id| id != agent_id)
                .collect(),
        };

        for peer in &can {
            let (low, high) = if agent_id <= peer {
                (*agent_id, *peer)
            } else {
                (*peer, *agent_id)
            };
            edges.insert((low, high));
        }
        edges.insert((SYSTEM_AGENT_ID, *agent_id));

        // Role/prompt overrides only make sense for referenced agents;
        // inline definitions already carry their role on the agent row.
        let role_override = spec.id.and(spec.role.clone());
        tx.execute(
            "INSERT INTO project_agents (project_id, agent_id, role, prompt, can_message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                project_id,
                agent_id,
                role_override,
                spec.prompt,
                serde_json::to_string(&can).unwrap_or_else(|_| "[]".to_string())
            ],
        )?;
    }

    for (low, high) in edges {
        tx.execute(
            "INSERT INTO conversations (project_id, sender_id, receiver_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![project_id, low, high, now],
        )?;
    }

    tx.commit()?;
    Ok(Json(detail(&conn, project_id)?))
}

#[delete("/api/projects/<project_id>")]
pub fn delete_project(
    db: &State<Db>,
    config: &State<Config>,
    user: AuthedUser,
    project_id: i64,
) -> Result<Json<serde_json::Value>, ApiError> {
    ensure_mutable_project(config, project_id)?;
    let conn = db.conn();
    project_owned(&conn, project_id, user.0.id)?;

    // Cascades to memberships, conversations, messages, logs, summaries.
    conn.execute("DELETE FROM projects WHERE id = ?1", params![project_id])?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[post("/api/projects/<project_id>/status", format = "json", data = "<body>")]
pub fn set_status(
    db: &State<Db>,
    config: &State<Config>,
    hub: &State<Hub>,
    worker: &State<Arc<Worker>>,
    user: AuthedUser,
    project_id: i64,
    body: Json<SetPaused>,
) -> Result<Json<Project>, ApiError> {
    apply_paused(db, config, hub, worker, user.0.id, project_id, body.paused)
}

/// Shared by the status toggle and the settings pause route.
pub(crate) fn apply_paused(
    db: &Db,
    config: &Config,
    hub: &Hub,
    worker: &Arc<Worker>,
    user_id: i64,
    project_id: i64,
    paused: bool,
) -> Result<Json<Project>, ApiError> {
    ensure_mutable_project(config, project_id)?;
    let project = {
        let conn = db.conn();
        let project = project_owned(&conn, project_id, user_id)?;

        if project.paused == paused {
            return Ok(Json(project));
        }
        if !paused && project.message_limit <= 0 {
            return Err(ApiError::Conflict(
                "Message budget is exhausted; raise the limit before resuming".to_string(),
            ));
        }

        if paused {
            conn.execute(
                "UPDATE projects SET paused = 1 WHERE id = ?1",
                params![project_id],
            )?;
        } else {
            conn.execute(
                "UPDATE projects SET paused = 0, last_activity_at = ?1 WHERE id = ?2",
                params![store::now(), project_id],
            )?;
        }
        store::get_project(&conn, project_id)?.ok_or(ApiError::NotFound)?
    };

    hub.publish(ProjectEvent::paused_changed(project_id, paused));
    if !paused {
        worker.nudge(project_id);
    }
    Ok(Json(project))
}
