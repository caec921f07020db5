use crate::auth::AuthedUser;
use crate::db::Db;
use crate::errors::ApiError;
use crate::models::*;
use crate::store;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use rusqlite::params;

fn agent_from_row(row: &rusqlite::Row) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        role: row.get(3)?,
        description: row.get(4)?,
        model: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[get("/api/agents")]
pub fn list_agents(db: &State<Db>, user: AuthedUser) -> Result<Json<Vec<Agent>>, ApiError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT id, user_id, name, role, description, model, created_at
         FROM agents WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
    )?;
    let agents = stmt
        .query_map(params![user.0.id], agent_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Json(agents))
}

#[post("/api/agents", format = "json", data = "<body>")]
pub fn create_agent(
    db: &State<Db>,
    user: AuthedUser,
    body: Json<CreateAgent>,
) -> Result<Json<Agent>, ApiError> {
    let name = body.name.trim().to_string();
    if name.is_empty() || name.len() > 100 {
        return Err(ApiError::Validation(
            "Agent name must be 1-100 characters".to_string(),
        ));
    }

    let created_at = store::now();
    let conn = db.conn();
    conn.execute(
        "INSERT INTO agents (user_id, name, role, description, model, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user.0.id,
            name,
            body.role.trim(),
            body.description,
            body.model.trim(),
            created_at
        ],
    )?;

    Ok(Json(Agent {
        id: conn.last_insert_rowid(),
        user_id: Some(user.0.id),
        name,
        role: body.role.trim().to_string(),
        description: body.description.clone(),
        model: body.model.trim().to_string(),
        created_at,
    }))
}
