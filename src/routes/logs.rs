use crate::auth::AuthedUser;
use crate::db::Db;
use crate::errors::ApiError;
use crate::models::*;
use rocket::serde::json::Json;
use rocket::{delete, get, State};
use rusqlite::params;

use super::project_owned;

#[get("/api/logs/<project_id>")]
pub fn list_logs(
    db: &State<Db>,
    user: AuthedUser,
    project_id: i64,
) -> Result<Json<Vec<Log>>, ApiError> {
    let conn = db.conn();
    project_owned(&conn, project_id, user.0.id)?;

    let mut stmt = conn.prepare(
        "SELECT id, project_id, level, code, message, created_at
         FROM logs WHERE project_id = ?1 ORDER BY created_at DESC, id DESC",
    )?;
    let logs = stmt
        .query_map(params![project_id], |row| {
            let level: String = row.get(2)?;
            Ok(Log {
                id: row.get(0)?,
                project_id: row.get(1)?,
                level: LogLevel::parse(&level).unwrap_or(LogLevel::Info),
                code: row.get(3)?,
                message: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Json(logs))
}

#[delete("/api/logs/<project_id>")]
pub fn clear_logs(
    db: &State<Db>,
    user: AuthedUser,
    project_id: i64,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = db.conn();
    project_owned(&conn, project_id, user.0.id)?;

    let cleared = conn.execute("DELETE FROM logs WHERE project_id = ?1", params![project_id])?;
    Ok(Json(serde_json::json!({ "cleared": cleared })))
}
