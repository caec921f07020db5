use crate::auth::AuthedUser;
use crate::config::Config;
use crate::crypto;
use crate::db::Db;
use crate::errors::ApiError;
use crate::models::*;
use crate::store;
use rocket::serde::json::Json;
use rocket::{delete, get, patch, post, State};
use rusqlite::{params, OptionalExtension};

#[get("/api/tokens")]
pub fn list_tokens(db: &State<Db>, user: AuthedUser) -> Result<Json<Vec<Token>>, ApiError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.active, t.created_at,
                EXISTS(SELECT 1 FROM projects p WHERE p.token_id = t.id)
         FROM tokens t WHERE t.user_id = ?1 ORDER BY t.created_at DESC, t.id DESC",
    )?;
    let tokens = stmt
        .query_map(params![user.0.id], |row| {
            Ok(Token {
                id: row.get(0)?,
                name: row.get(1)?,
                active: row.get::<_, i64>(2)? != 0,
                created_at: row.get(3)?,
                in_use: row.get::<_, i64>(4)? != 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Json(tokens))
}

#[post("/api/tokens", format = "json", data = "<body>")]
pub fn create_token(
    db: &State<Db>,
    config: &State<Config>,
    user: AuthedUser,
    body: Json<CreateToken>,
) -> Result<Json<Token>, ApiError> {
    let name = body.name.trim().to_string();
    if name.is_empty() || name.len() > 100 {
        return Err(ApiError::Validation(
            "Token name must be 1-100 characters".to_string(),
        ));
    }
    let api_key = body.api_key.trim();
    if api_key.is_empty() {
        return Err(ApiError::Validation("API key must not be empty".to_string()));
    }

    let secret_enc = crypto::encrypt_secret(&config.encryption_key, api_key);
    let created_at = store::now();

    let conn = db.conn();
    conn.execute(
        "INSERT INTO tokens (user_id, name, secret_enc, active, created_at) VALUES (?1, ?2, ?3, 1, ?4)",
        params![user.0.id, name, secret_enc, created_at],
    )?;

    Ok(Json(Token {
        id: conn.last_insert_rowid(),
        name,
        active: true,
        in_use: false,
        created_at,
    }))
}

/// Look up a token and check ownership; absent and foreign are both 404.
fn token_owned(conn: &rusqlite::Connection, token_id: i64, user_id: i64) -> Result<(), ApiError> {
    let owner: Option<i64> = conn
        .query_row(
            "SELECT user_id FROM tokens WHERE id = ?1",
            params![token_id],
            |row| row.get(0),
        )
        .optional()?;
    match owner {
        Some(uid) if uid == user_id => Ok(()),
        _ => Err(ApiError::NotFound),
    }
}

#[delete("/api/tokens/<token_id>")]
pub fn delete_token(
    db: &State<Db>,
    config: &State<Config>,
    user: AuthedUser,
    token_id: i64,
) -> Result<Json<serde_json::Value>, ApiError> {
    if config.is_protected_token(token_id) {
        return Err(ApiError::Forbidden);
    }
    let conn = db.conn();
    token_owned(&conn, token_id, user.0.id)?;

    let in_use: i64 = conn.query_row(
        "SELECT COUNT(*) FROM projects WHERE token_id = ?1",
        params![token_id],
        |row| row.get(0),
    )?;
    if in_use > 0 {
        return Err(ApiError::TokenInUse);
    }

    conn.execute("DELETE FROM tokens WHERE id = ?1", params![token_id])?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

fn set_active(
    db: &Db,
    user_id: i64,
    token_id: i64,
    active: bool,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = db.conn();
    token_owned(&conn, token_id, user_id)?;
    conn.execute(
        "UPDATE tokens SET active = ?1 WHERE id = ?2",
        params![active as i64, token_id],
    )?;
    Ok(Json(serde_json::json!({ "id": token_id, "active": active })))
}

#[patch("/api/tokens/<token_id>/enable")]
pub fn enable_token(
    db: &State<Db>,
    user: AuthedUser,
    token_id: i64,
) -> Result<Json<serde_json::Value>, ApiError> {
    set_active(db, user.0.id, token_id, true)
}

#[patch("/api/tokens/<token_id>/disable")]
pub fn disable_token(
    db: &State<Db>,
    config: &State<Config>,
    user: AuthedUser,
    token_id: i64,
) -> Result<Json<serde_json::Value>, ApiError> {
    if config.is_protected_token(token_id) {
        return Err(ApiError::Forbidden);
    }
    set_active(db, user.0.id, token_id, false)
}
