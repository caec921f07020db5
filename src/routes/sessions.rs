use crate::auth::{AuthedUser, SESSION_COOKIE, SESSION_TTL_SECS};
use crate::config::Config;
use crate::crypto;
use crate::db::Db;
use crate::errors::ApiError;
use crate::models::*;
use crate::store;
use rocket::http::{Cookie, CookieJar};
use rocket::serde::json::Json;
use rocket::{get, post, State};
use rusqlite::{params, OptionalExtension};

fn set_session_cookie(jar: &CookieJar<'_>, config: &Config, user_id: i64) {
    let expires_at = chrono::Utc::now().timestamp() + SESSION_TTL_SECS;
    let value = crypto::sign_session(&config.session_key, user_id, expires_at);
    jar.add(
        Cookie::build((SESSION_COOKIE, value))
            .http_only(true)
            .path("/"),
    );
}

#[post("/api/auth/register", format = "json", data = "<body>")]
pub fn register(
    db: &State<Db>,
    config: &State<Config>,
    jar: &CookieJar<'_>,
    body: Json<Register>,
) -> Result<Json<User>, ApiError> {
    let username = body.username.trim().to_string();
    if username.is_empty() || username.len() > 100 {
        return Err(ApiError::Validation(
            "Username must be 1-100 characters".to_string(),
        ));
    }
    let email = body.email.trim().to_lowercase();
    if email.len() < 3 || email.len() > 254 || !email.contains('@') {
        return Err(ApiError::Validation("Invalid email address".to_string()));
    }
    if body.password.len() < 8 {
        return Err(ApiError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    let password_hash =
        crypto::hash_password(&body.password).map_err(|e| ApiError::Internal(e.to_string()))?;
    let created_at = store::now();

    let conn = db.conn();
    match conn.execute(
        "INSERT INTO users (username, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![username, email, password_hash, created_at],
    ) {
        Ok(_) => {}
        Err(e) if e.to_string().contains("UNIQUE") => return Err(ApiError::EmailInUse),
        Err(e) => return Err(e.into()),
    }

    let user = User {
        id: conn.last_insert_rowid(),
        username,
        email,
        created_at,
    };
    set_session_cookie(jar, config, user.id);
    Ok(Json(user))
}

#[post("/api/auth/login", format = "json", data = "<body>")]
pub fn login(
    db: &State<Db>,
    config: &State<Config>,
    jar: &CookieJar<'_>,
    body: Json<Login>,
) -> Result<Json<User>, ApiError> {
    let email = body.email.trim().to_lowercase();

    let row = {
        let conn = db.conn();
        conn.query_row(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE email = ?1",
            params![email],
            |row| {
                Ok((
                    User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        created_at: row.get(4)?,
                    },
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?
    };

    let Some((user, password_hash)) = row else {
        return Err(ApiError::BadCredentials);
    };
    if !crypto::verify_password(&body.password, &password_hash) {
        return Err(ApiError::BadCredentials);
    }

    set_session_cookie(jar, config, user.id);
    Ok(Json(user))
}

#[post("/api/auth/logout")]
pub fn logout(jar: &CookieJar<'_>, _user: AuthedUser) -> Json<serde_json::Value> {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Json(serde_json::json!({ "ok": true }))
}

#[get("/api/auth/me")]
pub fn whoami(user: AuthedUser) -> Json<User> {
    Json(user.0)
}
