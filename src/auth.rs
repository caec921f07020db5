use crate::config::Config;
use crate::crypto;
use crate::db::Db;
use crate::models::User;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};

pub const SESSION_COOKIE: &str = "session";
pub const SESSION_TTL_SECS: i64 = 60 * 60 * 24 * 7;
pub const INTERNAL_KEY_HEADER: &str = "X-Brain-Api-Key";

/// Request guard: the authenticated session user, resolved from the signed
/// session cookie. Fails the request with 401 when absent/invalid/expired.
pub struct AuthedUser(pub User);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthedUser {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let (Some(config), Some(db)) = (req.rocket().state::<Config>(), req.rocket().state::<Db>())
        else {
            return Outcome::Error((Status::InternalServerError, ()));
        };

        let Some(cookie) = req.cookies().get(SESSION_COOKIE) else {
            return Outcome::Error((Status::Unauthorized, ()));
        };
        let now = chrono::Utc::now().timestamp();
        let Some(user_id) = crypto::verify_session(&config.session_key, cookie.value(), now)
        else {
            return Outcome::Error((Status::Unauthorized, ()));
        };

        let user = {
            let conn = db.conn();
            conn.query_row(
                "SELECT id, username, email, created_at FROM users WHERE id = ?1",
                rusqlite::params![user_id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .ok()
        };
        match user {
            Some(user) => Outcome::Success(AuthedUser(user)),
            None => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

/// Request guard for the internal surface: the pre-shared key header must
/// match the configured value exactly.
pub struct InternalKey;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for InternalKey {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(config) = req.rocket().state::<Config>() else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        match req.headers().get_one(INTERNAL_KEY_HEADER) {
            Some(key) if key == config.internal_api_key => Outcome::Success(InternalKey),
            _ => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}
