use crate::auth::AuthedUser;
use crate::config::Config;
use crate::db::Db;
use crate::errors::ApiError;
use crate::events::ProjectEvent;
use crate::hub::Hub;
use crate::models::*;
use crate::store;
use crate::worker::Worker;
use rocket::serde::json::Json;
use rocket::{patch, State};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use super::{ensure_mutable_project, project_owned};

#[patch("/api/settings/project/<project_id>/token", format = "json", data = "<body>")]
pub fn set_token(
    db: &State<Db>,
    config: &State<Config>,
    hub: &State<Hub>,
    worker: &State<Arc<Worker>>,
    user: AuthedUser,
    project_id: i64,
    body: Json<SetToken>,
) -> Result<Json<Project>, ApiError> {
    ensure_mutable_project(config, project_id)?;
    let project = {
        let conn = db.conn();
        project_owned(&conn, project_id, user.0.id)?;

        if let Some(token_id) = body.token_id {
            let row: Option<(i64, i64)> = conn
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

        conn.execute(
            "UPDATE projects SET token_id = ?1 WHERE id = ?2",
            params![body.token_id, project_id],
        )?;
        store::get_project(&conn, project_id)?.ok_or(ApiError::NotFound)?
    };

    hub.publish(ProjectEvent::ProjectUpdated {
        project_id,
        fields: serde_json::json!({ "tokenId": project.token_id }),
    });
    if !project.paused {
        worker.nudge(project_id);
    }
    Ok(Json(project))
}

#[patch("/api/settings/project/<project_id>/pause", format = "json", data = "<body>")]
pub fn set_pause(
    db: &State<Db>,
    config: &State<Config>,
    hub: &State<Hub>,
    worker: &State<Arc<Worker>>,
    user: AuthedUser,
    project_id: i64,
    body: Json<SetPaused>,
) -> Result<Json<Project>, ApiError> {
    super::projects::apply_paused(db, config, hub, worker, user.0.id, project_id, body.paused)
}

#[patch("/api/settings/project/<project_id>/limit", format = "json", data = "<body>")]
pub fn set_limit(
    db: &State<Db>,
    config: &State<Config>,
    hub: &State<Hub>,
    worker: &State<Arc<Worker>>,
    user: AuthedUser,
    project_id: i64,
    body: Json<SetLimit>,
) -> Result<Json<Project>, ApiError> {
    ensure_mutable_project(config, project_id)?;
    if body.limit < 0 {
        return Err(ApiError::Validation(
            "Message limit must be zero or more".to_string(),
        ));
    }
    let mut limit = body.limit;
    if config.is_demo_user(user.0.id) {
        limit = limit.min(config.demo_message_limit);
    }

    let (project, newly_paused) = {
        let conn = db.conn();
        let before = project_owned(&conn, project_id, user.0.id)?;

        // Budget at zero forces pause; raising it never auto-resumes.
        let force_pause = limit <= 0 && !before.paused;
        if force_pause {
            conn.execute(
                "UPDATE projects SET message_limit = ?1, paused = 1 WHERE id = ?2",
                params![limit, project_id],
            )?;
        } else {
            conn.execute(
                "UPDATE projects SET message_limit = ?1 WHERE id = ?2",
                params![limit, project_id],
            )?;
        }
        (
            store::get_project(&conn, project_id)?.ok_or(ApiError::NotFound)?,
            force_pause,
        )
    };

    hub.publish(ProjectEvent::ProjectUpdated {
        project_id,
        fields: serde_json::json!({
            "messageLimit": project.message_limit,
            "paused": project.paused,
        }),
    });
    if !newly_paused && !project.paused {
        worker.nudge(project_id);
    }
    Ok(Json(project))
}
