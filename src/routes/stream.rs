use crate::auth::AuthedUser;
use crate::db::Db;
use crate::hub::{Hub, JoinGuard};
use rocket::futures::{SinkExt, StreamExt};
use rocket::{get, State};
use rocket_ws as ws;
use tokio::sync::broadcast;

/// Live-update channel. Clients authenticate with the session cookie, then
/// send `{"type": "join", "projectId": N}`; server frames are
/// `{type, payload}` with type ∈ {new_message, message_updated,
/// project_updated}. On join, any frames buffered while the project had no
/// subscriber are flushed first.
#[get("/")]
pub fn live_updates(
    ws: ws::WebSocket,
    user: AuthedUser,
    db: &State<Db>,
    hub: &State<Hub>,
) -> ws::Channel<'static> {
    let hub = hub.inner().clone();
    let db = db.inner().clone();
    let user_id = user.0.id;
    let mut rx = hub.sender.subscribe();

    ws.channel(move |mut stream| {
        Box::pin(async move {
            let mut joined: Option<JoinGuard> = None;

            loop {
                tokio::select! {
                    incoming = stream.next() => {
                        match incoming {
                            Some(Ok(ws::Message::Text(text))) => {
                                let Ok(frame) = serde_json::from_str::<serde_json::Value>(&text)
                                else {
                                    continue;
                                };
                                if frame["type"] != "join" {
                                    continue;
                                }
                                let Some(project_id) = frame["projectId"]
                                    .as_i64()
                                    .or_else(|| frame["project"].as_i64())
                                else {
                                    continue;
                                };

                                // Only the owner may watch a project.
                                let owned = {
                                    let conn = db.conn();
                                    conn.query_row(
                                        "SELECT COUNT(*) FROM projects WHERE id = ?1 AND user_id = ?2",
                                        rusqlite::params![project_id, user_id],
                                        |row| row.get::<_, i64>(0),
                                    )
                                    .unwrap_or(0)
                                        > 0
                                };
                                if !owned {
                                    continue;
                                }

                                joined = None; // leave any previous project first
                                let buffered = hub.join(project_id);
                                joined = Some(JoinGuard {
                                    hub: hub.clone(),
                                    project_id,
                                });
                                for frame in buffered {
                                    let _ = stream.send(ws::Message::Text(frame.to_string())).await;
                                }
                            }
                            Some(Ok(ws::Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(_)) => break,
                        }
                    }
                    event = rx.recv() => {
                        match event {
                            Ok(ev) => {
                                if let Some(ref guard) = joined
                                    && guard.project_id == ev.project_id()
                                {
                                    let _ = stream
                                        .send(ws::Message::Text(ev.frame().to_string()))
                                        .await;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => {}
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            Ok(())
        })
    })
}
