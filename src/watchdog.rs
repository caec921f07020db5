use crate::db::open_connection;
use crate::events::ProjectEvent;
use crate::hub::Hub;
use crate::store;
use rusqlite::Connection;
use std::sync::Arc;

use crate::config::Config;

/// Result of one watchdog sweep across all active projects.
#[derive(Debug, Clone, Default)]
pub struct SweepResult {
    pub projects_checked: usize,
    pub paused_stalled: Vec<i64>,
    pub paused_idle: Vec<i64>,
}

/// Spawns the background task that periodically pauses projects with a
/// message stuck pending (stall) or no activity at all (idle). Its only
/// write is `pause`; message content is never touched.
pub fn spawn_watchdog(db_path: String, hub: Hub, config: Arc<Config>) {
    tokio::spawn(async move {
        let mut conn = match open_connection(&db_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("⚠️  Watchdog: failed to open DB: {e}");
                return;
            }
        };

        // Initial delay: let the server start up before the first sweep.
        tokio::time::sleep(std::time::Duration::from_secs(15)).await;

        loop {
            run_sweep(
                &mut conn,
                &hub,
                config.stall_timeout_secs,
                config.idle_timeout_secs,
            );
            tokio::time::sleep(std::time::Duration::from_secs(
                config.watchdog_interval_secs,
            ))
            .await;
        }
    });
}

/// Execute one sweep. Plain function over a connection so tests can drive
/// it directly against seeded timestamps.
pub fn run_sweep(
    conn: &mut Connection,
    hub: &Hub,
    stall_timeout_secs: i64,
    idle_timeout_secs: i64,
) -> SweepResult {
    let mut result = SweepResult::default();

    let projects = match store::active_projects(conn) {
        Ok(ids) => ids,
        Err(e) => {
            eprintln!("⚠️  Watchdog: could not list active projects: {e}");
            return result;
        }
    };
    result.projects_checked = projects.len();

    let now = chrono::Utc::now();
    let stall_cutoff = (now - chrono::Duration::seconds(stall_timeout_secs)).to_rfc3339();
    let idle_cutoff = (now - chrono::Duration::seconds(idle_timeout_secs)).to_rfc3339();

    for project_id in projects {
        let stalled = match store::oldest_pending(conn, project_id) {
            Ok(Some(oldest)) => oldest.created_at < stall_cutoff,
            Ok(None) => false,
            Err(_) => false,
        };
        if stalled {
            if pause(conn, hub, project_id, "stall", "Pending message stalled, project paused") {
                result.paused_stalled.push(project_id);
            }
            continue;
        }

        let idle = conn
            .query_row(
                "SELECT last_activity_at < ?1 FROM projects WHERE id = ?2",
                rusqlite::params![idle_cutoff, project_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|v| v != 0)
            .unwrap_or(false);
        if idle && pause(conn, hub, project_id, "idle", "No activity, project paused") {
            result.paused_idle.push(project_id);
        }
    }

    if !result.paused_stalled.is_empty() || !result.paused_idle.is_empty() {
        eprintln!(
            "🐶 Watchdog: paused {} stalled / {} idle projects",
            result.paused_stalled.len(),
            result.paused_idle.len()
        );
    }

    result
}

fn pause(conn: &mut Connection, hub: &Hub, project_id: i64, code: &str, message: &str) -> bool {
    match store::pause_project(conn, project_id, code, message) {
        Ok(Some(log)) => {
            hub.publish(ProjectEvent::log_appended(&log));
            hub.publish(ProjectEvent::paused_changed(project_id, true));
            true
        }
        Ok(None) => false,
        Err(e) => {
            eprintln!("⚠️  Watchdog: failed to pause project {project_id}: {e}");
            false
        }
    }
}
