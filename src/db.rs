use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

/// The agent id user-originated messages are attributed to. Preseeded,
/// global, member of every project, never deletable.
pub const SYSTEM_AGENT_ID: i64 = 0;

/// Shared database handle for request handlers. Background tasks (worker
/// runs, watchdog) open their own connections via [`open_connection`] and
/// rely on WAL mode for concurrent access.
#[derive(Clone)]
pub struct Db {
    pub conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn new(path: &str) -> Self {
        let conn = open_connection(path).expect("Failed to open database");
        let db = Db {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate();
        db
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) {
        let conn = self.conn();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                secret_enc TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tokens_user ON tokens(user_id);

            CREATE TABLE IF NOT EXISTS agents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                model TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_agents_user ON agents(user_id);

            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                system_prompt TEXT NOT NULL DEFAULT '',
                paused INTEGER NOT NULL DEFAULT 1,
                message_limit INTEGER NOT NULL DEFAULT 0,
                token_id INTEGER REFERENCES tokens(id) ON DELETE SET NULL,
                created_at TEXT NOT NULL,
                last_activity_at TEXT NOT NULL,
                UNIQUE(user_id, title)
            );

            CREATE TABLE IF NOT EXISTS project_agents (
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                agent_id INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                role TEXT,
                prompt TEXT,
                can_message TEXT NOT NULL DEFAULT '[]',
                PRIMARY KEY (project_id, agent_id)
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                sender_id INTEGER NOT NULL,
                receiver_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(project_id, sender_id, receiver_id),
                CHECK(sender_id <= receiver_id)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                sender_id INTEGER NOT NULL,
                receiver_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                type TEXT NOT NULL DEFAULT 'user'
                    CHECK(type IN ('user', 'assistant', 'system', 'error')),
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK(status IN ('pending', 'sent', 'failed')),
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_project_status
                ON messages(project_id, status, created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE TABLE IF NOT EXISTS agent_summaries (
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                agent_id INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                summary TEXT NOT NULL DEFAULT '',
                snapshot TEXT,
                message_count INTEGER NOT NULL DEFAULT 0,
                summary_count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (project_id, agent_id)
            );

            CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                level TEXT NOT NULL CHECK(level IN ('info', 'warn', 'error')),
                code TEXT,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_logs_project ON logs(project_id, created_at);",
        )
        .expect("Failed to run migrations");

        // Seed the singleton System agent (id 0, no owner).
        conn.execute(
            "INSERT OR IGNORE INTO agents (id, user_id, name, role, description, model, created_at)
             VALUES (?1, NULL, 'System', 'system', 'Relays user instructions into the project', '', ?2)",
            rusqlite::params![SYSTEM_AGENT_ID, chrono::Utc::now().to_rfc3339()],
        )
        .expect("Failed to seed System agent");
    }
}

/// Open a connection with the pragmas every connection needs (WAL for
/// multi-connection access, enforced foreign keys for the cascade rules).
pub fn open_connection(path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}
