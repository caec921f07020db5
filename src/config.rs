use std::env;

/// Process-wide configuration. All values read from environment variables
/// with sensible defaults, once at startup.
///
/// Environment variables:
/// - `DATABASE_PATH` — SQLite file (default: data/roundtable.db)
/// - `SESSION_KEY` — HMAC key for session cookies
/// - `ENCRYPTION_KEY` — 64 hex chars (32 bytes) for token secrets at rest
/// - `INTERNAL_API_KEY` — pre-shared key for the internal surface
/// - `LLM_BASE_URL` — chat-completions endpoint base (default: OpenAI)
/// - `DEFAULT_MODEL` — model used when an agent has none set
/// - `LLM_TIMEOUT_SECS` — per-request deadline for LLM calls (default: 60)
/// - `MAX_RETRIES` — total LLM attempts per trigger (default: 3)
/// - `HISTORY_WINDOW` — cap on the short-term prompt window (default: 20)
/// - `SUMMARY_THRESHOLD` — messages per agent before re-summarizing (default: 12)
/// - `SUMMARY_WINDOW` — messages fed to the summarizer (default: 30)
/// - `MAX_MESSAGE_LENGTH` — reply/content size cap (default: 2000)
/// - `DEFAULT_MESSAGE_LIMIT` — budget given to new projects (default: 50)
/// - `WATCHDOG_INTERVAL_SECS` / `STALL_TIMEOUT_SECS` / `IDLE_TIMEOUT_SECS`
/// - `DEMO_USER_ID`, `DEMO_TOKEN_ID`, `DEMO_PROJECT_IDS` (comma list),
///   `SNAPSHOT_PROJECT_ID`, `DEMO_MESSAGE_LIMIT` — demo/snapshot protection
#[derive(Clone)]
pub struct Config {
    pub database_path: String,
    pub session_key: String,
    pub encryption_key: [u8; 32],
    pub internal_api_key: String,

    pub llm_base_url: String,
    pub default_model: String,
    pub llm_timeout_secs: u64,

    pub max_retries: u32,
    pub history_window: usize,
    pub summary_threshold: i64,
    pub summary_window: i64,
    pub max_message_length: usize,
    pub default_message_limit: i64,

    pub watchdog_interval_secs: u64,
    pub stall_timeout_secs: i64,
    pub idle_timeout_secs: i64,

    pub demo_user_id: Option<i64>,
    pub demo_token_id: Option<i64>,
    pub demo_project_ids: Vec<i64>,
    pub snapshot_project_id: Option<i64>,
    pub demo_message_limit: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "data/roundtable.db".to_string(),
            session_key: "dev-session-key-change-me".to_string(),
            encryption_key: [0x42; 32],
            internal_api_key: "dev-internal-key-change-me".to_string(),
            llm_base_url: "https://api.openai.com/v1".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            llm_timeout_secs: 60,
            max_retries: 3,
            history_window: 20,
            summary_threshold: 12,
            summary_window: 30,
            max_message_length: 2000,
            default_message_limit: 50,
            watchdog_interval_secs: 60,
            stall_timeout_secs: 300,
            idle_timeout_secs: 3600,
            demo_user_id: None,
            demo_token_id: None,
            demo_project_ids: Vec::new(),
            snapshot_project_id: None,
            demo_message_limit: 20,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("DATABASE_PATH") {
            config.database_path = val;
        }
        if let Ok(val) = env::var("SESSION_KEY") {
            config.session_key = val;
        }
        if let Ok(val) = env::var("ENCRYPTION_KEY") {
            match parse_hex_key(&val) {
                Some(key) => config.encryption_key = key,
                None => eprintln!("⚠️  ENCRYPTION_KEY must be 64 hex chars, using dev key"),
            }
        } else {
            eprintln!("⚠️  ENCRYPTION_KEY not set, token secrets use the dev key");
        }
        if let Ok(val) = env::var("INTERNAL_API_KEY") {
            config.internal_api_key = val;
        }
        if let Ok(val) = env::var("LLM_BASE_URL") {
            config.llm_base_url = val;
        }
        if let Ok(val) = env::var("DEFAULT_MODEL") {
            config.default_model = val;
        }
        if let Ok(val) = env::var("LLM_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.llm_timeout_secs = n;
        }
        if let Ok(val) = env::var("MAX_RETRIES")
            && let Ok(n) = val.parse::<u32>()
        {
            config.max_retries = n.max(1);
        }
        if let Ok(val) = env::var("HISTORY_WINDOW")
            && let Ok(n) = val.parse::<usize>()
        {
            config.history_window = n;
        }
        if let Ok(val) = env::var("SUMMARY_THRESHOLD")
            && let Ok(n) = val.parse::<i64>()
        {
            config.summary_threshold = n;
        }
        if let Ok(val) = env::var("SUMMARY_WINDOW")
            && let Ok(n) = val.parse::<i64>()
        {
            config.summary_window = n;
        }
        if let Ok(val) = env::var("MAX_MESSAGE_LENGTH")
            && let Ok(n) = val.parse::<usize>()
        {
            config.max_message_length = n;
        }
        if let Ok(val) = env::var("DEFAULT_MESSAGE_LIMIT")
            && let Ok(n) = val.parse::<i64>()
        {
            config.default_message_limit = n.max(0);
        }
        if let Ok(val) = env::var("WATCHDOG_INTERVAL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.watchdog_interval_secs = n;
        }
        if let Ok(val) = env::var("STALL_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.stall_timeout_secs = n;
        }
        if let Ok(val) = env::var("IDLE_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.idle_timeout_secs = n;
        }
        if let Ok(val) = env::var("DEMO_USER_ID")
            && let Ok(n) = val.parse::<i64>()
        {
            config.demo_user_id = Some(n);
        }
        if let Ok(val) = env::var("DEMO_TOKEN_ID")
            && let Ok(n) = val.parse::<i64>()
        {
            config.demo_token_id = Some(n);
        }
        if let Ok(val) = env::var("DEMO_PROJECT_IDS") {
            config.demo_project_ids = val
                .split(',')
                .filter_map(|s| s.trim().parse::<i64>().ok())
                .collect();
        }
        if let Ok(val) = env::var("SNAPSHOT_PROJECT_ID")
            && let Ok(n) = val.parse::<i64>()
        {
            config.snapshot_project_id = Some(n);
        }
        if let Ok(val) = env::var("DEMO_MESSAGE_LIMIT")
            && let Ok(n) = val.parse::<i64>()
        {
            config.demo_message_limit = n.max(0);
        }

        config
    }

    /// True when a project id is demo- or snapshot-protected (read-only for mutations).
    pub fn is_protected_project(&self, project_id: i64) -> bool {
        self.demo_project_ids.contains(&project_id) || self.snapshot_project_id == Some(project_id)
    }

    pub fn is_protected_token(&self, token_id: i64) -> bool {
        self.demo_token_id == Some(token_id)
    }

    pub fn is_demo_user(&self, user_id: i64) -> bool {
        self.demo_user_id == Some(user_id)
    }
}

fn parse_hex_key(val: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(val.trim()).ok()?;
    bytes.try_into().ok()
}
