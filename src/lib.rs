pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod errors;
pub mod events;
pub mod hub;
pub mod llm;
pub mod models;
pub mod routes;
pub mod store;
pub mod watchdog;
pub mod worker;

use config::Config;
use db::Db;
use hub::Hub;
use llm::{LlmProvider, OpenAiCompatible};
use rocket_cors::CorsOptions;
use std::sync::Arc;
use worker::Worker;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    rocket_with_config(Config::from_env(), None)
}

pub fn rocket_with_db(db_path: &str) -> rocket::Rocket<rocket::Build> {
    let mut config = Config::from_env();
    config.database_path = db_path.to_string();
    rocket_with_config(config, None)
}

/// Full control over config and the LLM seam — used by tests to inject a
/// scripted provider.
pub fn rocket_with(config: Config, llm: Arc<dyn LlmProvider>) -> rocket::Rocket<rocket::Build> {
    rocket_with_config(config, Some(llm))
}

fn rocket_with_config(
    config: Config,
    llm: Option<Arc<dyn LlmProvider>>,
) -> rocket::Rocket<rocket::Build> {
    // Ensure data directory exists
    if let Some(parent) = std::path::Path::new(&config.database_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let db = Db::new(&config.database_path);
    let hub = Hub::new();
    let llm = llm.unwrap_or_else(|| {
        Arc::new(OpenAiCompatible::new(
            config.llm_base_url.clone(),
            config.llm_timeout_secs,
        ))
    });
    let worker = Worker::new(
        &config.database_path,
        hub.clone(),
        Arc::new(config.clone()),
        llm,
    );

    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    let watchdog_db_path = config.database_path.clone();
    let watchdog_hub = hub.clone();
    let watchdog_config = Arc::new(config.clone());

    rocket::build()
        .manage(db)
        .manage(hub)
        .manage(config)
        .manage(worker)
        .attach(cors)
        .register(
            "/",
            rocket::catchers![
                routes::bad_request,
                routes::unauthorized,
                routes::forbidden,
                routes::not_found,
                routes::unprocessable,
                routes::server_error,
            ],
        )
        .mount(
            "/",
            rocket::routes![
                routes::health,
                // auth
                routes::register,
                routes::login,
                routes::logout,
                routes::whoami,
                // agents
                routes::list_agents,
                routes::create_agent,
                // tokens
                routes::list_tokens,
                routes::create_token,
                routes::delete_token,
                routes::enable_token,
                routes::disable_token,
                // projects
                routes::list_projects,
                routes::get_project,
                routes::create_project,
                routes::delete_project,
                routes::set_status,
                // settings
                routes::set_token,
                routes::set_pause,
                routes::set_limit,
                // conversations + messages
                routes::list_conversations,
                routes::create_conversation,
                routes::list_messages,
                routes::send_message,
                // logs
                routes::list_logs,
                routes::clear_logs,
                // live updates
                routes::live_updates,
                // internal surface (worker / watchdog)
                routes::internal_context,
                routes::internal_pending,
                routes::internal_create_message,
                routes::internal_update_message_status,
                routes::internal_create_log,
                routes::internal_upsert_summary,
                routes::internal_get_summary,
                routes::internal_list_summaries,
                routes::internal_decrement_budget,
                routes::internal_increment_count,
                routes::internal_flags,
                routes::internal_recent_agent_messages,
                routes::internal_active_projects,
                routes::internal_oldest_pending,
                routes::internal_pause,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff("Watchdog", move |_rocket| {
            Box::pin(async move {
                watchdog::spawn_watchdog(watchdog_db_path, watchdog_hub, watchdog_config);
                println!("🐶 Watchdog started");
            })
        }))
}
