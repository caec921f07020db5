// Integration test suite for roundtable.
//
// Organized into focused modules by feature area. All modules share
// common::TestClient for DB lifecycle management; worker scenarios use the
// async client plus a scripted fake LLM provider.


mod auth;
mod projects;
mod settings;
mod worker_engine;
