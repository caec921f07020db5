use rocket::serde::json::Json;
use rocket::{catch, get};

#[get("/api/health")]
pub fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "roundtable",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[catch(400)]
pub fn bad_request() -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": "Bad request", "code": "validation"}))
}

#[catch(401)]
pub fn unauthorized() -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": "Authentication required", "code": "unauthenticated"}))
}

#[catch(403)]
pub fn forbidden() -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": "Forbidden", "code": "forbidden"}))
}

#[catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": "Resource not found", "code": "not-found"}))
}

#[catch(422)]
pub fn unprocessable() -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": "Request body failed schema validation", "code": "validation"}))
}

#[catch(500)]
pub fn server_error() -> Json<serde_json::Value> {
    Json(serde_json::json!({"error": "Internal server error", "code": "internal"}))
}
