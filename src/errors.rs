use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::Request;

/// Error kinds surfaced to API clients. Each kind maps to a fixed HTTP
/// status and user-visible message; `Validation` and `Conflict` carry a
/// request-specific detail string.
#[derive(Debug, Clone)]
pub enum ApiError {
    Validation(String),
    BadCredentials,
    Unauthenticated,
    Forbidden,
    NotFound,
    EmailInUse,
    DuplicateTitle,
    TokenInUse,
    Conflict(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::Validation(_) => Status::BadRequest,
            ApiError::BadCredentials | ApiError::Unauthenticated => Status::Unauthorized,
            ApiError::Forbidden => Status::Forbidden,
            ApiError::NotFound => Status::NotFound,
            ApiError::EmailInUse
            | ApiError::DuplicateTitle
            | ApiError::TokenInUse
            | ApiError::Conflict(_) => Status::Conflict,
            ApiError::Internal(_) => Status::InternalServerError,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::BadCredentials => "bad-credentials",
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::Forbidden => "forbidden",
            ApiError::NotFound => "not-found",
            ApiError::EmailInUse => "email-in-use",
            ApiError::DuplicateTitle => "duplicate-title",
            ApiError::TokenInUse => "token-in-use",
            ApiError::Conflict(_) => "conflict",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::Validation(detail) => detail.clone(),
            ApiError::BadCredentials => "Invalid email or password".to_string(),
            ApiError::Unauthenticated => "Authentication required".to_string(),
            ApiError::Forbidden => "You do not have access to this resource".to_string(),
            ApiError::NotFound => "Resource not found".to_string(),
            ApiError::EmailInUse => "Email is already registered".to_string(),
            ApiError::DuplicateTitle => "A project with this title already exists".to_string(),
            ApiError::TokenInUse => "Token is bound to a project and cannot be deleted".to_string(),
            ApiError::Conflict(detail) => detail.clone(),
            ApiError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        if let ApiError::Internal(ref detail) = self {
            eprintln!("💥 internal error: {detail}");
        }
        let body = Json(serde_json::json!({
            "error": self.message(),
            "code": self.code(),
        }));
        let mut response = body.respond_to(req)?;
        response.set_status(self.status());
        Ok(response)
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}
