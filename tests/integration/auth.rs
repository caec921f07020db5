use crate::common::{register, test_client};
use rocket::http::{ContentType, Status};

#[test]
fn test_register_and_whoami() {
    let client = test_client();
    let user_id = register(&client, "ada", "ada@example.com");
    assert!(user_id > 0);

    let res = client.get("/api/auth/me").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let me: serde_json::Value = res.into_json().unwrap();
    assert_eq!(me["username"], "ada");
    assert_eq!(me["email"], "ada@example.com");
}

#[test]
fn test_register_duplicate_email() {
    let client = test_client();
    register(&client, "ada", "dup@example.com");

    let res = client
        .post("/api/auth/register")
        .header(ContentType::JSON)
        .body(r#"{"username": "other", "email": "dup@example.com", "password": "hunter22!"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["code"], "email-in-use");
}

#[test]
fn test_register_validation() {
    let client = test_client();

    let res = client
        .post("/api/auth/register")
        .header(ContentType::JSON)
        .body(r#"{"username": "ada", "email": "not-an-email", "password": "hunter22!"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);

    let res = client
        .post("/api/auth/register")
        .header(ContentType::JSON)
        .body(r#"{"username": "ada", "email": "ada@example.com", "password": "short"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_login_and_bad_credentials() {
    let client = test_client();
    register(&client, "ada", "ada@example.com");

    let res = client
        .post("/api/auth/login")
        .header(ContentType::JSON)
        .body(r#"{"email": "ada@example.com", "password": "hunter22!"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .post("/api/auth/login")
        .header(ContentType::JSON)
        .body(r#"{"email": "ada@example.com", "password": "wrong-password"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["code"], "bad-credentials");

    let res = client
        .post("/api/auth/login")
        .header(ContentType::JSON)
        .body(r#"{"email": "nobody@example.com", "password": "hunter22!"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn test_logout_invalidates_session() {
    let client = test_client();
    register(&client, "ada", "ada@example.com");

    let res = client.post("/api/auth/logout").dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get("/api/auth/me").dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn test_unauthenticated_requests_rejected() {
    let client = test_client();
    for path in ["/api/auth/me", "/api/projects", "/api/tokens", "/api/agents"] {
        let res = client.get(path).dispatch();
        assert_eq!(res.status(), Status::Unauthorized, "GET {path}");
    }
}

#[test]
fn test_passwords_stored_hashed() {
    let client = test_client();
    register(&client, "ada", "ada@example.com");

    let conn = roundtable::db::open_connection(&client.db_path).unwrap();
    let stored: String = conn
        .query_row(
            "SELECT password_hash FROM users WHERE email = 'ada@example.com'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_ne!(stored, "hunter22!");
    assert!(stored.starts_with("$2")); // bcrypt marker
}
