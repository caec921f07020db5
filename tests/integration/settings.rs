use crate::common::{
    create_token, create_two_agent_project, register, temp_db_path, test_client,
    test_client_with, test_config, FakeLlm,
};
use rocket::http::{ContentType, Status};

#[test]
fn test_change_bound_token() {
    let client = test_client();
    register(&client, "ada", "ada@example.com");
    let first = create_token(&client, "first", "sk-1");
    let second = create_token(&client, "second", "sk-2");
    let detail = create_two_agent_project(&client, "p", Some(first));
    let project_id = detail["id"].as_i64().unwrap();

    let res = client
        .patch(format!("/api/settings/project/{project_id}/token"))
        .header(ContentType::JSON)
        .body(format!(r#"{{"tokenId": {second}}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["tokenId"], second);

    // Unbind entirely.
    let res = client
        .patch(format!("/api/settings/project/{project_id}/token"))
        .header(ContentType::JSON)
        .body(r#"{"tokenId": null}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body.get("tokenId").is_none() || body["tokenId"].is_null());
}

#[test]
fn test_token_binding_refuses_inactive_and_foreign() {
    let client = test_client();
    register(&client, "ada", "ada@example.com");
    let ada_token = create_token(&client, "ada-token", "sk-1");
    let detail = create_two_agent_project(&client, "p", None);
    let project_id = detail["id"].as_i64().unwrap();

    // Disabled token refused.
    client
        .patch(format!("/api/tokens/{ada_token}/disable"))
        .dispatch();
    let res = client
        .patch(format!("/api/settings/project/{project_id}/token"))
        .header(ContentType::JSON)
        .body(format!(r#"{{"tokenId": {ada_token}}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);

    // Foreign token refused: bob's token on ada's project.
    register(&client, "bob", "bob@example.com");
    let bob_token = create_token(&client, "bob-token", "sk-2");
    client
        .post("/api/auth/login")
        .header(ContentType::JSON)
        .body(r#"{"email": "ada@example.com", "password": "hunter22!"}"#)
        .dispatch();
    let res = client
        .patch(format!("/api/settings/project/{project_id}/token"))
        .header(ContentType::JSON)
        .body(format!(r#"{{"tokenId": {bob_token}}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_set_limit_zero_forces_pause() {
    let client = test_client();
    register(&client, "ada", "ada@example.com");
    let detail = create_two_agent_project(&client, "p", None);
    let project_id = detail["id"].as_i64().unwrap();

    client
        .post(format!("/api/projects/{project_id}/status"))
        .header(ContentType::JSON)
        .body(r#"{"paused": false}"#)
        .dispatch();

    let res = client
        .patch(format!("/api/settings/project/{project_id}/limit"))
        .header(ContentType::JSON)
        .body(r#"{"limit": 0}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["messageLimit"], 0);
    assert_eq!(body["paused"], true);

    // Raising the budget again does not auto-resume.
    let res = client
        .patch(format!("/api/settings/project/{project_id}/limit"))
        .header(ContentType::JSON)
        .body(r#"{"limit": 7}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["messageLimit"], 7);
    assert_eq!(body["paused"], true);
}

#[test]
fn test_set_limit_rejects_negative() {
    let client = test_client();
    register(&client, "ada", "ada@example.com");
    let detail = create_two_agent_project(&client, "p", None);
    let project_id = detail["id"].as_i64().unwrap();

    let res = client
        .patch(format!("/api/settings/project/{project_id}/limit"))
        .header(ContentType::JSON)
        .body(r#"{"limit": -1}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_demo_user_limit_capped() {
    let db_path = temp_db_path();
    let mut config = test_config(&db_path);
    config.demo_user_id = Some(1); // first registered user
    config.demo_message_limit = 10;
    let client = test_client_with(config, FakeLlm::unscripted());

    register(&client, "demo", "demo@example.com");
    let detail = create_two_agent_project(&client, "p", None);
    let project_id = detail["id"].as_i64().unwrap();
    // Creation already capped the default budget.
    assert!(detail["messageLimit"].as_i64().unwrap() <= 10);

    let res = client
        .patch(format!("/api/settings/project/{project_id}/limit"))
        .header(ContentType::JSON)
        .body(r#"{"limit": 500}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["messageLimit"], 10);
}
