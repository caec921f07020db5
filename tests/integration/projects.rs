use crate::common::{
    create_token, create_two_agent_project, member_id, register, temp_db_path, test_client,
    test_client_with, test_config, FakeLlm,
};
use rocket::http::{ContentType, Status};

#[test]
fn test_create_project_with_inline_agents() {
    let client = test_client();
    register(&client, "ada", "ada@example.com");
    let detail = create_two_agent_project(&client, "kickoff", None);

    assert_eq!(detail["title"], "kickoff");
    assert_eq!(detail["paused"], true); // projects are born paused
    assert!(detail["messageLimit"].as_i64().unwrap() > 0);

    let members = detail["members"].as_array().unwrap();
    assert_eq!(members.len(), 2);

    // Full mesh of two agents plus a System edge per member: 3 pairs.
    let conversations = detail["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 3);
    for c in conversations {
        assert!(c["senderId"].as_i64().unwrap() <= c["receiverId"].as_i64().unwrap());
    }

    let ada = member_id(&detail, "Ada");
    let bolt = member_id(&detail, "Bolt");
    assert!(conversations
        .iter()
        .any(|c| c["senderId"] == 0 && c["receiverId"] == ada));
    assert!(conversations
        .iter()
        .any(|c| c["senderId"] == 0 && c["receiverId"] == bolt));
    assert!(conversations
        .iter()
        .any(|c| c["senderId"] == ada.min(bolt) && c["receiverId"] == ada.max(bolt)));

    // Each member may address the other.
    let ada_member = members.iter().find(|m| m["name"] == "Ada").unwrap();
    assert_eq!(
        ada_member["canMessageIds"].as_array().unwrap(),
        &vec![serde_json::json!(bolt)]
    );
}

#[test]
fn test_create_project_respects_can_message_ids() {
    let client = test_client();
    register(&client, "ada", "ada@example.com");

    // Nobody may talk to anybody: only the System edges remain.
    let res = client
        .post("/api/projects")
        .header(ContentType::JSON)
        .body(
            r#"{
                "title": "silent",
                "agents": [
                    {"name": "Ada", "canMessageIds": []},
                    {"name": "Bolt", "canMessageIds": []}
                ]
            }"#,
        )
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let detail: serde_json::Value = res.into_json().unwrap();
    let conversations = detail["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 2);
    assert!(conversations.iter().all(|c| c["senderId"] == 0));
}

#[test]
fn test_create_project_with_referenced_agent_and_overrides() {
    let client = test_client();
    register(&client, "ada", "ada@example.com");

    let res = client
        .post("/api/agents")
        .header(ContentType::JSON)
        .body(r#"{"name": "Scout", "role": "researcher", "model": "test-model"}"#)
        .dispatch();
    let agent: serde_json::Value = res.into_json().unwrap();
    let agent_id = agent["id"].as_i64().unwrap();

    let res = client
        .post("/api/projects")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{
                "title": "mixed",
                "agents": [
                    {{"id": {agent_id}, "role": "archivist", "prompt": "Keep notes."}},
                    {{"name": "Bolt"}}
                ]
            }}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let detail: serde_json::Value = res.into_json().unwrap();
    let scout = detail["members"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["name"] == "Scout")
        .unwrap();
    // Per-project override wins over the agent's own role.
    assert_eq!(scout["role"], "archivist");
    assert_eq!(scout["prompt"], "Keep notes.");
}

#[test]
fn test_create_project_duplicate_title() {
    let client = test_client();
    register(&client, "ada", "ada@example.com");
    create_two_agent_project(&client, "dup", None);

    let res = client
        .post("/api/projects")
        .header(ContentType::JSON)
        .body(r#"{"title": "dup", "agents": [{"name": "Solo"}]}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);

    // Titles are unique per user, not globally.
    register(&client, "bob", "bob@example.com");
    let res = client
        .post("/api/projects")
        .header(ContentType::JSON)
        .body(r#"{"title": "dup", "agents": [{"name": "Solo"}]}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_create_project_rejects_foreign_or_system_agents() {
    let client = test_client();
    register(&client, "ada", "ada@example.com");
    let res = client
        .post("/api/agents")
        .header(ContentType::JSON)
        .body(r#"{"name": "AdaBot"}"#)
        .dispatch();
    let ada_bot = res.into_json::<serde_json::Value>().unwrap()["id"]
        .as_i64()
        .unwrap();

    register(&client, "bob", "bob@example.com");
    let res = client
        .post("/api/projects")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"title": "steal", "agents": [{{"id": {ada_bot}}}]}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    let res = client
        .post("/api/projects")
        .header(ContentType::JSON)
        .body(r#"{"title": "sys", "agents": [{"id": 0}]}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_delete_project_cascades() {
    let client = test_client();
    register(&client, "ada", "ada@example.com");
    let detail = create_two_agent_project(&client, "doomed", None);
    let project_id = detail["id"].as_i64().unwrap();
    let conv = detail["conversations"][0]["id"].as_i64().unwrap();

    client
        .post(format!("/api/messages/{conv}"))
        .header(ContentType::JSON)
        .body(r#"{"content": "hello"}"#)
        .dispatch();

    let res = client.delete(format!("/api/projects/{project_id}")).dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get(format!("/api/projects/{project_id}")).dispatch();
    assert_eq!(res.status(), Status::NotFound);

    let conn = roundtable::db::open_connection(&client.db_path).unwrap();
    for table in ["conversations", "messages", "project_agents", "logs", "agent_summaries"] {
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE project_id = ?1"),
                [project_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0, "{table} not cascaded");
    }
}

#[test]
fn test_status_toggle_and_exhausted_resume() {
    let client = test_client();
    register(&client, "ada", "ada@example.com");
    let detail = create_two_agent_project(&client, "toggle", None);
    let project_id = detail["id"].as_i64().unwrap();

    let res = client
        .post(format!("/api/projects/{project_id}/status"))
        .header(ContentType::JSON)
        .body(r#"{"paused": false}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["paused"], false);

    // Exhaust the budget, then resuming must be refused.
    client
        .patch(format!("/api/settings/project/{project_id}/limit"))
        .header(ContentType::JSON)
        .body(r#"{"limit": 0}"#)
        .dispatch();
    let res = client
        .post(format!("/api/projects/{project_id}/status"))
        .header(ContentType::JSON)
        .body(r#"{"paused": false}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn test_projects_scoped_to_owner() {
    let client = test_client();
    register(&client, "ada", "ada@example.com");
    let detail = create_two_agent_project(&client, "private", None);
    let project_id = detail["id"].as_i64().unwrap();

    register(&client, "bob", "bob@example.com");
    let res = client.get(format!("/api/projects/{project_id}")).dispatch();
    assert_eq!(res.status(), Status::NotFound);
    let res = client.delete(format!("/api/projects/{project_id}")).dispatch();
    assert_eq!(res.status(), Status::NotFound);

    let list: Vec<serde_json::Value> =
        client.get("/api/projects").dispatch().into_json().unwrap();
    assert!(list.is_empty());
}

#[test]
fn test_demo_project_read_only() {
    let db_path = temp_db_path();
    let mut config = test_config(&db_path);
    // First project created will get id 1.
    config.demo_project_ids = vec![1];
    let client = test_client_with(config, FakeLlm::unscripted());

    register(&client, "demo", "demo@example.com");
    let token_id = create_token(&client, "t", "sk-x");
    let detail = create_two_agent_project(&client, "demo-project", Some(token_id));
    let project_id = detail["id"].as_i64().unwrap();
    assert_eq!(project_id, 1);

    let res = client.delete(format!("/api/projects/{project_id}")).dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    let res = client
        .post(format!("/api/projects/{project_id}/status"))
        .header(ContentType::JSON)
        .body(r#"{"paused": false}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    let res = client
        .patch(format!("/api/settings/project/{project_id}/limit"))
        .header(ContentType::JSON)
        .body(r#"{"limit": 5}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    // No writes happened: still paused, still present.
    let after: serde_json::Value = client
        .get(format!("/api/projects/{project_id}"))
        .dispatch()
        .into_json()
        .unwrap();
    assert_eq!(after["paused"], true);
}
