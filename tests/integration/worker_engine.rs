// Turn-engine scenarios driven end-to-end: REST seeding, nudge-driven
// worker runs against a scripted fake provider, assertions on persisted
// state and published events.

use crate::common::{api, async_client_with, conversation_id, member_id, temp_db_path, test_config, FakeLlm};
use roundtable::events::ProjectEvent;
use std::sync::atomic::Ordering;
use std::sync::Arc;

struct Seeded {
    client: crate::common::AsyncTestClient,
    project_id: i64,
    ada: i64,
    bolt: i64,
    conv_system_ada: i64,
    conv_system_bolt: i64,
    conv_ada_bolt: i64,
}

/// Register a user, bind an active token, create the two-agent project and
/// resume it. The worker has everything it needs except a trigger.
async fn seed(fake: Arc<FakeLlm>, limit: Option<i64>) -> Seeded {
    let db_path = temp_db_path();
    let client = async_client_with(test_config(&db_path), fake).await;

    api::register(&client, "ada", "ada@example.com").await;
    let token_id = api::create_token(&client, "t", "sk-x").await;
    let detail = api::create_two_agent_project(&client, "turns", token_id).await;
    let project_id = detail["id"].as_i64().unwrap();
    let ada = member_id(&detail, "Ada");
    let bolt = member_id(&detail, "Bolt");
    let seeded = Seeded {
        conv_system_ada: conversation_id(&detail, 0, ada),
        conv_system_bolt: conversation_id(&detail, 0, bolt),
        conv_ada_bolt: conversation_id(&detail, ada, bolt),
        client,
        project_id,
        ada,
        bolt,
    };
    if let Some(limit) = limit {
        api::set_limit(&seeded.client, project_id, limit).await;
    }
    api::resume(&seeded.client, project_id).await;
    seeded
}

/// S1 — one kickoff drives Ada → Bolt → System, with live-update events in
/// commit order.
#[rocket::async_test]
async fn test_end_to_end_turn() {
    let fake = FakeLlm::scripted(vec![
        FakeLlm::reply(2, "Bolt, take a look at this."),
        FakeLlm::reply(0, "All done, reporting back."),
    ]);
    let s = seed(fake.clone(), None).await;

    let hub = s.client.rocket().state::<roundtable::hub::Hub>().unwrap();
    let mut rx = hub.sender.subscribe();

    let kickoff = api::send_message(&s.client, s.conv_system_ada, "kickoff").await;
    assert_eq!(kickoff["senderId"], 0);
    assert_eq!(kickoff["receiverId"], s.ada);
    assert_eq!(kickoff["status"], "pending");

    // Drain: the final message (Bolt → System) is terminal once sent.
    let mut finished = false;
    for _ in 0..300 {
        let msgs = api::messages(&s.client, s.conv_system_bolt).await;
        if msgs.iter().any(|m| m["senderId"] == s.bolt && m["status"] == "sent") {
            finished = true;
            break;
        }
        api::tick().await;
    }
    assert!(finished, "worker did not drain the project");

    // Kickoff was answered in the Ada–Bolt conversation.
    let msgs = api::messages(&s.client, s.conv_ada_bolt).await;
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0]["senderId"], s.ada);
    assert_eq!(msgs[0]["receiverId"], s.bolt);
    assert_eq!(msgs[0]["type"], "assistant");
    assert_eq!(msgs[0]["content"], "Bolt, take a look at this.");

    // Trigger marked sent.
    let msgs = api::messages(&s.client, s.conv_system_ada).await;
    assert_eq!(msgs[0]["status"], "sent");

    // Two assistant inserts, two budget decrements.
    let project = api::project(&s.client, s.project_id).await;
    assert_eq!(
        project["messageLimit"].as_i64().unwrap(),
        roundtable::config::Config::default().default_message_limit - 2
    );
    assert_eq!(fake.calls.load(Ordering::SeqCst), 2);

    // Event order follows commit order: the kickoff lands before its
    // status change, which lands before the reply that caused it.
    let mut frames = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        frames.push(ev);
    }
    let kickoff_id = kickoff["id"].as_i64().unwrap();
    let new_kickoff = frames.iter().position(
        |e| matches!(e, ProjectEvent::NewMessage(m) if m.id == kickoff_id),
    );
    let kickoff_sent = frames.iter().position(|e| {
        matches!(e, ProjectEvent::MessageUpdated { id, .. } if *id == kickoff_id)
    });
    let new_reply = frames.iter().position(
        |e| matches!(e, ProjectEvent::NewMessage(m) if m.sender_id == s.ada),
    );
    assert!(new_kickoff.unwrap() < kickoff_sent.unwrap());
    assert!(kickoff_sent.unwrap() <= new_reply.unwrap());
}

/// S2 — the model never produces valid output: trigger fails, one error
/// log, no reply.
#[rocket::async_test]
async fn test_retry_then_give_up() {
    let fake = FakeLlm::scripted(vec![
        Ok("not even json".to_string()),
        Ok("{\"recipient\": \"wrong shape\"}".to_string()),
        Err("connection reset".to_string()),
    ]);
    let s = seed(fake.clone(), None).await;

    api::send_message(&s.client, s.conv_system_ada, "kickoff").await;

    let mut failed = false;
    for _ in 0..300 {
        let msgs = api::messages(&s.client, s.conv_system_ada).await;
        if msgs.first().map(|m| m["status"] == "failed").unwrap_or(false) {
            failed = true;
            break;
        }
        api::tick().await;
    }
    assert!(failed, "trigger never transitioned to failed");
    assert_eq!(fake.calls.load(Ordering::SeqCst), 3); // max-retries total attempts

    let logs = api::logs(&s.client, s.project_id).await;
    assert_eq!(
        logs.iter()
            .filter(|l| l["code"] == "format-invalid" && l["level"] == "error")
            .count(),
        1
    );

    // No reply was inserted anywhere.
    assert!(api::messages(&s.client, s.conv_ada_bolt).await.is_empty());
    assert!(api::messages(&s.client, s.conv_system_bolt).await.is_empty());
}

/// Invalid replies are corrected mid-turn: one bad attempt, then success.
#[rocket::async_test]
async fn test_correction_loop_recovers() {
    let fake = FakeLlm::scripted(vec![
        FakeLlm::reply(99, "who is this?"), // not an allowed recipient
        FakeLlm::reply(2, "second try"),
    ]);
    let s = seed(fake.clone(), None).await;

    api::send_message(&s.client, s.conv_system_ada, "kickoff").await;

    let mut replied = false;
    for _ in 0..300 {
        let msgs = api::messages(&s.client, s.conv_ada_bolt).await;
        if !msgs.is_empty() {
            replied = true;
            break;
        }
        api::tick().await;
    }
    assert!(replied);
    assert!(fake.calls.load(Ordering::SeqCst) >= 2);

    let msgs = api::messages(&s.client, s.conv_ada_bolt).await;
    assert_eq!(msgs[0]["content"], "second try");
    // No failure log: the correction loop absorbed the bad attempt.
    let logs = api::logs(&s.client, s.project_id).await;
    assert!(logs.iter().all(|l| l["code"] != "format-invalid"));
}

/// S3 — budget 1: the single reply exhausts it, pauses the project, and
/// the reply itself is never processed.
#[rocket::async_test]
async fn test_budget_exhaustion_pauses() {
    let fake = FakeLlm::scripted(vec![FakeLlm::reply(2, "last words")]);
    let s = seed(fake.clone(), Some(1)).await;

    api::send_message(&s.client, s.conv_system_ada, "kickoff").await;

    let mut paused = false;
    for _ in 0..300 {
        let project = api::project(&s.client, s.project_id).await;
        if project["paused"] == true {
            paused = true;
            assert_eq!(project["messageLimit"], 0);
            break;
        }
        api::tick().await;
    }
    assert!(paused, "project never auto-paused");

    let logs = api::logs(&s.client, s.project_id).await;
    assert!(logs.iter().any(|l| l["code"] == "message-limit" && l["level"] == "warn"));

    // The reply stays pending: a paused project gets no further turns.
    let msgs = api::messages(&s.client, s.conv_ada_bolt).await;
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0]["status"], "pending");
    assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
}

/// S6 — inactive token: the run logs `token-inactive` and makes no LLM
/// calls; the trigger stays pending for a later retry.
#[rocket::async_test]
async fn test_inactive_token_stops_run() {
    let fake = FakeLlm::unscripted();
    let s = seed(fake.clone(), None).await;

    // Token id 1 is the only token; disable it after binding.
    let res = s
        .client
        .patch("/api/tokens/1/disable")
        .dispatch()
        .await;
    assert_eq!(res.status(), rocket::http::Status::Ok);

    api::send_message(&s.client, s.conv_system_ada, "kickoff").await;

    let mut logged = false;
    for _ in 0..300 {
        let logs = api::logs(&s.client, s.project_id).await;
        if logs.iter().any(|l| l["code"] == "token-inactive" && l["level"] == "warn") {
            logged = true;
            break;
        }
        api::tick().await;
    }
    assert!(logged, "no token-inactive warn log");
    assert_eq!(fake.calls.load(Ordering::SeqCst), 0);

    let msgs = api::messages(&s.client, s.conv_system_ada).await;
    assert_eq!(msgs[0]["status"], "pending");
}

/// No bound token at all: warn `token-unavailable`, run stops.
#[rocket::async_test]
async fn test_missing_token_stops_run() {
    let db_path = temp_db_path();
    let fake = FakeLlm::unscripted();
    let client = async_client_with(test_config(&db_path), fake.clone()).await;

    api::register(&client, "ada", "ada@example.com").await;
    let res = client
        .post("/api/projects")
        .header(rocket::http::ContentType::JSON)
        .body(r#"{"title": "no-token", "agents": [{"name": "Ada"}]}"#)
        .dispatch()
        .await;
    let detail: serde_json::Value = res.into_json().await.unwrap();
    let project_id = detail["id"].as_i64().unwrap();
    let ada = member_id(&detail, "Ada");
    let conv = conversation_id(&detail, 0, ada);
    api::resume(&client, project_id).await;

    api::send_message(&client, conv, "kickoff").await;

    let mut logged = false;
    for _ in 0..300 {
        let logs = api::logs(&client, project_id).await;
        if logs.iter().any(|l| l["code"] == "token-unavailable") {
            logged = true;
            break;
        }
        api::tick().await;
    }
    assert!(logged, "no token-unavailable warn log");
    assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
}

/// Memory: reaching the summary threshold condenses the agent's history
/// and resets its counter.
#[rocket::async_test]
async fn test_summary_threshold_triggers_condensation() {
    let db_path = temp_db_path();
    let mut config = test_config(&db_path);
    config.summary_threshold = 1; // summarize after every reply
    let fake = FakeLlm::scripted(vec![
        FakeLlm::reply(2, "Bolt, your turn."),
        Ok("Ada asked Bolt to take over.".to_string()), // Ada's summary
        FakeLlm::reply(0, "Finished."),
        Ok("Bolt finished the task.".to_string()), // Bolt's summary
    ]);
    let client = async_client_with(config, fake.clone()).await;

    api::register(&client, "ada", "ada@example.com").await;
    let token_id = api::create_token(&client, "t", "sk-x").await;
    let detail = api::create_two_agent_project(&client, "memory", token_id).await;
    let project_id = detail["id"].as_i64().unwrap();
    let ada = member_id(&detail, "Ada");
    let conv = conversation_id(&detail, 0, ada);
    api::resume(&client, project_id).await;

    api::send_message(&client, conv, "kickoff").await;

    let mut summarized = false;
    for _ in 0..300 {
        let res = client
            .get(format!("/api/internal/projects/{project_id}/summaries"))
            .header(rocket::http::Header::new(
                "X-Brain-Api-Key",
                "dev-internal-key-change-me",
            ))
            .dispatch()
            .await;
        let summaries: Vec<serde_json::Value> = res.into_json().await.unwrap();
        if summaries.len() == 2 {
            summarized = true;
            let ada_summary = summaries.iter().find(|s| s["agentId"] == ada).unwrap();
            assert_eq!(ada_summary["summary"], "Ada asked Bolt to take over.");
            assert_eq!(ada_summary["messageCount"], 0);
            assert_eq!(ada_summary["summaryCount"], 1);
            assert!(ada_summary["snapshot"].is_string());
            break;
        }
        api::tick().await;
    }
    assert!(summarized, "summaries never materialized");
    assert_eq!(fake.calls.load(Ordering::SeqCst), 4);
}

/// Summarization failure logs a warning but never aborts the run.
#[rocket::async_test]
async fn test_summary_failure_does_not_abort() {
    let db_path = temp_db_path();
    let mut config = test_config(&db_path);
    config.summary_threshold = 1;
    let fake = FakeLlm::scripted(vec![
        FakeLlm::reply(0, "Reporting straight back."),
        Err("summarizer down".to_string()),
    ]);
    let client = async_client_with(config, fake.clone()).await;

    api::register(&client, "ada", "ada@example.com").await;
    let token_id = api::create_token(&client, "t", "sk-x").await;
    let detail = api::create_two_agent_project(&client, "memory", token_id).await;
    let project_id = detail["id"].as_i64().unwrap();
    let ada = member_id(&detail, "Ada");
    let conv = conversation_id(&detail, 0, ada);
    api::resume(&client, project_id).await;

    api::send_message(&client, conv, "kickoff").await;

    // The reply (Ada → System) still lands and is delivered terminally.
    let mut delivered = false;
    for _ in 0..300 {
        let msgs = api::messages(&client, conv).await;
        if msgs
            .iter()
            .any(|m| m["senderId"] == ada && m["status"] == "sent")
        {
            delivered = true;
            break;
        }
        api::tick().await;
    }
    assert!(delivered, "reply was not delivered");

    let logs = api::logs(&client, project_id).await;
    assert!(logs.iter().any(|l| l["code"] == "summary-failed" && l["level"] == "warn"));
}
