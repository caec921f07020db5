use crate::config::Config;
use crate::crypto;
use crate::db::{open_connection, SYSTEM_AGENT_ID};
use crate::events::ProjectEvent;
use crate::hub::Hub;
use crate::llm::{reply_schema, AgentReply, ChatMessage, ChatRequest, LlmProvider};
use crate::models::{LogLevel, MessageStatus};
use crate::store::{self, MemberContext, ProjectContext};
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Messages included in the whole-project tail of a context snapshot.
const RECENT_CONTEXT_LIMIT: i64 = 50;

/// Floor for the short-term prompt window; the ceiling is the configured
/// history window.
const MIN_HISTORY: usize = 4;

/// The turn worker: drains a project's pending messages until a stop
/// condition (paused, budget exhausted, token unavailable, queue empty).
///
/// Nudges are coalesced: at most one run per project at any instant. A
/// nudge that arrives mid-run flips the project's `recheck` flag and the
/// active run loops again after its current drain.
pub struct Worker {
    db_path: String,
    hub: Hub,
    config: Arc<Config>,
    llm: Arc<dyn LlmProvider>,
    slots: Mutex<HashMap<i64, Slot>>,
}

#[derive(Default)]
struct Slot {
    busy: bool,
    recheck: bool,
}

/// A reply that survived validation, with its conversation resolved.
struct ValidReply {
    recipient_id: i64,
    conversation_id: i64,
    body: String,
}

impl Worker {
    pub fn new(
        db_path: &str,
        hub: Hub,
        config: Arc<Config>,
        llm: Arc<dyn LlmProvider>,
    ) -> Arc<Self> {
        Arc::new(Worker {
            db_path: db_path.to_string(),
            hub,
            config,
            llm,
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// Request a run for a project. Non-blocking; returns immediately.
    pub fn nudge(self: &Arc<Self>, project_id: i64) {
        {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let slot = slots.entry(project_id).or_default();
            if slot.busy {
                slot.recheck = true;
                return;
            }
            slot.busy = true;
        }

        let worker = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                worker.process(project_id).await;
                let mut slots = worker.slots.lock().unwrap_or_else(|e| e.into_inner());
                let slot = slots.entry(project_id).or_default();
                if slot.recheck {
                    slot.recheck = false;
                    drop(slots);
                    continue;
                }
                slot.busy = false;
                break;
            }
        });
    }

    /// One run: drain everything pending for the project. Public so tests
    /// can drive the turn engine without nudge timing.
    pub async fn process(&self, project_id: i64) {
        let mut conn = match open_connection(&self.db_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("💥 worker: failed to open DB for project {project_id}: {e}");
                return;
            }
        };
        // Internal errors terminate the run without touching the trigger;
        // it stays pending and is retried on the next nudge.
        if let Err(e) = self.drain(&mut conn, project_id).await {
            eprintln!("💥 worker: run for project {project_id} aborted: {e}");
        }
    }

    async fn drain(&self, conn: &mut Connection, project_id: i64) -> rusqlite::Result<()> {
        let Some(ctx) = store::get_context(conn, project_id, RECENT_CONTEXT_LIMIT)? else {
            return Ok(());
        };

        let mut api_key: Option<String> = None;
        loop {
            let Some(flags) = store::project_flags(conn, project_id)? else {
                return Ok(());
            };
            if flags.paused || flags.budget <= 0 {
                return Ok(());
            }
            let pending = store::pending_queue(conn, project_id)?;
            let Some(trigger) = pending.into_iter().next() else {
                return Ok(());
            };
            if !flags.token_active {
                let (code, detail) = if ctx.project.token_id.is_none() {
                    ("token-unavailable", "No API token bound to this project")
                } else {
                    ("token-inactive", "Bound API token is disabled")
                };
                let log =
                    store::create_log(conn, project_id, LogLevel::Warn, Some(code), detail)?;
                self.hub.publish(ProjectEvent::log_appended(&log));
                return Ok(());
            }
            if api_key.is_none() {
                let decrypted = ctx.token.as_ref().and_then(|t| {
                    crypto::decrypt_secret(&self.config.encryption_key, &t.secret_enc)
                });
                match decrypted {
                    Some(key) => api_key = Some(key),
                    None => {
                        let log = store::create_log(
                            conn,
                            project_id,
                            LogLevel::Warn,
                            Some("token-unavailable"),
                            "Bound API token could not be decrypted",
                        )?;
                        self.hub.publish(ProjectEvent::log_appended(&log));
                        return Ok(());
                    }
                }
            }

            self.take_turn(conn, &ctx, api_key.as_deref().unwrap_or_default(), &trigger)
                .await?;
        }
    }

    /// One turn: build the prompt for the trigger's receiver, call the
    /// model (with a bounded correction loop), persist the outcome.
    async fn take_turn(
        &self,
        conn: &mut Connection,
        ctx: &ProjectContext,
        api_key: &str,
        trigger: &crate::models::Message,
    ) -> rusqlite::Result<()> {
        let responder_id = trigger.receiver_id;

        // Messages addressed to the System agent are for the human; they
        // are delivered, not responded to.
        let Some(member) = ctx
            .members
            .get(&responder_id)
            .filter(|_| responder_id != SYSTEM_AGENT_ID)
        else {
            if store::update_message_status(conn, trigger.id, MessageStatus::Sent)?.is_some() {
                self.hub.publish(ProjectEvent::MessageUpdated {
                    id: trigger.id,
                    conversation_id: trigger.conversation_id,
                    project_id: trigger.project_id,
                    status: MessageStatus::Sent,
                });
            }
            return Ok(());
        };

        let model = if member.model.is_empty() {
            self.config.default_model.clone()
        } else {
            member.model.clone()
        };
        let mut messages = self.build_prompt(conn, ctx, member, trigger)?;

        for attempt in 1..=self.config.max_retries {
            // A pause (manual, budget, watchdog) or token change cancels
            // the turn at the next retry boundary.
            if attempt > 1 {
                match store::project_flags(conn, ctx.project.id)? {
                    Some(flags) if !flags.paused && flags.budget > 0 && flags.token_active => {}
                    _ => return Ok(()),
                }
            }

            let request = ChatRequest {
                model: model.clone(),
                api_key: api_key.to_string(),
                messages: messages.clone(),
                schema: Some(reply_schema()),
            };
            let outcome = match self.llm.chat(&request).await {
                // Transport-level failures count as retries, same as
                // malformed replies.
                Err(e) => Err(format!("the model call failed ({e})")),
                Ok(content) => self.validate_reply(ctx, member, &content),
            };

            match outcome {
                Ok(reply) => {
                    let persisted = store::persist_reply(
                        conn,
                        trigger.id,
                        reply.conversation_id,
                        ctx.project.id,
                        responder_id,
                        reply.recipient_id,
                        &reply.body,
                    )?;
                    self.hub.publish(ProjectEvent::MessageUpdated {
                        id: trigger.id,
                        conversation_id: trigger.conversation_id,
                        project_id: trigger.project_id,
                        status: MessageStatus::Sent,
                    });
                    self.hub
                        .publish(ProjectEvent::NewMessage(persisted.reply.clone()));
                    if let Some(ref log) = persisted.budget.limit_log {
                        self.hub.publish(ProjectEvent::log_appended(log));
                    }
                    if persisted.budget.newly_paused {
                        self.hub
                            .publish(ProjectEvent::paused_changed(ctx.project.id, true));
                    }

                    if persisted.agent_count >= self.config.summary_threshold {
                        self.summarize(conn, ctx, member, api_key, &model).await?;
                    }
                    return Ok(());
                }
                Err(violation) => {
                    messages.push(ChatMessage::system(format!(
                        "Your previous reply was rejected: {violation}. Reply again with \
                         JSON of the form {{\"recipient_id\": <allowed id>, \"body\": \"...\"}}."
                    )));
                }
            }
        }

        // Out of attempts: fail the trigger and move on to the next one.
        if store::update_message_status(conn, trigger.id, MessageStatus::Failed)?.is_some() {
            self.hub.publish(ProjectEvent::MessageUpdated {
                id: trigger.id,
                conversation_id: trigger.conversation_id,
                project_id: trigger.project_id,
                status: MessageStatus::Failed,
            });
        }
        let log = store::create_log(
            conn,
            ctx.project.id,
            LogLevel::Error,
            Some("format-invalid"),
            &format!(
                "No valid reply from {} after {} attempts",
                member.name, self.config.max_retries
            ),
        )?;
        self.hub.publish(ProjectEvent::log_appended(&log));
        Ok(())
    }

    /// Ordered prompt: system identity block, long-term summary, short-term
    /// window (newest last), then the trigger itself.
    fn build_prompt(
        &self,
        conn: &Connection,
        ctx: &ProjectContext,
        member: &MemberContext,
        trigger: &crate::models::Message,
    ) -> rusqlite::Result<Vec<ChatMessage>> {
        let mut intro = String::new();
        if !ctx.project.system_prompt.is_empty() {
            intro.push_str(&ctx.project.system_prompt);
            intro.push_str("\n\n");
        }
        intro.push_str(&format!("You are {}.", member.name));
        if !member.role.is_empty() {
            intro.push_str(&format!(" Your role: {}.", member.role));
        }
        if !member.prompt.is_empty() {
            intro.push('\n');
            intro.push_str(&member.prompt);
        }
        let mut directory: Vec<String> = member
            .can_message
            .iter()
            .filter(|id| **id != member.agent_id)
            .filter_map(|id| ctx.members.get(id))
            .map(|m| format!("  {}: {}", m.agent_id, m.name))
            .collect();
        directory.push(format!("  {SYSTEM_AGENT_ID}: System (the user)"));
        intro.push_str(&format!(
            "\n\nYou may address exactly one recipient per reply:\n{}\n\
             Respond with JSON: {{\"recipient_id\": <id>, \"body\": \"<your message>\"}}.",
            directory.join("\n")
        ));

        let mut messages = vec![ChatMessage::system(intro)];

        if let Some(ref summary) = member.summary {
            messages.push(ChatMessage::system(format!(
                "Your long-term memory of this project so far:\n{summary}"
            )));
        }

        let window = (member.message_count as usize)
            .clamp(MIN_HISTORY, self.config.history_window.max(MIN_HISTORY));
        let mut recent = store::recent_agent_messages(
            conn,
            ctx.project.id,
            member.agent_id,
            window as i64,
        )?;
        recent.reverse(); // newest last
        for msg in &recent {
            if msg.sender_id == member.agent_id {
                messages.push(ChatMessage::assistant(msg.content.clone()));
            } else {
                messages.push(ChatMessage::user(format!(
                    "{}: {}",
                    display_name(ctx, msg.sender_id),
                    msg.content
                )));
            }
        }

        messages.push(ChatMessage::user(format!(
            "{}: {}",
            display_name(ctx, trigger.sender_id),
            trigger.content
        )));
        Ok(messages)
    }

    /// Schema, permission, and size checks on a raw model reply.
    fn validate_reply(
        &self,
        ctx: &ProjectContext,
        member: &MemberContext,
        content: &str,
    ) -> Result<ValidReply, String> {
        let reply: AgentReply = serde_json::from_str(content.trim())
            .map_err(|_| "it was not valid JSON with recipient_id and body".to_string())?;

        if reply.recipient_id == member.agent_id {
            return Err("you cannot address yourself".to_string());
        }
        let permitted = reply.recipient_id == SYSTEM_AGENT_ID
            || member.can_message.contains(&reply.recipient_id);
        if !permitted {
            return Err(format!(
                "recipient_id {} is not an agent you may address",
                reply.recipient_id
            ));
        }

        let body = reply.body.trim().to_string();
        if body.is_empty() {
            return Err("body must not be empty".to_string());
        }
        if body.len() > self.config.max_message_length {
            return Err(format!(
                "body exceeds the {} character limit",
                self.config.max_message_length
            ));
        }

        let (low, high) = if member.agent_id <= reply.recipient_id {
            (member.agent_id, reply.recipient_id)
        } else {
            (reply.recipient_id, member.agent_id)
        };
        let conversation_id = ctx
            .conversations
            .iter()
            .find(|c| c.sender_id == low && c.receiver_id == high)
            .map(|c| c.id)
            .ok_or_else(|| {
                format!("no conversation exists with agent {}", reply.recipient_id)
            })?;

        Ok(ValidReply {
            recipient_id: reply.recipient_id,
            conversation_id,
            body,
        })
    }

    /// Condense the agent's recent traffic into long-term memory. Failures
    /// are logged and swallowed; summarization never aborts a run.
    async fn summarize(
        &self,
        conn: &Connection,
        ctx: &ProjectContext,
        member: &MemberContext,
        api_key: &str,
        model: &str,
    ) -> rusqlite::Result<()> {
        let mut window = store::recent_agent_messages(
            conn,
            ctx.project.id,
            member.agent_id,
            self.config.summary_window,
        )?;
        window.reverse();
        let transcript = window
            .iter()
            .map(|m| format!("{}: {}", display_name(ctx, m.sender_id), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let prior = store::get_summary(conn, ctx.project.id, member.agent_id)?
            .map(|s| s.summary)
            .filter(|s| !s.is_empty());
        let mut input = String::new();
        if let Some(prior) = prior {
            input.push_str(&format!("Previous summary:\n{prior}\n\n"));
        }
        input.push_str(&format!("Recent messages:\n{transcript}"));

        let request = ChatRequest {
            model: model.to_string(),
            api_key: api_key.to_string(),
            messages: vec![
                ChatMessage::system(format!(
                    "Condense the following conversation excerpts into a third-person \
                     memory summary of {}'s interactions. Keep decisions, facts, and open \
                     threads. Reply with the summary text only.",
                    member.name
                )),
                ChatMessage::user(input),
            ],
            schema: None,
        };

        match self.llm.chat(&request).await {
            Ok(text) if !text.trim().is_empty() => {
                store::upsert_summary(
                    conn,
                    ctx.project.id,
                    member.agent_id,
                    text.trim(),
                    Some(&transcript),
                )?;
            }
            other => {
                let detail = match other {
                    Err(e) => e.to_string(),
                    Ok(_) => "empty summary".to_string(),
                };
                let log = store::create_log(
                    conn,
                    ctx.project.id,
                    LogLevel::Warn,
                    Some("summary-failed"),
                    &format!("Could not summarize memory for {}: {detail}", member.name),
                )?;
                self.hub.publish(ProjectEvent::log_appended(&log));
            }
        }
        Ok(())
    }
}

fn display_name(ctx: &ProjectContext, agent_id: i64) -> String {
    if agent_id == SYSTEM_AGENT_ID {
        return "System".to_string();
    }
    ctx.members
        .get(&agent_id)
        .map(|m| m.name.clone())
        .unwrap_or_else(|| format!("agent {agent_id}"))
}
