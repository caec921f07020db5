use crate::models::{Log, Message, MessageStatus};

/// State changes streamed to subscribed UI clients. Published after the
/// owning transaction commits, never before.
#[derive(Debug, Clone)]
pub enum ProjectEvent {
    NewMessage(Message),
    MessageUpdated {
        id: i64,
        conversation_id: i64,
        project_id: i64,
        status: MessageStatus,
    },
    ProjectUpdated {
        project_id: i64,
        fields: serde_json::Value,
    },
}

impl ProjectEvent {
    pub fn project_id(&self) -> i64 {
        match self {
            ProjectEvent::NewMessage(m) => m.project_id,
            ProjectEvent::MessageUpdated { project_id, .. } => *project_id,
            ProjectEvent::ProjectUpdated { project_id, .. } => *project_id,
        }
    }

    /// Wire frame pushed over the live-update channel: `{type, payload}`.
    pub fn frame(&self) -> serde_json::Value {
        match self {
            ProjectEvent::NewMessage(m) => serde_json::json!({
                "type": "new_message",
                "payload": m,
            }),
            ProjectEvent::MessageUpdated {
                id,
                conversation_id,
                project_id,
                status,
            } => serde_json::json!({
                "type": "message_updated",
                "payload": {
                    "id": id,
                    "conversationId": conversation_id,
                    "projectId": project_id,
                    "status": status,
                },
            }),
            ProjectEvent::ProjectUpdated { project_id, fields } => {
                let mut payload = serde_json::json!({ "projectId": project_id });
                if let (Some(obj), Some(extra)) = (payload.as_object_mut(), fields.as_object()) {
                    for (k, v) in extra {
                        obj.insert(k.clone(), v.clone());
                    }
                }
                serde_json::json!({
                    "type": "project_updated",
                    "payload": payload,
                })
            }
        }
    }

    /// Convenience constructor for the common "paused flag flipped" update.
    pub fn paused_changed(project_id: i64, paused: bool) -> Self {
        ProjectEvent::ProjectUpdated {
            project_id,
            fields: serde_json::json!({ "paused": paused }),
        }
    }

    /// A new log row, delivered as a project update (clients refetch logs).
    pub fn log_appended(log: &Log) -> Self {
        ProjectEvent::ProjectUpdated {
            project_id: log.project_id,
            fields: serde_json::json!({ "log": log }),
        }
    }
}
