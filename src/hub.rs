use crate::events::ProjectEvent;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Max frames buffered per project while it has no live subscriber.
/// Overflow drops the oldest frame.
const PENDING_BUFFER_CAP: usize = 256;

/// Live-update hub: a broadcast bus for connected subscribers plus
/// bounded per-project replay buffers for projects nobody is watching.
/// The first subscriber to join a project receives the buffered frames
/// (in publish order) and the buffer is cleared.
#[derive(Clone)]
pub struct Hub {
    pub sender: broadcast::Sender<ProjectEvent>,
    inner: Arc<Mutex<HubInner>>,
}

#[derive(Default)]
struct HubInner {
    /// Live subscriber count per project.
    subscribers: HashMap<i64, usize>,
    /// Frames waiting for the next subscriber, per project.
    pending: HashMap<i64, VecDeque<serde_json::Value>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Hub {
            sender,
            inner: Arc::new(Mutex::new(HubInner::default())),
        }
    }

    /// Publish an event. Live subscribers get it via the broadcast bus
    /// (fire-and-forget); if the project has none, the frame is buffered.
    pub fn publish(&self, event: ProjectEvent) {
        let project_id = event.project_id();
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let watching = inner.subscribers.get(&project_id).copied().unwrap_or(0);
            if watching == 0 {
                let buffer = inner.pending.entry(project_id).or_default();
                if buffer.len() >= PENDING_BUFFER_CAP {
                    buffer.pop_front();
                    eprintln!("⚠️  live-update buffer full for project {project_id}, dropping oldest");
                }
                buffer.push_back(event.frame());
            }
        }
        // Ignore send errors (no subscribers at all).
        let _ = self.sender.send(event);
    }

    /// Register a subscriber for a project. Returns any buffered frames;
    /// the buffer is cleared.
    pub fn join(&self, project_id: i64) -> Vec<serde_json::Value> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *inner.subscribers.entry(project_id).or_insert(0) += 1;
        inner
            .pending
            .remove(&project_id)
            .map(|buf| buf.into())
            .unwrap_or_default()
    }

    pub fn leave(&self, project_id: i64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = inner.subscribers.get_mut(&project_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inner.subscribers.remove(&project_id);
            }
        }
    }
}

/// RAII guard that deregisters a subscriber when its connection drops.
pub struct JoinGuard {
    pub hub: Hub,
    pub project_id: i64,
}

impl Drop for JoinGuard {
    fn drop(&mut self) {
        self.hub.leave(self.project_id);
    }
}
