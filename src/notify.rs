use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-question notifications. Submissions, grades, and
/// closes fan out to whoever is watching the question.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    /// Empty hub.
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a question. Creates the channel if needed.
    pub fn subscribe(&self, question_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(question_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, question_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&question_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when the question is removed).
    pub fn remove(&self, question_id: &Ulid) {
        self.channels.remove(question_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}
