use async_trait::async_trait;
use std::sync::Mutex;

use warden_types::events::ModerationEvent;

/// Outbound notifications (email, push, in-app). Delivery is best effort:
/// a failed notification never undoes the moderation action that caused it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: ModerationEvent);
}

/// Drops every event.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _event: ModerationEvent) {}
}

/// Keeps every event in memory; handy for tests and local tooling.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<ModerationEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<ModerationEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: ModerationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
