use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use warden_moderation::Notifier;
use warden_types::events::ModerationEvent;

/// Fans moderation events out to every subscriber (mailer, audit log, ...).
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<ModerationEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModerationEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, event: ModerationEvent) {
        if self.tx.send(event).is_err() {
            debug!("Moderation event dropped: no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use warden_types::models::AppealStatus;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();

        let event = ModerationEvent::AppealResolved {
            appeal_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            moderator_id: Uuid::new_v4(),
            status: AppealStatus::Denied,
        };
        notifier.notify(event.clone()).await;

        assert_eq!(rx.recv().await.unwrap(), event);
    }
}
