//! Push-notification collaborator seam.
//!
//! Offline delivery is not this subsystem's job: when a message is
//! persisted and broadcast, the gateway learns the recipient list and the
//! notification content, nothing more. Whether a given recipient actually
//! received anything is invisible here.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use parley_core::ids::{ChatId, UserId};
use parley_core::message::MessageType;

/// Notification content for one new message.
pub struct MessageNotification {
    pub recipients: Vec<UserId>,
    pub sender_name: String,
    pub body: String,
    pub chat_id: ChatId,
    pub message_type: MessageType,
    /// Set for group chats so clients can render "chat: sender: body".
    pub chat_name: Option<String>,
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn notify_new_message(&self, notification: MessageNotification);
}

/// Default gateway: logs and drops. Stands in wherever no real push
/// provider is configured.
pub struct NoopPushGateway;

#[async_trait]
impl PushGateway for NoopPushGateway {
    async fn notify_new_message(&self, notification: MessageNotification) {
        debug!(
            chat_id = %notification.chat_id,
            recipients = notification.recipients.len(),
            "push gateway disabled, dropping notification"
        );
    }
}

/// Hand a notification to the gateway on a detached task. The spawning
/// call site must not depend on completion or result; failures stay inside
/// the task.
pub fn spawn_notify(gateway: Arc<dyn PushGateway>, notification: MessageNotification) {
    tokio::spawn(async move {
        if notification.recipients.is_empty() {
            return;
        }
        gateway.notify_new_message(notification).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGateway {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PushGateway for CountingGateway {
        async fn notify_new_message(&self, _notification: MessageNotification) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn notification() -> MessageNotification {
        MessageNotification {
            recipients: vec![UserId::from_raw("user_b")],
            sender_name: "ana".into(),
            body: "hi".into(),
            chat_id: ChatId::from_raw("c1"),
            message_type: MessageType::Text,
            chat_name: None,
        }
    }

    #[tokio::test]
    async fn spawn_notify_reaches_gateway() {
        let gateway = Arc::new(CountingGateway { calls: AtomicUsize::new(0) });
        spawn_notify(gateway.clone(), notification());

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn noop_gateway_accepts_notifications() {
        NoopPushGateway.notify_new_message(notification()).await;
    }
}
