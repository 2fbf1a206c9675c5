use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use quorum_db::Database;
use quorum_types::api::{Page, PageRequest};
use quorum_types::events::GatewayEvent;
use quorum_types::models::{Notification, NotificationContext, NotificationKind};

use crate::error::{CoreError, CoreResult};

/// Fire-and-forget push channel. Injected into the dispatcher so the core
/// never reaches for a process-wide socket handle.
pub trait LivePublisher: Send + Sync {
    /// Deliver `event` to everyone subscribed to `topic`.
    fn publish(&self, topic: &str, event: GatewayEvent) -> anyhow::Result<()>;

    /// Deliver `event` to every connected client (live feed).
    fn broadcast(&self, event: GatewayEvent);
}

/// Per-recipient topic name.
pub fn user_topic(user_id: Uuid) -> String {
    format!("user-{}", user_id)
}

/// Title and message for a notification, with the actor's name filled in.
pub fn render(kind: NotificationKind, actor: &str, context: &NotificationContext) -> (String, String) {
    let (title, message) = match kind {
        NotificationKind::NewAnswer => ("New Answer", format!("{} answered your question", actor)),
        NotificationKind::NewComment => {
            let on = if context.answer_id.is_some() { "answer" } else { "question" };
            ("New Comment", format!("{} commented on your {}", actor, on))
        }
        NotificationKind::QuestionLike => ("Question Liked", format!("{} liked your question", actor)),
        NotificationKind::AnswerLike => ("Answer Liked", format!("{} liked your answer", actor)),
        NotificationKind::AnswerAccepted => ("Answer Accepted", format!("{} accepted your answer", actor)),
        NotificationKind::QuestionVote => ("Question Voted", format!("{} voted on your question", actor)),
        NotificationKind::AnswerVote => ("Answer Voted", format!("{} voted on your answer", actor)),
        NotificationKind::CommentLike => ("Comment Liked", format!("{} liked your comment", actor)),
        _ => ("Notification", "You have a new notification".to_string()),
    };
    (title.to_string(), message)
}

/// Turns completed actions into inbox entries and live pushes.
///
/// The inbox (database) is authoritative: a notification is persisted
/// before it is pushed, and a failed push is logged, never reported.
#[derive(Clone)]
pub struct NotificationDispatcher {
    db: Arc<Database>,
    publisher: Arc<dyn LivePublisher>,
}

impl NotificationDispatcher {
    pub fn new(db: Arc<Database>, publisher: Arc<dyn LivePublisher>) -> Self {
        Self { db, publisher }
    }

    /// Returns `Ok(None)` without writing anything when the actor is the
    /// recipient: nobody is notified about their own actions.
    pub fn notify(
        &self,
        kind: NotificationKind,
        recipient_id: Uuid,
        actor_id: Uuid,
        context: NotificationContext,
    ) -> CoreResult<Option<Notification>> {
        if recipient_id == actor_id {
            debug!("Suppressed {} notification to self ({})", kind, actor_id);
            return Ok(None);
        }

        let actor_name = self
            .db
            .get_username_by_id(actor_id)?
            .unwrap_or_else(|| "Someone".to_string());
        let (title, message) = render(kind, &actor_name, &context);

        let notification = Notification {
            id: Uuid::new_v4(),
            recipient_id,
            kind,
            title,
            message,
            question_id: context.question_id,
            answer_id: context.answer_id,
            comment_id: context.comment_id,
            actor_id: Some(actor_id),
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
        };

        self.db.insert_notification(&notification)?;
        debug!("Notification {} ({}) -> {}", notification.id, kind, recipient_id);

        let topic = user_topic(recipient_id);
        if let Err(e) = self
            .publisher
            .publish(&topic, GatewayEvent::Notification(notification.clone()))
        {
            warn!("Live push of notification {} on {} failed: {:#}", notification.id, topic, e);
        }

        Ok(Some(notification))
    }

    /// Unread -> read, recipient only. Calling it on a read notification
    /// returns it unchanged.
    pub fn mark_read(&self, notification_id: Uuid, requester_id: Uuid) -> CoreResult<Notification> {
        let notification = self.owned(notification_id, requester_id)?;
        if notification.is_read {
            return Ok(notification);
        }

        self.db.mark_notification_read(notification_id, Utc::now())?;
        self.db
            .get_notification(notification_id)?
            .ok_or(CoreError::NotFound("notification"))
    }

    pub fn mark_all_read(&self, recipient_id: Uuid) -> CoreResult<u64> {
        Ok(self.db.mark_all_notifications_read(recipient_id, Utc::now())?)
    }

    pub fn list(
        &self,
        recipient_id: Uuid,
        page: PageRequest,
        unread_only: bool,
    ) -> CoreResult<Page<Notification>> {
        let items = self.db.list_notifications(recipient_id, page, unread_only)?;
        let total = self.db.count_notifications(recipient_id, unread_only)?;
        Ok(Page::new(items, total, page.page, page.limit))
    }

    pub fn unread_count(&self, recipient_id: Uuid) -> CoreResult<u64> {
        Ok(self.db.count_notifications(recipient_id, true)?)
    }

    pub fn delete(&self, notification_id: Uuid, requester_id: Uuid) -> CoreResult<()> {
        self.owned(notification_id, requester_id)?;
        self.db.delete_notification(notification_id)?;
        Ok(())
    }

    fn owned(&self, notification_id: Uuid, requester_id: Uuid) -> CoreResult<Notification> {
        let notification = self
            .db
            .get_notification(notification_id)?
            .ok_or(CoreError::NotFound("notification"))?;
        if notification.recipient_id != requester_id {
            return Err(CoreError::Forbidden("notification belongs to another user"));
        }
        Ok(notification)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records everything published; optionally fails every topic publish.
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub fail: bool,
        pub published: Mutex<Vec<(String, GatewayEvent)>>,
        pub broadcasts: Mutex<Vec<GatewayEvent>>,
    }

    impl LivePublisher for RecordingPublisher {
        fn publish(&self, topic: &str, event: GatewayEvent) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("live channel down");
            }
            self.published.lock().unwrap().push((topic.to_string(), event));
            Ok(())
        }

        fn broadcast(&self, event: GatewayEvent) {
            self.broadcasts.lock().unwrap().push(event);
        }
    }
}
