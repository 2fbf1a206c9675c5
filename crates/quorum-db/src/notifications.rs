use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use quorum_types::api::PageRequest;
use quorum_types::models::Notification;

use crate::Database;
use crate::models::{NOTIFICATION_COLS, NotificationRow, timestamp};
use crate::queries::OptionalExt;

impl Database {
    // -- Notifications --

    pub fn insert_notification(&self, n: &Notification) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications
                     (id, recipient_id, kind, title, message, question_id, answer_id,
                      comment_id, actor_id, is_read, read_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    n.id.to_string(),
                    n.recipient_id.to_string(),
                    n.kind.as_str(),
                    &n.title,
                    &n.message,
                    n.question_id.map(|id| id.to_string()),
                    n.answer_id.map(|id| id.to_string()),
                    n.comment_id.map(|id| id.to_string()),
                    n.actor_id.map(|id| id.to_string()),
                    n.is_read,
                    n.read_at.map(timestamp),
                    timestamp(n.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_notification(&self, id: Uuid) -> Result<Option<Notification>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {NOTIFICATION_COLS} FROM notifications WHERE id = ?1");
            let row = conn
                .query_row(&sql, [id.to_string()], NotificationRow::from_row)
                .optional()?;
            row.map(NotificationRow::into_model).transpose()
        })
    }

    /// Newest first.
    pub fn list_notifications(
        &self,
        recipient_id: Uuid,
        page: PageRequest,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {NOTIFICATION_COLS} FROM notifications
                 WHERE recipient_id = ?1 AND (?2 = 0 OR is_read = 0)
                 ORDER BY created_at DESC
                 LIMIT ?3 OFFSET ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![
                        recipient_id.to_string(),
                        unread_only,
                        page.limit,
                        page.offset() as i64
                    ],
                    NotificationRow::from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(NotificationRow::into_model).collect()
        })
    }

    pub fn count_notifications(&self, recipient_id: Uuid, unread_only: bool) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications
                 WHERE recipient_id = ?1 AND (?2 = 0 OR is_read = 0)",
                rusqlite::params![recipient_id.to_string(), unread_only],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Unread -> read. Rows already read keep their original `read_at`.
    /// Returns whether a row changed.
    pub fn mark_notification_read(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE notifications SET is_read = 1, read_at = ?2 WHERE id = ?1 AND is_read = 0",
                rusqlite::params![id.to_string(), timestamp(now)],
            )?;
            Ok(n > 0)
        })
    }

    /// Returns how many notifications changed state.
    pub fn mark_all_notifications_read(&self, recipient_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE notifications SET is_read = 1, read_at = ?2
                 WHERE recipient_id = ?1 AND is_read = 0",
                rusqlite::params![recipient_id.to_string(), timestamp(now)],
            )?;
            Ok(n as u64)
        })
    }

    pub fn delete_notification(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM notifications WHERE id = ?1", [id.to_string()])?;
            Ok(n > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_types::models::NotificationKind;

    fn notification(recipient_id: Uuid, created_at: DateTime<Utc>) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            recipient_id,
            kind: NotificationKind::NewAnswer,
            title: "New Answer".into(),
            message: "bob answered your question".into(),
            question_id: Some(Uuid::new_v4()),
            answer_id: None,
            comment_id: None,
            actor_id: None,
            is_read: false,
            read_at: None,
            created_at,
        }
    }

    #[test]
    fn inbox_round_trip_and_read_transition() {
        let db = Database::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        db.create_user(user, "alice", "hash").unwrap();

        let n = notification(user, Utc::now());
        db.insert_notification(&n).unwrap();
        assert_eq!(db.get_notification(n.id).unwrap().unwrap(), n);

        let first = Utc::now();
        assert!(db.mark_notification_read(n.id, first).unwrap());
        let later = first + chrono::Duration::seconds(30);
        assert!(!db.mark_notification_read(n.id, later).unwrap());

        let stored = db.get_notification(n.id).unwrap().unwrap();
        assert!(stored.is_read);
        assert_eq!(stored.read_at.map(timestamp), Some(timestamp(first)));
    }

    #[test]
    fn listing_filters_unread_and_orders_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        db.create_user(user, "alice", "hash").unwrap();

        let base = Utc::now();
        let old = notification(user, base);
        let new = notification(user, base + chrono::Duration::seconds(5));
        db.insert_notification(&old).unwrap();
        db.insert_notification(&new).unwrap();
        db.mark_notification_read(old.id, base).unwrap();

        let all = db.list_notifications(user, PageRequest::new(1, 20), false).unwrap();
        assert_eq!(all.iter().map(|n| n.id).collect::<Vec<_>>(), vec![new.id, old.id]);

        let unread = db.list_notifications(user, PageRequest::new(1, 20), true).unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(db.count_notifications(user, true).unwrap(), 1);
        assert_eq!(db.count_notifications(user, false).unwrap(), 2);

        assert_eq!(db.mark_all_notifications_read(user, base).unwrap(), 1);
        assert_eq!(db.count_notifications(user, true).unwrap(), 0);
    }
}
