//! Database row types — these map directly to SQLite rows and are converted
//! into `quorum_types::models` once ids and timestamps have been parsed.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::Row;
use uuid::Uuid;

use quorum_types::models::{
    Answer, Comment, CommentParent, Notification, NotificationKind, Question, Reactions,
};

pub(crate) const QUESTION_COLS: &str = "q.id, q.title, q.body, q.author_id, u.username, q.views, \
     q.accepted_answer_id, q.created_at, q.updated_at";

pub(crate) const ANSWER_COLS: &str = "a.id, a.question_id, a.body, a.author_id, u.username, \
     a.is_accepted, a.accepted_at, a.accepted_by, a.created_at, a.updated_at";

pub(crate) const COMMENT_COLS: &str =
    "c.id, c.body, c.author_id, u.username, c.question_id, c.answer_id, c.created_at, c.updated_at";

pub(crate) const NOTIFICATION_COLS: &str = "id, recipient_id, kind, title, message, question_id, \
     answer_id, comment_id, actor_id, is_read, read_at, created_at";

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub reputation: i64,
    pub created_at: String,
}

impl UserRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            password: row.get(2)?,
            reputation: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

pub(crate) struct QuestionRow {
    pub id: String,
    pub title: String,
    pub body: String,
    pub author_id: String,
    pub author_username: String,
    pub views: i64,
    pub accepted_answer_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl QuestionRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            body: row.get(2)?,
            author_id: row.get(3)?,
            author_username: row
                .get::<_, Option<String>>(4)?
                .unwrap_or_else(|| "unknown".to_string()),
            views: row.get(5)?,
            accepted_answer_id: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    pub(crate) fn into_model(self, tags: Vec<String>, reactions: Reactions) -> Result<Question> {
        Ok(Question {
            id: parse_uuid(&self.id)?,
            title: self.title,
            body: self.body,
            tags,
            author_id: parse_uuid(&self.author_id)?,
            author_username: self.author_username,
            views: self.views,
            accepted_answer_id: parse_opt_uuid(self.accepted_answer_id.as_deref())?,
            reactions,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

pub(crate) struct AnswerRow {
    pub id: String,
    pub question_id: String,
    pub body: String,
    pub author_id: String,
    pub author_username: String,
    pub is_accepted: bool,
    pub accepted_at: Option<String>,
    pub accepted_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AnswerRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            question_id: row.get(1)?,
            body: row.get(2)?,
            author_id: row.get(3)?,
            author_username: row
                .get::<_, Option<String>>(4)?
                .unwrap_or_else(|| "unknown".to_string()),
            is_accepted: row.get(5)?,
            accepted_at: row.get(6)?,
            accepted_by: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    pub(crate) fn into_model(self, reactions: Reactions) -> Result<Answer> {
        Ok(Answer {
            id: parse_uuid(&self.id)?,
            question_id: parse_uuid(&self.question_id)?,
            body: self.body,
            author_id: parse_uuid(&self.author_id)?,
            author_username: self.author_username,
            is_accepted: self.is_accepted,
            accepted_at: self.accepted_at.as_deref().map(parse_timestamp).transpose()?,
            accepted_by: parse_opt_uuid(self.accepted_by.as_deref())?,
            reactions,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

pub(crate) struct CommentRow {
    pub id: String,
    pub body: String,
    pub author_id: String,
    pub author_username: String,
    pub question_id: Option<String>,
    pub answer_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl CommentRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            body: row.get(1)?,
            author_id: row.get(2)?,
            author_username: row
                .get::<_, Option<String>>(3)?
                .unwrap_or_else(|| "unknown".to_string()),
            question_id: row.get(4)?,
            answer_id: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    pub(crate) fn into_model(self) -> Result<Comment> {
        let parent = CommentParent::from_ids(
            parse_opt_uuid(self.question_id.as_deref())?,
            parse_opt_uuid(self.answer_id.as_deref())?,
        )
        .with_context(|| format!("comment {} has no single parent", self.id))?;

        Ok(Comment {
            id: parse_uuid(&self.id)?,
            body: self.body,
            author_id: parse_uuid(&self.author_id)?,
            author_username: self.author_username,
            parent,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

pub(crate) struct NotificationRow {
    pub id: String,
    pub recipient_id: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub question_id: Option<String>,
    pub answer_id: Option<String>,
    pub comment_id: Option<String>,
    pub actor_id: Option<String>,
    pub is_read: bool,
    pub read_at: Option<String>,
    pub created_at: String,
}

impl NotificationRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            recipient_id: row.get(1)?,
            kind: row.get(2)?,
            title: row.get(3)?,
            message: row.get(4)?,
            question_id: row.get(5)?,
            answer_id: row.get(6)?,
            comment_id: row.get(7)?,
            actor_id: row.get(8)?,
            is_read: row.get(9)?,
            read_at: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    pub(crate) fn into_model(self) -> Result<Notification> {
        Ok(Notification {
            id: parse_uuid(&self.id)?,
            recipient_id: parse_uuid(&self.recipient_id)?,
            kind: self.kind.parse::<NotificationKind>()?,
            title: self.title,
            message: self.message,
            question_id: parse_opt_uuid(self.question_id.as_deref())?,
            answer_id: parse_opt_uuid(self.answer_id.as_deref())?,
            comment_id: parse_opt_uuid(self.comment_id.as_deref())?,
            actor_id: parse_opt_uuid(self.actor_id.as_deref())?,
            is_read: self.is_read,
            read_at: self.read_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

/// Fixed-width RFC 3339 so that text ordering in SQL matches time ordering.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid> {
    raw.parse::<Uuid>()
        .with_context(|| format!("corrupt id in database: {:?}", raw))
}

pub(crate) fn parse_opt_uuid(raw: Option<&str>) -> Result<Option<Uuid>> {
    raw.map(parse_uuid).transpose()
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by hand in the sqlite shell use datetime('now'):
            // "YYYY-MM-DD HH:MM:SS" without timezone, parse as naive UTC.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("corrupt timestamp in database: {:?}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_round_trip_and_sort_as_text() {
        let earlier = "2024-05-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let later = earlier + chrono::Duration::milliseconds(1500);

        assert_eq!(parse_timestamp(&timestamp(earlier)).unwrap(), earlier);
        assert!(timestamp(earlier) < timestamp(later));
    }

    #[test]
    fn naive_sqlite_timestamps_are_accepted() {
        let parsed = parse_timestamp("2024-05-01 10:00:00").unwrap();
        assert_eq!(timestamp(parsed), "2024-05-01T10:00:00.000000000Z");
    }

    #[test]
    fn corrupt_ids_are_errors() {
        assert!(parse_uuid("not-a-uuid").is_err());
        assert_eq!(parse_opt_uuid(None).unwrap(), None);
    }
}
