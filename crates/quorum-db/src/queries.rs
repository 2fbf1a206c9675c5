use std::collections::HashMap;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use uuid::Uuid;

use quorum_types::api::{AnswerSort, PageRequest, QuestionSort, SortOrder};
use quorum_types::models::{Answer, Comment, CommentParent, Question, TargetKind, TargetRef};

use crate::Database;
use crate::models::{
    ANSWER_COLS, AnswerRow, COMMENT_COLS, CommentRow, QUESTION_COLS, QuestionRow, UserRow, timestamp,
};
use crate::reactions::{delete_reactions, load_reactions, load_reactions_batch};

/// Partial update of a question. `None` fields are left untouched.
#[derive(Debug, Default)]
pub struct QuestionChanges<'a> {
    pub title: Option<&'a str>,
    pub body: Option<&'a str>,
    pub tags: Option<&'a [String]>,
}

impl Database {
    // -- Users --

    pub fn create_user(&self, id: Uuid, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id.to_string(), username, password_hash, timestamp(Utc::now())),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password, reputation, created_at FROM users WHERE username = ?1",
            )?;
            Ok(stmt.query_row([username], UserRow::from_row).optional()?)
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password, reputation, created_at FROM users WHERE id = ?1",
            )?;
            Ok(stmt.query_row([id.to_string()], UserRow::from_row).optional()?)
        })
    }

    pub fn get_username_by_id(&self, id: Uuid) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT username FROM users WHERE id = ?1", [id.to_string()], |row| {
                row.get::<_, String>(0)
            })
            .optional()
        })
    }

    // -- Questions --

    pub fn insert_question(
        &self,
        id: Uuid,
        author_id: Uuid,
        title: &str,
        body: &str,
        tags: &[String],
        now: DateTime<Utc>,
    ) -> Result<Question> {
        let qid = id.to_string();
        let created = timestamp(now);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO questions (id, title, body, author_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![&qid, title, body, author_id.to_string(), &created],
            )?;
            replace_tags(&tx, &qid, tags)?;
            tx.commit()?;
            Ok(())
        })?;

        self.get_question(id)?
            .ok_or_else(|| anyhow!("Question vanished after insert: {}", id))
    }

    pub fn get_question(&self, id: Uuid) -> Result<Option<Question>> {
        self.with_conn(|conn| query_question(conn, &id.to_string()))
    }

    /// Only the author is ever needed for authorization checks; skips the
    /// tag and reaction loads.
    pub fn get_question_author(&self, id: Uuid) -> Result<Option<Uuid>> {
        self.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row("SELECT author_id FROM questions WHERE id = ?1", [id.to_string()], |row| {
                    row.get(0)
                })
                .optional()?;
            raw.as_deref().map(crate::models::parse_uuid).transpose()
        })
    }

    pub fn list_questions(
        &self,
        page: PageRequest,
        sort: QuestionSort,
        order: SortOrder,
        search: Option<&str>,
    ) -> Result<Vec<Question>> {
        let column = match sort {
            QuestionSort::Newest => "q.created_at",
            QuestionSort::Votes => "q.vote_count",
            QuestionSort::Likes => "q.like_count",
            QuestionSort::Views => "q.views",
        };
        let direction = match order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let pattern = search_pattern(search);

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {QUESTION_COLS}
                 FROM questions q
                 LEFT JOIN users u ON q.author_id = u.id
                 WHERE ?1 IS NULL OR q.title LIKE ?1 ESCAPE '\\' OR q.body LIKE ?1 ESCAPE '\\'
                 ORDER BY {column} {direction}, q.created_at DESC
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![pattern, page.limit, page.offset() as i64],
                    QuestionRow::from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            assemble_questions(conn, rows)
        })
    }

    pub fn count_questions(&self, search: Option<&str>) -> Result<u64> {
        let pattern = search_pattern(search);
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM questions q
                 WHERE ?1 IS NULL OR q.title LIKE ?1 ESCAPE '\\' OR q.body LIKE ?1 ESCAPE '\\'",
                [pattern],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    pub fn update_question(
        &self,
        id: Uuid,
        changes: &QuestionChanges<'_>,
        now: DateTime<Utc>,
    ) -> Result<Option<Question>> {
        let qid = id.to_string();
        let updated = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let n = tx.execute(
                "UPDATE questions SET
                     title = COALESCE(?2, title),
                     body = COALESCE(?3, body),
                     updated_at = ?4
                 WHERE id = ?1",
                rusqlite::params![&qid, changes.title, changes.body, timestamp(now)],
            )?;
            if n == 0 {
                return Ok(false);
            }
            if let Some(tags) = changes.tags {
                replace_tags(&tx, &qid, tags)?;
            }
            tx.commit()?;
            Ok(true)
        })?;

        if !updated {
            return Ok(None);
        }
        self.get_question(id)
    }

    /// Deletes a question with its answers, comments and every reaction on them.
    pub fn delete_question(&self, id: Uuid) -> Result<bool> {
        let qid = id.to_string();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let answer_ids: Vec<String> = {
                let mut stmt = tx.prepare("SELECT id FROM answers WHERE question_id = ?1")?;
                stmt.query_map([&qid], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };
            delete_reactions(&tx, TargetKind::Answer, &answer_ids)?;
            delete_reactions(&tx, TargetKind::Question, std::slice::from_ref(&qid))?;

            // answers, comments and tags go through ON DELETE CASCADE
            let n = tx.execute("DELETE FROM questions WHERE id = ?1", [&qid])?;
            tx.commit()?;
            Ok(n > 0)
        })
    }

    /// Raw hit counter: every detail view counts, there is no per-viewer dedup.
    pub fn increment_views(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE questions SET views = views + 1 WHERE id = ?1",
                [id.to_string()],
            )?;
            Ok(n > 0)
        })
    }

    // -- Answers --

    pub fn insert_answer(
        &self,
        id: Uuid,
        question_id: Uuid,
        author_id: Uuid,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<Answer> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO answers (id, question_id, author_id, body, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![
                    id.to_string(),
                    question_id.to_string(),
                    author_id.to_string(),
                    body,
                    timestamp(now)
                ],
            )?;
            Ok(())
        })?;

        self.get_answer(id)?
            .ok_or_else(|| anyhow!("Answer vanished after insert: {}", id))
    }

    pub fn get_answer(&self, id: Uuid) -> Result<Option<Answer>> {
        self.with_conn(|conn| query_answer(conn, &id.to_string()))
    }

    /// The answer `author_id` already posted on `question_id`, if any.
    pub fn find_answer_by_author(&self, question_id: Uuid, author_id: Uuid) -> Result<Option<Uuid>> {
        self.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT id FROM answers WHERE question_id = ?1 AND author_id = ?2",
                    [question_id.to_string(), author_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            raw.as_deref().map(crate::models::parse_uuid).transpose()
        })
    }

    pub fn list_answers(
        &self,
        question_id: Uuid,
        page: PageRequest,
        sort: AnswerSort,
    ) -> Result<Vec<Answer>> {
        let order_by = match sort {
            AnswerSort::Votes => "a.vote_count DESC, a.created_at DESC",
            AnswerSort::Newest => "a.created_at DESC",
            AnswerSort::Oldest => "a.created_at ASC",
        };

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {ANSWER_COLS}
                 FROM answers a
                 LEFT JOIN users u ON a.author_id = u.id
                 WHERE a.question_id = ?1
                 ORDER BY {order_by}
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![question_id.to_string(), page.limit, page.offset() as i64],
                    AnswerRow::from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            assemble_answers(conn, rows)
        })
    }

    /// Every answer of a question, accepted first, then by votes.
    pub fn all_answers(&self, question_id: Uuid) -> Result<Vec<Answer>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {ANSWER_COLS}
                 FROM answers a
                 LEFT JOIN users u ON a.author_id = u.id
                 WHERE a.question_id = ?1
                 ORDER BY a.is_accepted DESC, a.vote_count DESC, a.created_at ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([question_id.to_string()], AnswerRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            assemble_answers(conn, rows)
        })
    }

    pub fn count_answers(&self, question_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM answers WHERE question_id = ?1",
                [question_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    pub fn update_answer_body(&self, id: Uuid, body: &str, now: DateTime<Utc>) -> Result<Option<Answer>> {
        let n = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE answers SET body = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id.to_string(), body, timestamp(now)],
            )?)
        })?;
        if n == 0 {
            return Ok(None);
        }
        self.get_answer(id)
    }

    /// Deletes an answer, its comments and reactions. If it was the accepted
    /// answer the question's back-reference is cleared in the same transaction.
    pub fn delete_answer(&self, id: Uuid) -> Result<bool> {
        let aid = id.to_string();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            delete_reactions(&tx, TargetKind::Answer, std::slice::from_ref(&aid))?;
            tx.execute(
                "UPDATE questions SET accepted_answer_id = NULL WHERE accepted_answer_id = ?1",
                [&aid],
            )?;
            let n = tx.execute("DELETE FROM answers WHERE id = ?1", [&aid])?;
            tx.commit()?;
            Ok(n > 0)
        })
    }

    // -- Comments --

    pub fn insert_comment(
        &self,
        id: Uuid,
        author_id: Uuid,
        parent: CommentParent,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<Comment> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments (id, body, author_id, question_id, answer_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![
                    id.to_string(),
                    body,
                    author_id.to_string(),
                    parent.question_id().map(|q| q.to_string()),
                    parent.answer_id().map(|a| a.to_string()),
                    timestamp(now)
                ],
            )?;
            Ok(())
        })?;

        self.get_comment(id)?
            .ok_or_else(|| anyhow!("Comment vanished after insert: {}", id))
    }

    pub fn get_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {COMMENT_COLS} FROM comments c
                 LEFT JOIN users u ON c.author_id = u.id
                 WHERE c.id = ?1"
            );
            let row = conn
                .query_row(&sql, [id.to_string()], CommentRow::from_row)
                .optional()?;
            row.map(CommentRow::into_model).transpose()
        })
    }

    /// Newest first.
    pub fn list_comments(&self, parent: CommentParent, page: PageRequest) -> Result<Vec<Comment>> {
        let (column, parent_id) = comment_parent_column(parent);
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {COMMENT_COLS} FROM comments c
                 LEFT JOIN users u ON c.author_id = u.id
                 WHERE c.{column} = ?1
                 ORDER BY c.created_at DESC
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![parent_id, page.limit, page.offset() as i64],
                    CommentRow::from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(CommentRow::into_model).collect()
        })
    }

    pub fn count_comments(&self, parent: CommentParent) -> Result<u64> {
        let (column, parent_id) = comment_parent_column(parent);
        self.with_conn(|conn| {
            let sql = format!("SELECT COUNT(*) FROM comments WHERE {column} = ?1");
            let count: i64 = conn.query_row(&sql, [parent_id], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    pub fn update_comment_body(&self, id: Uuid, body: &str, now: DateTime<Utc>) -> Result<Option<Comment>> {
        let n = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE comments SET body = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id.to_string(), body, timestamp(now)],
            )?)
        })?;
        if n == 0 {
            return Ok(None);
        }
        self.get_comment(id)
    }

    pub fn delete_comment(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM comments WHERE id = ?1", [id.to_string()])?;
            Ok(n > 0)
        })
    }
}

fn query_question(conn: &Connection, id: &str) -> Result<Option<Question>> {
    let sql = format!(
        "SELECT {QUESTION_COLS}
         FROM questions q
         LEFT JOIN users u ON q.author_id = u.id
         WHERE q.id = ?1"
    );
    let row = conn.query_row(&sql, [id], QuestionRow::from_row).optional()?;
    let Some(row) = row else {
        return Ok(None);
    };

    let qid = crate::models::parse_uuid(&row.id)?;
    let tags = load_tags(conn, std::slice::from_ref(&row.id))?
        .remove(&row.id)
        .unwrap_or_default();
    let reactions = load_reactions(conn, TargetRef::Question(qid))?;
    row.into_model(tags, reactions).map(Some)
}

fn query_answer(conn: &Connection, id: &str) -> Result<Option<Answer>> {
    let sql = format!(
        "SELECT {ANSWER_COLS}
         FROM answers a
         LEFT JOIN users u ON a.author_id = u.id
         WHERE a.id = ?1"
    );
    let row = conn.query_row(&sql, [id], AnswerRow::from_row).optional()?;
    let Some(row) = row else {
        return Ok(None);
    };

    let aid = crate::models::parse_uuid(&row.id)?;
    let reactions = load_reactions(conn, TargetRef::Answer(aid))?;
    row.into_model(reactions).map(Some)
}

/// Attaches tags and reactions to a page of question rows (two batch queries, no N+1).
fn assemble_questions(conn: &Connection, rows: Vec<QuestionRow>) -> Result<Vec<Question>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut tags = load_tags(conn, &ids)?;
    let mut reactions = load_reactions_batch(conn, TargetKind::Question, &ids)?;

    rows.into_iter()
        .map(|row| {
            let t = tags.remove(&row.id).unwrap_or_default();
            let r = reactions.remove(&row.id).unwrap_or_default();
            row.into_model(t, r)
        })
        .collect()
}

fn assemble_answers(conn: &Connection, rows: Vec<AnswerRow>) -> Result<Vec<Answer>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut reactions = load_reactions_batch(conn, TargetKind::Answer, &ids)?;

    rows.into_iter()
        .map(|row| {
            let r = reactions.remove(&row.id).unwrap_or_default();
            row.into_model(r)
        })
        .collect()
}

fn load_tags(conn: &Connection, question_ids: &[String]) -> Result<HashMap<String, Vec<String>>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    if question_ids.is_empty() {
        return Ok(map);
    }

    let placeholders: Vec<String> = (1..=question_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT question_id, tag FROM question_tags
         WHERE question_id IN ({})
         ORDER BY question_id, position",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = question_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (question_id, tag) in rows {
        map.entry(question_id).or_default().push(tag);
    }
    Ok(map)
}

fn replace_tags(conn: &Connection, question_id: &str, tags: &[String]) -> Result<()> {
    conn.execute("DELETE FROM question_tags WHERE question_id = ?1", [question_id])?;
    for (position, tag) in tags.iter().enumerate() {
        conn.execute(
            "INSERT OR IGNORE INTO question_tags (question_id, tag, position) VALUES (?1, ?2, ?3)",
            rusqlite::params![question_id, tag, position as i64],
        )?;
    }
    Ok(())
}

fn comment_parent_column(parent: CommentParent) -> (&'static str, String) {
    match parent {
        CommentParent::Question(id) => ("question_id", id.to_string()),
        CommentParent::Answer(id) => ("answer_id", id.to_string()),
    }
}

/// `%term%` with LIKE wildcards in the term escaped.
fn search_pattern(search: Option<&str>) -> Option<String> {
    let term = search.map(str::trim).filter(|s| !s.is_empty())?;
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    Some(format!("%{}%", escaped))
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
