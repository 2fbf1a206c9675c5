use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use tracing::debug;
use uuid::Uuid;

use quorum_types::models::{Reactions, TargetKind, TargetRef, VoteType};

use crate::Database;
use crate::models::{parse_uuid, timestamp};
use crate::queries::OptionalExt;

/// Result of the acceptance transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    QuestionNotFound,
    /// The answer is missing or belongs to a different question.
    AnswerNotFound,
    /// The answer was already the accepted one; nothing was written.
    AlreadyAccepted,
    Accepted { previous: Option<Uuid> },
}

impl Database {
    // -- Reactions --

    /// Atomic read-modify-write over a target's voter and liker sets.
    ///
    /// Inside one immediate transaction: loads the current sets, lets `f`
    /// mutate a copy, writes back only the memberships that changed, then
    /// rewrites the denormalized counters from the rows. The returned
    /// `Reactions` is re-read from the store after the write.
    /// Returns `None` if the target does not exist.
    pub fn update_reactions<F, T>(&self, target: TargetRef, f: F) -> Result<Option<(Reactions, T)>>
    where
        F: FnOnce(&mut Reactions) -> T,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if !target_exists(&tx, target)? {
                return Ok(None);
            }

            let before = load_reactions(&tx, target)?;
            let mut after = before.clone();
            let output = f(&mut after);

            persist_diff(&tx, target, &before, &after)?;
            recount(&tx, target)?;
            let stored = load_reactions(&tx, target)?;

            tx.commit()?;

            debug!(
                "Reactions on {} now {} votes / {} likes",
                target, stored.vote_count, stored.like_count
            );
            Ok(Some((stored, output)))
        })
    }

    pub fn get_reactions(&self, target: TargetRef) -> Result<Option<Reactions>> {
        self.with_conn(|conn| {
            if !target_exists(conn, target)? {
                return Ok(None);
            }
            load_reactions(conn, target).map(Some)
        })
    }

    // -- Acceptance --

    /// Moves the accepted mark of a question to `answer_id` in one transaction:
    /// clears any previously accepted answer, marks the target, links the
    /// question. Readers never observe an intermediate state.
    pub fn accept_answer(
        &self,
        question_id: Uuid,
        answer_id: Uuid,
        accepted_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AcceptOutcome> {
        let qid = question_id.to_string();
        let aid = answer_id.to_string();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let linked: Option<Option<String>> = tx
                .query_row(
                    "SELECT accepted_answer_id FROM questions WHERE id = ?1",
                    [&qid],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(linked) = linked else {
                return Ok(AcceptOutcome::QuestionNotFound);
            };

            let is_accepted: Option<bool> = tx
                .query_row(
                    "SELECT is_accepted FROM answers WHERE id = ?1 AND question_id = ?2",
                    [&aid, &qid],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(is_accepted) = is_accepted else {
                return Ok(AcceptOutcome::AnswerNotFound);
            };

            if is_accepted && linked.as_deref() == Some(aid.as_str()) {
                return Ok(AcceptOutcome::AlreadyAccepted);
            }

            let previous: Option<String> = tx
                .query_row(
                    "SELECT id FROM answers WHERE question_id = ?1 AND is_accepted = 1 AND id <> ?2",
                    [&qid, &aid],
                    |row| row.get(0),
                )
                .optional()?;

            tx.execute(
                "UPDATE answers SET is_accepted = 0, accepted_at = NULL, accepted_by = NULL
                 WHERE question_id = ?1 AND is_accepted = 1 AND id <> ?2",
                [&qid, &aid],
            )?;
            tx.execute(
                "UPDATE answers SET is_accepted = 1, accepted_at = ?2, accepted_by = ?3 WHERE id = ?1",
                rusqlite::params![&aid, timestamp(now), accepted_by.to_string()],
            )?;
            tx.execute(
                "UPDATE questions SET accepted_answer_id = ?2 WHERE id = ?1",
                [&qid, &aid],
            )?;

            tx.commit()?;

            let previous = previous.as_deref().map(parse_uuid).transpose()?;
            debug!(
                "Question {} accepted answer {} (previous: {:?})",
                question_id, answer_id, previous
            );
            Ok(AcceptOutcome::Accepted { previous })
        })
    }
}

/// True if the error chain carries a SQLite constraint violation
/// (unique index, CHECK, foreign key).
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    })
}

fn table_for(kind: TargetKind) -> &'static str {
    match kind {
        TargetKind::Question => "questions",
        TargetKind::Answer => "answers",
    }
}

fn direction(vote: VoteType) -> i64 {
    match vote {
        VoteType::Upvote => 1,
        VoteType::Downvote => -1,
    }
}

pub(crate) fn target_exists(conn: &Connection, target: TargetRef) -> Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?1", table_for(target.kind()));
    let found: Option<i64> = conn
        .query_row(&sql, [target.id().to_string()], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn load_reactions(conn: &Connection, target: TargetRef) -> Result<Reactions> {
    let ids = [target.id().to_string()];
    let mut batch = load_reactions_batch(conn, target.kind(), &ids)?;
    Ok(batch.remove(&ids[0]).unwrap_or_default())
}

/// Batch-fetch voter and liker sets for many targets of the same kind.
/// Targets without any reaction are absent from the map.
pub(crate) fn load_reactions_batch(
    conn: &Connection,
    kind: TargetKind,
    target_ids: &[String],
) -> Result<HashMap<String, Reactions>> {
    let mut map: HashMap<String, Reactions> = HashMap::new();
    if target_ids.is_empty() {
        return Ok(map);
    }

    let placeholders: Vec<String> = (2..=target_ids.len() + 1).map(|i| format!("?{}", i)).collect();
    let mut params: Vec<&dyn rusqlite::types::ToSql> = Vec::with_capacity(target_ids.len() + 1);
    let kind_str = kind.as_str();
    params.push(&kind_str);
    params.extend(target_ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));

    let vote_sql = format!(
        "SELECT target_id, user_id, direction FROM votes
         WHERE target_kind = ?1 AND target_id IN ({})",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&vote_sql)?;
    let votes = stmt
        .query_map(params.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (target_id, user_id, dir) in votes {
        let user_id = parse_uuid(&user_id)?;
        let entry = map.entry(target_id).or_default();
        if dir > 0 {
            entry.upvoters.insert(user_id);
        } else {
            entry.downvoters.insert(user_id);
        }
    }

    let like_sql = format!(
        "SELECT target_id, user_id FROM likes
         WHERE target_kind = ?1 AND target_id IN ({})",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&like_sql)?;
    let likes = stmt
        .query_map(params.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (target_id, user_id) in likes {
        let user_id = parse_uuid(&user_id)?;
        map.entry(target_id).or_default().likers.insert(user_id);
    }

    for reactions in map.values_mut() {
        reactions.vote_count = reactions.upvoters.len() as i64 - reactions.downvoters.len() as i64;
        reactions.like_count = reactions.likers.len() as i64;
    }

    Ok(map)
}

/// Writes the membership changes between `before` and `after`.
/// Only users whose membership changed are touched.
fn persist_diff(
    conn: &Connection,
    target: TargetRef,
    before: &Reactions,
    after: &Reactions,
) -> Result<()> {
    let kind = target.kind().as_str();
    let target_id = target.id().to_string();
    let now = timestamp(Utc::now());

    let touched_voters: HashSet<&Uuid> = before
        .upvoters
        .symmetric_difference(&after.upvoters)
        .chain(before.downvoters.symmetric_difference(&after.downvoters))
        .collect();

    for user_id in touched_voters {
        match after.vote_of(user_id) {
            Some(vote) => {
                conn.execute(
                    "INSERT INTO votes (target_kind, target_id, user_id, direction, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT (target_kind, target_id, user_id)
                     DO UPDATE SET direction = excluded.direction",
                    rusqlite::params![kind, &target_id, user_id.to_string(), direction(vote), &now],
                )?;
            }
            None => {
                conn.execute(
                    "DELETE FROM votes WHERE target_kind = ?1 AND target_id = ?2 AND user_id = ?3",
                    rusqlite::params![kind, &target_id, user_id.to_string()],
                )?;
            }
        }
    }

    for user_id in before.likers.symmetric_difference(&after.likers) {
        if after.likers.contains(user_id) {
            conn.execute(
                "INSERT OR IGNORE INTO likes (target_kind, target_id, user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![kind, &target_id, user_id.to_string(), &now],
            )?;
        } else {
            conn.execute(
                "DELETE FROM likes WHERE target_kind = ?1 AND target_id = ?2 AND user_id = ?3",
                rusqlite::params![kind, &target_id, user_id.to_string()],
            )?;
        }
    }

    Ok(())
}

/// Rewrites the denormalized counters from the reaction rows.
fn recount(conn: &Connection, target: TargetRef) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET
             vote_count = (SELECT COALESCE(SUM(direction), 0) FROM votes
                           WHERE target_kind = ?1 AND target_id = ?2),
             like_count = (SELECT COUNT(*) FROM likes
                           WHERE target_kind = ?1 AND target_id = ?2)
         WHERE id = ?2",
        table_for(target.kind())
    );
    conn.execute(&sql, rusqlite::params![target.kind().as_str(), target.id().to_string()])?;
    Ok(())
}

/// Removes every vote and like attached to the given targets.
pub(crate) fn delete_reactions(conn: &Connection, kind: TargetKind, target_ids: &[String]) -> Result<()> {
    for id in target_ids {
        conn.execute(
            "DELETE FROM votes WHERE target_kind = ?1 AND target_id = ?2",
            rusqlite::params![kind.as_str(), id],
        )?;
        conn.execute(
            "DELETE FROM likes WHERE target_kind = ?1 AND target_id = ?2",
            rusqlite::params![kind.as_str(), id],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> (Database, Uuid, Uuid, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let author = Uuid::new_v4();
        let voter = Uuid::new_v4();
        db.create_user(author, "asker", "hash").unwrap();
        db.create_user(voter, "voter", "hash").unwrap();
        let question = db
            .insert_question(Uuid::new_v4(), author, "Title", "Body", &[], Utc::now())
            .unwrap();
        (db, author, voter, question.id)
    }

    #[test]
    fn update_reactions_persists_membership_and_counters() {
        let (db, _, voter, qid) = seed();
        let target = TargetRef::Question(qid);

        let (stored, ()) = db
            .update_reactions(target, |r| {
                r.upvoters.insert(voter);
                r.likers.insert(voter);
            })
            .unwrap()
            .unwrap();

        assert!(stored.upvoters.contains(&voter));
        assert_eq!(stored.vote_count, 1);
        assert_eq!(stored.like_count, 1);

        let question = db.get_question(qid).unwrap().unwrap();
        assert_eq!(question.reactions, stored);

        let column: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT vote_count FROM questions WHERE id = ?1",
                    [qid.to_string()],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(column, 1);
    }

    #[test]
    fn store_keeps_voter_sets_disjoint_even_if_closure_does_not() {
        let (db, _, voter, qid) = seed();
        let target = TargetRef::Question(qid);

        let (stored, ()) = db
            .update_reactions(target, |r| {
                r.upvoters.insert(voter);
                r.downvoters.insert(voter);
            })
            .unwrap()
            .unwrap();

        assert!(stored.upvoters.is_disjoint(&stored.downvoters));
        assert_eq!(
            stored.vote_count,
            stored.upvoters.len() as i64 - stored.downvoters.len() as i64
        );
    }

    #[test]
    fn update_reactions_on_missing_target_is_none() {
        let db = Database::open_in_memory().unwrap();
        let result = db
            .update_reactions(TargetRef::Answer(Uuid::new_v4()), |_| ())
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn accept_answer_moves_the_mark() {
        let (db, author, voter, qid) = seed();
        let other = Uuid::new_v4();
        db.create_user(other, "other", "hash").unwrap();

        let a1 = db.insert_answer(Uuid::new_v4(), qid, voter, "one", Utc::now()).unwrap();
        let a2 = db.insert_answer(Uuid::new_v4(), qid, other, "two", Utc::now()).unwrap();

        assert_eq!(
            db.accept_answer(qid, a1.id, author, Utc::now()).unwrap(),
            AcceptOutcome::Accepted { previous: None }
        );
        assert_eq!(
            db.accept_answer(qid, a1.id, author, Utc::now()).unwrap(),
            AcceptOutcome::AlreadyAccepted
        );
        assert_eq!(
            db.accept_answer(qid, a2.id, author, Utc::now()).unwrap(),
            AcceptOutcome::Accepted { previous: Some(a1.id) }
        );

        let a1 = db.get_answer(a1.id).unwrap().unwrap();
        let a2 = db.get_answer(a2.id).unwrap().unwrap();
        assert!(!a1.is_accepted);
        assert!(a1.accepted_at.is_none() && a1.accepted_by.is_none());
        assert!(a2.is_accepted);
        assert_eq!(a2.accepted_by, Some(author));
        assert_eq!(db.get_question(qid).unwrap().unwrap().accepted_answer_id, Some(a2.id));
    }

    #[test]
    fn accept_answer_rejects_foreign_answer() {
        let (db, author, voter, qid) = seed();
        let other_q = db
            .insert_question(Uuid::new_v4(), author, "Other", "Body", &[], Utc::now())
            .unwrap();
        let foreign = db.insert_answer(Uuid::new_v4(), other_q.id, voter, "x", Utc::now()).unwrap();

        assert_eq!(
            db.accept_answer(qid, foreign.id, author, Utc::now()).unwrap(),
            AcceptOutcome::AnswerNotFound
        );
        assert_eq!(
            db.accept_answer(Uuid::new_v4(), foreign.id, author, Utc::now()).unwrap(),
            AcceptOutcome::QuestionNotFound
        );
    }

    #[test]
    fn second_accepted_answer_is_a_constraint_violation() {
        let (db, _, voter, qid) = seed();
        let other = Uuid::new_v4();
        db.create_user(other, "other", "hash").unwrap();
        let a1 = db.insert_answer(Uuid::new_v4(), qid, voter, "one", Utc::now()).unwrap();
        let a2 = db.insert_answer(Uuid::new_v4(), qid, other, "two", Utc::now()).unwrap();

        let err = db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE answers SET is_accepted = 1 WHERE id IN (?1, ?2)",
                    [a1.id.to_string(), a2.id.to_string()],
                )?;
                Ok(())
            })
            .unwrap_err();
        assert!(is_constraint_violation(&err));
    }
}
