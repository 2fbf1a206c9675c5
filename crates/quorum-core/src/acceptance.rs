use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use quorum_db::reactions::is_constraint_violation;
use quorum_db::{AcceptOutcome, Database};
use quorum_types::models::Answer;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct Acceptance {
    pub answer: Answer,
    /// Answer that lost its accepted mark, if any.
    pub previous_answer_id: Option<Uuid>,
    /// False when the answer was already accepted and nothing changed.
    pub newly_accepted: bool,
}

/// Keeps at most one accepted answer per question, and keeps
/// `question.accepted_answer_id` pointing at it.
#[derive(Clone)]
pub struct AcceptanceCoordinator {
    db: Arc<Database>,
}

impl AcceptanceCoordinator {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Only the question's author may accept. Accepting the answer that is
    /// already accepted is a no-op with the same observable result.
    pub fn accept_answer(
        &self,
        question_id: Uuid,
        answer_id: Uuid,
        requester_id: Uuid,
    ) -> CoreResult<Acceptance> {
        let author_id = self
            .db
            .get_question_author(question_id)?
            .ok_or(CoreError::NotFound("question"))?;

        let belongs = self
            .db
            .get_answer(answer_id)?
            .is_some_and(|a| a.question_id == question_id);
        if !belongs {
            return Err(CoreError::NotFound("answer"));
        }

        if author_id != requester_id {
            warn!(
                "User {} tried to accept answer {} on question {} owned by {}",
                requester_id, answer_id, question_id, author_id
            );
            return Err(CoreError::Forbidden("only the question author can accept answers"));
        }

        let outcome = match self.db.accept_answer(question_id, answer_id, requester_id, Utc::now()) {
            Ok(outcome) => outcome,
            Err(e) if is_constraint_violation(&e) => {
                warn!("Acceptance on question {} hit the uniqueness guard: {:#}", question_id, e);
                return Err(CoreError::Conflict(format!(
                    "question {} already has an accepted answer, retry",
                    question_id
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let (previous_answer_id, newly_accepted) = match outcome {
            // Deleted between the checks above and the transaction
            AcceptOutcome::QuestionNotFound => return Err(CoreError::NotFound("question")),
            AcceptOutcome::AnswerNotFound => return Err(CoreError::NotFound("answer")),
            AcceptOutcome::AlreadyAccepted => {
                debug!("Answer {} already accepted on question {}", answer_id, question_id);
                (None, false)
            }
            AcceptOutcome::Accepted { previous } => {
                info!(
                    "Question {} accepted answer {} (replacing {:?})",
                    question_id, answer_id, previous
                );
                (previous, true)
            }
        };

        let answer = self
            .db
            .get_answer(answer_id)?
            .ok_or(CoreError::NotFound("answer"))?;

        Ok(Acceptance {
            answer,
            previous_answer_id,
            newly_accepted,
        })
    }
}
