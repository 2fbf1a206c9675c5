use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use quorum_db::Database;
use quorum_db::queries::QuestionChanges;
use quorum_db::reactions::is_constraint_violation;
use quorum_types::api::{
    AnswerSort, CreateQuestionRequest, LikeResponse, Page, PageRequest, QuestionDetail,
    QuestionSort, SortOrder, UpdateQuestionRequest, VoteResponse,
};
use quorum_types::events::GatewayEvent;
use quorum_types::models::{
    Answer, Comment, CommentParent, LikeOutcome, NotificationContext, NotificationKind, Question,
    TargetRef,
};

use crate::acceptance::{Acceptance, AcceptanceCoordinator};
use crate::error::{CoreError, CoreResult};
use crate::ledger::ReactionLedger;
use crate::notify::{LivePublisher, NotificationDispatcher};

const MAX_TITLE_CHARS: usize = 200;
const MAX_TAGS: usize = 5;
const COMMENT_CHARS: std::ops::RangeInclusive<usize> = 2..=500;

/// Everything a route handler can do to forum content.
///
/// Writes go through the store first; notifications and live events follow
/// only once the write has committed.
#[derive(Clone)]
pub struct Forum {
    db: Arc<Database>,
    publisher: Arc<dyn LivePublisher>,
    ledger: ReactionLedger,
    acceptance: AcceptanceCoordinator,
    notifications: NotificationDispatcher,
}

impl Forum {
    pub fn new(db: Arc<Database>, publisher: Arc<dyn LivePublisher>) -> Self {
        Self {
            ledger: ReactionLedger::new(db.clone()),
            acceptance: AcceptanceCoordinator::new(db.clone()),
            notifications: NotificationDispatcher::new(db.clone(), publisher.clone()),
            db,
            publisher,
        }
    }

    pub fn notifications(&self) -> &NotificationDispatcher {
        &self.notifications
    }

    // -- Questions --

    pub fn create_question(&self, author_id: Uuid, req: CreateQuestionRequest) -> CoreResult<Question> {
        let title = validate_title(&req.title)?;
        let body = validate_body(&req.body)?;
        let tags = normalize_tags(&req.tags)?;

        let question = self
            .db
            .insert_question(Uuid::new_v4(), author_id, title, body, &tags, Utc::now())?;
        info!("Question {} asked by {}", question.id, author_id);

        self.publisher.broadcast(GatewayEvent::QuestionCreated {
            question: question.clone(),
        });
        Ok(question)
    }

    pub fn list_questions(
        &self,
        page: PageRequest,
        sort: QuestionSort,
        order: SortOrder,
        search: Option<&str>,
    ) -> CoreResult<Page<Question>> {
        let search = search.map(str::trim).filter(|s| !s.is_empty());
        let items = self.db.list_questions(page, sort, order, search)?;
        let total = self.db.count_questions(search)?;
        Ok(Page::new(items, total, page.page, page.limit))
    }

    /// Counts a view on every call, then returns the question with all of
    /// its answers, the accepted one first.
    pub fn view_question(&self, question_id: Uuid) -> CoreResult<QuestionDetail> {
        if !self.db.increment_views(question_id)? {
            return Err(CoreError::NotFound("question"));
        }
        let question = self
            .db
            .get_question(question_id)?
            .ok_or(CoreError::NotFound("question"))?;
        let answers = self.db.all_answers(question_id)?;
        Ok(QuestionDetail { question, answers })
    }

    pub fn update_question(
        &self,
        question_id: Uuid,
        requester_id: Uuid,
        req: UpdateQuestionRequest,
    ) -> CoreResult<Question> {
        self.require_question_author(question_id, requester_id)?;

        let title = req.title.as_deref().map(validate_title).transpose()?;
        let body = req.body.as_deref().map(validate_body).transpose()?;
        let tags = req.tags.as_deref().map(normalize_tags).transpose()?;
        let changes = QuestionChanges {
            title,
            body,
            tags: tags.as_deref(),
        };

        self.db
            .update_question(question_id, &changes, Utc::now())?
            .ok_or(CoreError::NotFound("question"))
    }

    pub fn delete_question(&self, question_id: Uuid, requester_id: Uuid) -> CoreResult<()> {
        self.require_question_author(question_id, requester_id)?;
        if !self.db.delete_question(question_id)? {
            return Err(CoreError::NotFound("question"));
        }
        info!("Question {} deleted by {}", question_id, requester_id);
        Ok(())
    }

    // -- Answers --

    pub fn create_answer(&self, question_id: Uuid, author_id: Uuid, body: &str) -> CoreResult<Answer> {
        let body = validate_body(body)?;
        let asker = self
            .db
            .get_question_author(question_id)?
            .ok_or(CoreError::NotFound("question"))?;

        if self.db.find_answer_by_author(question_id, author_id)?.is_some() {
            return Err(CoreError::InvalidInput(
                "you have already answered this question".to_string(),
            ));
        }

        let answer = match self
            .db
            .insert_answer(Uuid::new_v4(), question_id, author_id, body, Utc::now())
        {
            Ok(answer) => answer,
            Err(e) if is_constraint_violation(&e) => {
                return Err(CoreError::InvalidInput(
                    "you have already answered this question".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        info!("Answer {} posted on question {} by {}", answer.id, question_id, author_id);

        self.notify_after_commit(
            NotificationKind::NewAnswer,
            asker,
            author_id,
            NotificationContext {
                question_id: Some(question_id),
                answer_id: Some(answer.id),
                comment_id: None,
            },
        );
        self.publisher.broadcast(GatewayEvent::AnswerCreated {
            question_id,
            answer: answer.clone(),
        });
        Ok(answer)
    }

    pub fn list_answers(
        &self,
        question_id: Uuid,
        page: PageRequest,
        sort: AnswerSort,
    ) -> CoreResult<Page<Answer>> {
        if self.db.get_question_author(question_id)?.is_none() {
            return Err(CoreError::NotFound("question"));
        }
        let items = self.db.list_answers(question_id, page, sort)?;
        let total = self.db.count_answers(question_id)?;
        Ok(Page::new(items, total, page.page, page.limit))
    }

    pub fn update_answer(&self, answer_id: Uuid, requester_id: Uuid, body: &str) -> CoreResult<Answer> {
        let body = validate_body(body)?;
        self.require_answer_author(answer_id, requester_id)?;
        self.db
            .update_answer_body(answer_id, body, Utc::now())?
            .ok_or(CoreError::NotFound("answer"))
    }

    pub fn delete_answer(&self, answer_id: Uuid, requester_id: Uuid) -> CoreResult<()> {
        self.require_answer_author(answer_id, requester_id)?;
        if !self.db.delete_answer(answer_id)? {
            return Err(CoreError::NotFound("answer"));
        }
        info!("Answer {} deleted by {}", answer_id, requester_id);
        Ok(())
    }

    /// Accepts `answer_id` on its own question. The answer's author hears
    /// about it only when the acceptance is new.
    pub fn accept_answer(&self, answer_id: Uuid, requester_id: Uuid) -> CoreResult<Acceptance> {
        let question_id = self
            .db
            .get_answer(answer_id)?
            .ok_or(CoreError::NotFound("answer"))?
            .question_id;

        let acceptance = self
            .acceptance
            .accept_answer(question_id, answer_id, requester_id)?;

        if acceptance.newly_accepted {
            self.notify_after_commit(
                NotificationKind::AnswerAccepted,
                acceptance.answer.author_id,
                requester_id,
                NotificationContext {
                    question_id: Some(question_id),
                    answer_id: Some(answer_id),
                    comment_id: None,
                },
            );
            self.publisher.broadcast(GatewayEvent::AnswerAccepted {
                question_id,
                answer_id,
                previous_answer_id: acceptance.previous_answer_id,
            });
        }
        Ok(acceptance)
    }

    // -- Comments --

    pub fn create_comment(
        &self,
        author_id: Uuid,
        question_id: Option<Uuid>,
        answer_id: Option<Uuid>,
        body: &str,
    ) -> CoreResult<Comment> {
        let parent = CommentParent::from_ids(question_id, answer_id).ok_or_else(|| {
            CoreError::InvalidInput(
                "a comment needs exactly one of question_id or answer_id".to_string(),
            )
        })?;
        let body = validate_comment(body)?;

        let (root_question, parent_author) = match parent {
            CommentParent::Question(id) => {
                let author = self
                    .db
                    .get_question_author(id)?
                    .ok_or(CoreError::NotFound("question"))?;
                (id, author)
            }
            CommentParent::Answer(id) => {
                let answer = self.db.get_answer(id)?.ok_or(CoreError::NotFound("answer"))?;
                (answer.question_id, answer.author_id)
            }
        };

        let comment = self
            .db
            .insert_comment(Uuid::new_v4(), author_id, parent, body, Utc::now())?;
        debug!("Comment {} on {:?} by {}", comment.id, parent, author_id);

        self.notify_after_commit(
            NotificationKind::NewComment,
            parent_author,
            author_id,
            NotificationContext {
                question_id: Some(root_question),
                answer_id: parent.answer_id(),
                comment_id: Some(comment.id),
            },
        );
        self.publisher.broadcast(GatewayEvent::CommentCreated {
            question_id: root_question,
            comment: comment.clone(),
        });
        Ok(comment)
    }

    pub fn list_comments(
        &self,
        question_id: Option<Uuid>,
        answer_id: Option<Uuid>,
        page: PageRequest,
    ) -> CoreResult<Page<Comment>> {
        let parent = CommentParent::from_ids(question_id, answer_id).ok_or_else(|| {
            CoreError::InvalidInput("pass exactly one of question_id or answer_id".to_string())
        })?;
        let items = self.db.list_comments(parent, page)?;
        let total = self.db.count_comments(parent)?;
        Ok(Page::new(items, total, page.page, page.limit))
    }

    pub fn update_comment(&self, comment_id: Uuid, requester_id: Uuid, body: &str) -> CoreResult<Comment> {
        let body = validate_comment(body)?;
        self.require_comment_author(comment_id, requester_id)?;
        self.db
            .update_comment_body(comment_id, body, Utc::now())?
            .ok_or(CoreError::NotFound("comment"))
    }

    pub fn delete_comment(&self, comment_id: Uuid, requester_id: Uuid) -> CoreResult<()> {
        self.require_comment_author(comment_id, requester_id)?;
        if !self.db.delete_comment(comment_id)? {
            return Err(CoreError::NotFound("comment"));
        }
        Ok(())
    }

    // -- Reactions --

    /// Only a vote that leaves the user holding a fresh upvote notifies the
    /// author. Downvotes, removals and repeats stay silent.
    pub fn vote(&self, target: TargetRef, user_id: Uuid, vote_type: &str) -> CoreResult<VoteResponse> {
        let (reactions, outcome) = self.ledger.vote_raw(target, user_id, vote_type)?;
        debug!("{} voted on {}: {:?} -> {:?}", user_id, target, outcome.previous, outcome.current);

        if outcome.upvote_landed() {
            let kind = match target {
                TargetRef::Question(_) => NotificationKind::QuestionVote,
                TargetRef::Answer(_) => NotificationKind::AnswerVote,
            };
            self.notify_target_author(target, kind, user_id);
        }

        self.publisher.broadcast(GatewayEvent::VoteUpdated {
            target,
            vote_count: reactions.vote_count,
            upvotes: reactions.upvoters.len(),
            downvotes: reactions.downvoters.len(),
        });

        Ok(VoteResponse {
            target,
            vote_count: reactions.vote_count,
            upvotes: reactions.upvoters.len(),
            downvotes: reactions.downvoters.len(),
            user_vote: outcome.current,
        })
    }

    pub fn like(&self, target: TargetRef, user_id: Uuid) -> CoreResult<LikeResponse> {
        let (reactions, outcome) = self.ledger.like(target, user_id)?;

        if outcome == LikeOutcome::Liked {
            let kind = match target {
                TargetRef::Question(_) => NotificationKind::QuestionLike,
                TargetRef::Answer(_) => NotificationKind::AnswerLike,
            };
            self.notify_target_author(target, kind, user_id);
        }

        self.publisher.broadcast(GatewayEvent::LikeUpdated {
            target,
            like_count: reactions.like_count,
        });

        Ok(LikeResponse {
            target,
            liked: outcome == LikeOutcome::Liked,
            like_count: reactions.like_count,
        })
    }

    // -- Helpers --

    /// Only for use once the primary write has committed: inbox failures are
    /// logged and the caller still gets its committed result.
    fn notify_after_commit(
        &self,
        kind: NotificationKind,
        recipient_id: Uuid,
        actor_id: Uuid,
        context: NotificationContext,
    ) {
        if let Err(e) = self.notifications.notify(kind, recipient_id, actor_id, context) {
            warn!("{} notification for {} dropped after commit: {}", kind, recipient_id, e);
        }
    }

    fn notify_target_author(&self, target: TargetRef, kind: NotificationKind, actor_id: Uuid) {
        match self.target_author(target) {
            Ok(Some((author, context))) => self.notify_after_commit(kind, author, actor_id, context),
            // Target deleted right after the reaction committed: nobody to tell
            Ok(None) => {}
            Err(e) => warn!("Could not resolve author of {} for {} notification: {}", target, kind, e),
        }
    }

    fn target_author(&self, target: TargetRef) -> CoreResult<Option<(Uuid, NotificationContext)>> {
        let (author, context) = match target {
            TargetRef::Question(id) => {
                let author = self.db.get_question_author(id)?;
                (author, NotificationContext { question_id: Some(id), ..Default::default() })
            }
            TargetRef::Answer(id) => {
                let answer = self.db.get_answer(id)?;
                let context = NotificationContext {
                    question_id: answer.as_ref().map(|a| a.question_id),
                    answer_id: Some(id),
                    comment_id: None,
                };
                (answer.map(|a| a.author_id), context)
            }
        };

        Ok(author.map(|author| (author, context)))
    }

    fn require_question_author(&self, question_id: Uuid, requester_id: Uuid) -> CoreResult<()> {
        let author = self
            .db
            .get_question_author(question_id)?
            .ok_or(CoreError::NotFound("question"))?;
        if author != requester_id {
            return Err(CoreError::Forbidden("only the author can change this question"));
        }
        Ok(())
    }

    fn require_answer_author(&self, answer_id: Uuid, requester_id: Uuid) -> CoreResult<()> {
        let answer = self.db.get_answer(answer_id)?.ok_or(CoreError::NotFound("answer"))?;
        if answer.author_id != requester_id {
            return Err(CoreError::Forbidden("only the author can change this answer"));
        }
        Ok(())
    }

    fn require_comment_author(&self, comment_id: Uuid, requester_id: Uuid) -> CoreResult<()> {
        let comment = self
            .db
            .get_comment(comment_id)?
            .ok_or(CoreError::NotFound("comment"))?;
        if comment.author_id != requester_id {
            return Err(CoreError::Forbidden("only the author can change this comment"));
        }
        Ok(())
    }
}

fn validate_title(title: &str) -> CoreResult<&str> {
    let title = title.trim();
    let len = title.chars().count();
    if len == 0 || len > MAX_TITLE_CHARS {
        return Err(CoreError::InvalidInput(format!(
            "title must be between 1 and {} characters",
            MAX_TITLE_CHARS
        )));
    }
    Ok(title)
}

fn validate_body(body: &str) -> CoreResult<&str> {
    let body = body.trim();
    if body.is_empty() {
        return Err(CoreError::InvalidInput("body must not be empty".to_string()));
    }
    Ok(body)
}

fn validate_comment(body: &str) -> CoreResult<&str> {
    let body = body.trim();
    if !COMMENT_CHARS.contains(&body.chars().count()) {
        return Err(CoreError::InvalidInput(format!(
            "comment must be between {} and {} characters",
            COMMENT_CHARS.start(),
            COMMENT_CHARS.end()
        )));
    }
    Ok(body)
}

/// Trimmed, lower-cased, empty entries dropped, duplicates removed in
/// first-seen order.
fn normalize_tags(tags: &[String]) -> CoreResult<Vec<String>> {
    let mut seen = HashSet::new();
    let tags: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect();

    if tags.len() > MAX_TAGS {
        return Err(CoreError::InvalidInput(format!("at most {} tags allowed", MAX_TAGS)));
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::RecordingPublisher;

    struct Fixture {
        forum: Forum,
        db: Arc<Database>,
        publisher: Arc<RecordingPublisher>,
        alice: Uuid,
        bob: Uuid,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let publisher = Arc::new(RecordingPublisher::default());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        db.create_user(alice, "alice", "hash").unwrap();
        db.create_user(bob, "bob", "hash").unwrap();
        Fixture {
            forum: Forum::new(db.clone(), publisher.clone()),
            db,
            publisher,
            alice,
            bob,
        }
    }

    fn ask(f: &Fixture, tags: &[&str]) -> Question {
        f.forum
            .create_question(
                f.alice,
                CreateQuestionRequest {
                    title: "How do lifetimes work?".to_string(),
                    body: "Asking for a friend".to_string(),
                    tags: tags.iter().map(|t| t.to_string()).collect(),
                },
            )
            .unwrap()
    }

    #[test]
    fn tags_are_normalized_and_capped() {
        let f = fixture();
        let q = ask(&f, &[" Rust ", "rust", "", "SQLite"]);
        assert_eq!(q.tags, vec!["rust", "sqlite"]);

        let err = f
            .forum
            .create_question(
                f.alice,
                CreateQuestionRequest {
                    title: "Too many".to_string(),
                    body: "tags".to_string(),
                    tags: (0..6).map(|i| format!("t{}", i)).collect(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn blank_title_is_rejected() {
        let f = fixture();
        let err = f
            .forum
            .create_question(
                f.alice,
                CreateQuestionRequest {
                    title: "   ".to_string(),
                    body: "body".to_string(),
                    tags: vec![],
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn viewing_counts_every_hit() {
        let f = fixture();
        let q = ask(&f, &[]);

        f.forum.view_question(q.id).unwrap();
        let detail = f.forum.view_question(q.id).unwrap();
        assert_eq!(detail.question.views, 2);
        assert!(matches!(f.forum.view_question(Uuid::new_v4()), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn only_author_edits_question() {
        let f = fixture();
        let q = ask(&f, &["rust"]);

        let req = || UpdateQuestionRequest {
            title: Some("Edited".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            f.forum.update_question(q.id, f.bob, req()),
            Err(CoreError::Forbidden(_))
        ));

        let updated = f.forum.update_question(q.id, f.alice, req()).unwrap();
        assert_eq!(updated.title, "Edited");
        assert_eq!(updated.body, q.body);
        assert_eq!(updated.tags, vec!["rust"]);
    }

    #[test]
    fn answering_notifies_asker_once_per_user() {
        let f = fixture();
        let q = ask(&f, &[]);

        let answer = f.forum.create_answer(q.id, f.bob, "Like this").unwrap();
        let inbox = f.db.list_notifications(f.alice, PageRequest::new(1, 10), false).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::NewAnswer);
        assert_eq!(inbox[0].answer_id, Some(answer.id));

        assert!(matches!(
            f.forum.create_answer(q.id, f.bob, "Again"),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(f
            .publisher
            .broadcasts
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, GatewayEvent::AnswerCreated { answer: a, .. } if a.id == answer.id)));
    }

    #[test]
    fn answering_own_question_is_silent() {
        let f = fixture();
        let q = ask(&f, &[]);
        f.forum.create_answer(q.id, f.alice, "Self answer").unwrap();
        assert_eq!(f.db.count_notifications(f.alice, false).unwrap(), 0);
    }

    #[test]
    fn comment_parent_and_length_are_checked() {
        let f = fixture();
        let q = ask(&f, &[]);

        let neither = f.forum.create_comment(f.bob, None, None, "hello");
        assert!(matches!(neither, Err(CoreError::InvalidInput(_))));
        let both = f.forum.create_comment(f.bob, Some(q.id), Some(Uuid::new_v4()), "hello");
        assert!(matches!(both, Err(CoreError::InvalidInput(_))));
        let short = f.forum.create_comment(f.bob, Some(q.id), None, " x ");
        assert!(matches!(short, Err(CoreError::InvalidInput(_))));
        let long = f.forum.create_comment(f.bob, Some(q.id), None, &"x".repeat(501));
        assert!(matches!(long, Err(CoreError::InvalidInput(_))));
        let orphan = f.forum.create_comment(f.bob, Some(Uuid::new_v4()), None, "hello");
        assert!(matches!(orphan, Err(CoreError::NotFound("question"))));
    }

    #[test]
    fn comment_on_answer_notifies_answer_author() {
        let f = fixture();
        let q = ask(&f, &[]);
        let answer = f.forum.create_answer(q.id, f.bob, "An answer").unwrap();

        let comment = f
            .forum
            .create_comment(f.alice, None, Some(answer.id), "Thanks!")
            .unwrap();
        assert_eq!(comment.parent, CommentParent::Answer(answer.id));

        let inbox = f.db.list_notifications(f.bob, PageRequest::new(1, 10), false).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::NewComment);
        assert_eq!(inbox[0].message, "alice commented on your answer");
        assert_eq!(inbox[0].question_id, Some(q.id));
        assert_eq!(inbox[0].comment_id, Some(comment.id));
    }

    #[test]
    fn only_fresh_upvotes_notify() {
        let f = fixture();
        let q = ask(&f, &[]);
        let target = TargetRef::Question(q.id);

        f.forum.vote(target, f.bob, "downvote").unwrap();
        assert_eq!(f.db.count_notifications(f.alice, false).unwrap(), 0);

        let switched = f.forum.vote(target, f.bob, "upvote").unwrap();
        assert_eq!(switched.vote_count, 1);
        assert_eq!(f.db.count_notifications(f.alice, false).unwrap(), 1);

        let removed = f.forum.vote(target, f.bob, "upvote").unwrap();
        assert_eq!(removed.user_vote, None);
        assert_eq!(f.db.count_notifications(f.alice, false).unwrap(), 1);
    }

    #[test]
    fn unlike_does_not_notify() {
        let f = fixture();
        let q = ask(&f, &[]);
        let answer = f.forum.create_answer(q.id, f.bob, "An answer").unwrap();
        let target = TargetRef::Answer(answer.id);

        let liked = f.forum.like(target, f.alice).unwrap();
        assert!(liked.liked);
        assert_eq!(liked.like_count, 1);
        let unliked = f.forum.like(target, f.alice).unwrap();
        assert!(!unliked.liked);
        assert_eq!(unliked.like_count, 0);

        let inbox = f.db.list_notifications(f.bob, PageRequest::new(1, 10), false).unwrap();
        let likes: Vec<_> = inbox.iter().filter(|n| n.kind == NotificationKind::AnswerLike).collect();
        assert_eq!(likes.len(), 1);
    }

    #[test]
    fn accept_notifies_answerer_only_once() {
        let f = fixture();
        let q = ask(&f, &[]);
        let answer = f.forum.create_answer(q.id, f.bob, "An answer").unwrap();

        f.forum.accept_answer(answer.id, f.alice).unwrap();
        f.forum.accept_answer(answer.id, f.alice).unwrap();

        let inbox = f.db.list_notifications(f.bob, PageRequest::new(1, 10), false).unwrap();
        let accepted = inbox
            .iter()
            .filter(|n| n.kind == NotificationKind::AnswerAccepted)
            .count();
        assert_eq!(accepted, 1);
    }

    #[test]
    fn deleting_accepted_answer_clears_question() {
        let f = fixture();
        let q = ask(&f, &[]);
        let answer = f.forum.create_answer(q.id, f.bob, "An answer").unwrap();
        f.forum.accept_answer(answer.id, f.alice).unwrap();

        assert!(matches!(
            f.forum.delete_answer(answer.id, f.alice),
            Err(CoreError::Forbidden(_))
        ));
        f.forum.delete_answer(answer.id, f.bob).unwrap();

        let question = f.db.get_question(q.id).unwrap().unwrap();
        assert_eq!(question.accepted_answer_id, None);
    }

    #[test]
    fn search_and_paging() {
        let f = fixture();
        for i in 0..3 {
            f.forum
                .create_question(
                    f.alice,
                    CreateQuestionRequest {
                        title: format!("borrow checker {}", i),
                        body: "body".to_string(),
                        tags: vec![],
                    },
                )
                .unwrap();
        }
        ask(&f, &[]);

        let page = f
            .forum
            .list_questions(PageRequest::new(1, 2), QuestionSort::Newest, SortOrder::Desc, Some("borrow"))
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total_pages, 2);

        let all = f
            .forum
            .list_questions(PageRequest::new(1, 10), QuestionSort::Newest, SortOrder::Desc, Some("  "))
            .unwrap();
        assert_eq!(all.total, 4);
    }

    fn break_inbox(f: &Fixture) {
        f.db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE notifications")?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn vote_and_like_report_committed_state_when_inbox_write_fails() {
        let f = fixture();
        let q = ask(&f, &[]);
        let target = TargetRef::Question(q.id);
        break_inbox(&f);

        let vote = f.forum.vote(target, f.bob, "upvote").unwrap();
        let liked = f.forum.like(target, f.bob).unwrap();

        let stored = f.db.get_reactions(target).unwrap().unwrap();
        assert_eq!(vote.vote_count, 1);
        assert_eq!(stored.vote_count, vote.vote_count);
        assert!(stored.upvoters.contains(&f.bob));
        assert!(liked.liked);
        assert_eq!(stored.like_count, liked.like_count);
        assert!(f.publisher.published.lock().unwrap().is_empty());
        let broadcasts = f.publisher.broadcasts.lock().unwrap();
        assert!(matches!(
            broadcasts.as_slice(),
            [.., GatewayEvent::VoteUpdated { vote_count: 1, .. }, GatewayEvent::LikeUpdated { like_count: 1, .. }]
        ));
    }

    #[test]
    fn answer_accept_and_comment_succeed_when_inbox_write_fails() {
        let f = fixture();
        let q = ask(&f, &[]);
        break_inbox(&f);

        let answer = f.forum.create_answer(q.id, f.bob, "Read the nomicon").unwrap();
        assert!(f.db.get_answer(answer.id).unwrap().is_some());

        let acceptance = f.forum.accept_answer(answer.id, f.alice).unwrap();
        assert!(acceptance.newly_accepted);
        let question = f.db.get_question(q.id).unwrap().unwrap();
        assert_eq!(question.accepted_answer_id, Some(answer.id));
        assert!(f.db.get_answer(answer.id).unwrap().unwrap().is_accepted);

        let comment = f
            .forum
            .create_comment(f.alice, None, Some(answer.id), "Thanks!")
            .unwrap();
        assert!(f.db.get_comment(comment.id).unwrap().is_some());
        assert!(f.publisher.published.lock().unwrap().is_empty());
    }
}
