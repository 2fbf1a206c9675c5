use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub reputation: i64,
    pub created_at: DateTime<Utc>,
}

// -- Targets --

/// The kind of entity a reaction is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Question,
    Answer,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Answer => "answer",
        }
    }
}

/// A votable/likeable entity. Replaces guessing the target from which
/// foreign key happens to be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TargetRef {
    Question(Uuid),
    Answer(Uuid),
}

impl TargetRef {
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Question(_) => TargetKind::Question,
            Self::Answer(_) => TargetKind::Answer,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Question(id) | Self::Answer(id) => *id,
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind().as_str(), self.id())
    }
}

/// Where a comment hangs. Exactly one parent, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CommentParent {
    Question(Uuid),
    Answer(Uuid),
}

impl CommentParent {
    /// Builds a parent from the two optional ids a client sends.
    /// Returns `None` unless exactly one is present.
    pub fn from_ids(question_id: Option<Uuid>, answer_id: Option<Uuid>) -> Option<Self> {
        match (question_id, answer_id) {
            (Some(q), None) => Some(Self::Question(q)),
            (None, Some(a)) => Some(Self::Answer(a)),
            _ => None,
        }
    }

    pub fn question_id(&self) -> Option<Uuid> {
        match self {
            Self::Question(id) => Some(*id),
            Self::Answer(_) => None,
        }
    }

    pub fn answer_id(&self) -> Option<Uuid> {
        match self {
            Self::Answer(id) => Some(*id),
            Self::Question(_) => None,
        }
    }
}

// -- Reactions --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteType {
    Upvote,
    Downvote,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upvote => "upvote",
            Self::Downvote => "downvote",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Upvote => Self::Downvote,
            Self::Downvote => Self::Upvote,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid vote type: {0:?}")]
pub struct InvalidVoteType(pub String);

impl FromStr for VoteType {
    type Err = InvalidVoteType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upvote" => Ok(Self::Upvote),
            "downvote" => Ok(Self::Downvote),
            other => Err(InvalidVoteType(other.to_string())),
        }
    }
}

/// Voter and liker sets of a question or answer, plus their derived counters.
///
/// `upvoters` and `downvoters` are disjoint; `vote_count` and `like_count`
/// always reflect the set sizes after any mutation through the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reactions {
    pub upvoters: HashSet<Uuid>,
    pub downvoters: HashSet<Uuid>,
    pub vote_count: i64,
    pub likers: HashSet<Uuid>,
    pub like_count: i64,
}

impl Reactions {
    /// The vote currently held by `user_id`, if any.
    pub fn vote_of(&self, user_id: &Uuid) -> Option<VoteType> {
        if self.upvoters.contains(user_id) {
            Some(VoteType::Upvote)
        } else if self.downvoters.contains(user_id) {
            Some(VoteType::Downvote)
        } else {
            None
        }
    }

    pub fn voters_mut(&mut self, vote: VoteType) -> &mut HashSet<Uuid> {
        match vote {
            VoteType::Upvote => &mut self.upvoters,
            VoteType::Downvote => &mut self.downvoters,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOutcome {
    pub previous: Option<VoteType>,
    pub current: Option<VoteType>,
}

impl VoteOutcome {
    /// True when this call left the user holding an upvote they did not hold before.
    pub fn upvote_landed(&self) -> bool {
        self.current == Some(VoteType::Upvote) && self.previous != Some(VoteType::Upvote)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikeOutcome {
    Liked,
    Unliked,
}

// -- Content --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub author_id: Uuid,
    pub author_username: String,
    pub views: i64,
    pub accepted_answer_id: Option<Uuid>,
    pub reactions: Reactions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub id: Uuid,
    pub question_id: Uuid,
    pub body: String,
    pub author_id: Uuid,
    pub author_username: String,
    pub is_accepted: bool,
    pub accepted_at: Option<DateTime<Utc>>,
    pub accepted_by: Option<Uuid>,
    pub reactions: Reactions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub body: String,
    pub author_id: Uuid,
    pub author_username: String,
    pub parent: CommentParent,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Notifications --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewAnswer,
    NewComment,
    QuestionLike,
    AnswerLike,
    AnswerAccepted,
    QuestionVote,
    AnswerVote,
    CommentLike,
    Mention,
    BountyAwarded,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewAnswer => "new_answer",
            Self::NewComment => "new_comment",
            Self::QuestionLike => "question_like",
            Self::AnswerLike => "answer_like",
            Self::AnswerAccepted => "answer_accepted",
            Self::QuestionVote => "question_vote",
            Self::AnswerVote => "answer_vote",
            Self::CommentLike => "comment_like",
            Self::Mention => "mention",
            Self::BountyAwarded => "bounty_awarded",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown notification kind: {0:?}")]
pub struct UnknownNotificationKind(pub String);

impl FromStr for NotificationKind {
    type Err = UnknownNotificationKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "new_answer" => Self::NewAnswer,
            "new_comment" => Self::NewComment,
            "question_like" => Self::QuestionLike,
            "answer_like" => Self::AnswerLike,
            "answer_accepted" => Self::AnswerAccepted,
            "question_vote" => Self::QuestionVote,
            "answer_vote" => Self::AnswerVote,
            "comment_like" => Self::CommentLike,
            "mention" => Self::Mention,
            "bounty_awarded" => Self::BountyAwarded,
            other => return Err(UnknownNotificationKind(other.to_string())),
        })
    }
}

/// Entities a notification points back to. All optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationContext {
    pub question_id: Option<Uuid>,
    pub answer_id: Option<Uuid>,
    pub comment_id: Option<Uuid>,
}

/// Immutable once created, except for the one-way unread -> read transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub question_id: Option<Uuid>,
    pub answer_id: Option<Uuid>,
    pub comment_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_type_parses_known_values_only() {
        assert_eq!("upvote".parse::<VoteType>(), Ok(VoteType::Upvote));
        assert_eq!("downvote".parse::<VoteType>(), Ok(VoteType::Downvote));
        assert_eq!(
            "sidevote".parse::<VoteType>(),
            Err(InvalidVoteType("sidevote".into()))
        );
        assert!("Upvote".parse::<VoteType>().is_err());
    }

    #[test]
    fn comment_parent_requires_exactly_one_id() {
        let q = Uuid::new_v4();
        let a = Uuid::new_v4();
        assert_eq!(CommentParent::from_ids(Some(q), None), Some(CommentParent::Question(q)));
        assert_eq!(CommentParent::from_ids(None, Some(a)), Some(CommentParent::Answer(a)));
        assert_eq!(CommentParent::from_ids(Some(q), Some(a)), None);
        assert_eq!(CommentParent::from_ids(None, None), None);
    }

    #[test]
    fn notification_kind_string_forms_agree_with_serde() {
        let kinds = [
            NotificationKind::NewAnswer,
            NotificationKind::NewComment,
            NotificationKind::QuestionLike,
            NotificationKind::AnswerLike,
            NotificationKind::AnswerAccepted,
            NotificationKind::QuestionVote,
            NotificationKind::AnswerVote,
            NotificationKind::CommentLike,
            NotificationKind::Mention,
            NotificationKind::BountyAwarded,
        ];
        for kind in kinds {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.as_str().parse::<NotificationKind>(), Ok(kind));
        }
    }

    #[test]
    fn target_ref_serializes_as_tagged_variant() {
        let id = Uuid::nil();
        let json = serde_json::to_value(TargetRef::Answer(id)).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "answer", "id": id }));
    }

    #[test]
    fn upvote_landed_only_on_fresh_upvote() {
        let fresh = VoteOutcome { previous: None, current: Some(VoteType::Upvote) };
        let switched = VoteOutcome { previous: Some(VoteType::Downvote), current: Some(VoteType::Upvote) };
        let undone = VoteOutcome { previous: Some(VoteType::Upvote), current: None };
        assert!(fresh.upvote_landed());
        assert!(switched.upvote_landed());
        assert!(!undone.upvote_landed());
    }
}
