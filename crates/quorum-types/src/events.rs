use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Answer, Comment, Notification, Question, TargetRef};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A notification was written to the recipient's inbox.
    /// Only ever sent on the recipient's own topic.
    Notification(Notification),

    /// A question was asked
    QuestionCreated { question: Question },

    /// An answer was posted to a question
    AnswerCreated { question_id: Uuid, answer: Answer },

    /// A comment was posted on a question or answer
    CommentCreated { question_id: Uuid, comment: Comment },

    /// A vote changed the counters of a question or answer
    VoteUpdated {
        target: TargetRef,
        vote_count: i64,
        upvotes: usize,
        downvotes: usize,
    },

    /// A like or unlike changed the like counter
    LikeUpdated { target: TargetRef, like_count: i64 },

    /// The question author accepted an answer
    AnswerAccepted {
        question_id: Uuid,
        answer_id: Uuid,
        previous_answer_id: Option<Uuid>,
    },
}

impl GatewayEvent {
    /// Returns the recipient if this event belongs on a single user's topic.
    /// Events that return `None` are feed events delivered to every client.
    pub fn recipient_id(&self) -> Option<Uuid> {
        match self {
            Self::Notification(n) => Some(n.recipient_id),
            Self::Ready { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Join the personal notification topic. Only the identified user's own
    /// id is accepted.
    JoinUser { user_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_type_and_data_envelope() {
        let raw = r#"{"type":"Identify","data":{"token":"abc"}}"#;
        match serde_json::from_str::<GatewayCommand>(raw).unwrap() {
            GatewayCommand::Identify { token } => assert_eq!(token, "abc"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn feed_events_have_no_recipient() {
        let event = GatewayEvent::LikeUpdated {
            target: TargetRef::Question(Uuid::new_v4()),
            like_count: 3,
        };
        assert_eq!(event.recipient_id(), None);
    }
}
