//! Consistency rules for votes, likes, answer acceptance and notifications.
//!
//! Route handlers talk to [`Forum`]; the ledger, the acceptance coordinator
//! and the notification dispatcher are exposed for callers that need a
//! single piece.

pub mod acceptance;
pub mod error;
pub mod forum;
pub mod ledger;
pub mod notify;

pub use acceptance::{Acceptance, AcceptanceCoordinator};
pub use error::{CoreError, CoreResult};
pub use forum::Forum;
pub use ledger::ReactionLedger;
pub use notify::{LivePublisher, NotificationDispatcher, user_topic};
