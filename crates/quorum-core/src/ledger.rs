use std::sync::Arc;

use uuid::Uuid;

use quorum_db::Database;
use quorum_types::models::{LikeOutcome, Reactions, TargetKind, TargetRef, VoteOutcome, VoteType};

use crate::error::{CoreError, CoreResult};

/// Applies `vote` for `user_id`.
///
/// Repeating the vote the user already holds removes it; voting the other
/// way moves the user across in one step. `vote_count` is recomputed from
/// the sets every time.
pub fn apply_vote(reactions: &mut Reactions, user_id: Uuid, vote: VoteType) -> VoteOutcome {
    let previous = reactions.vote_of(&user_id);

    if previous == Some(vote) {
        reactions.voters_mut(vote).remove(&user_id);
    } else {
        reactions.voters_mut(vote.opposite()).remove(&user_id);
        reactions.voters_mut(vote).insert(user_id);
    }

    reactions.vote_count = reactions.upvoters.len() as i64 - reactions.downvoters.len() as i64;

    VoteOutcome {
        previous,
        current: reactions.vote_of(&user_id),
    }
}

/// Likes or unlikes on behalf of `user_id`.
pub fn toggle_like(reactions: &mut Reactions, user_id: Uuid) -> LikeOutcome {
    if reactions.likers.remove(&user_id) {
        reactions.like_count = (reactions.like_count - 1).max(0);
        LikeOutcome::Unliked
    } else {
        reactions.likers.insert(user_id);
        reactions.like_count += 1;
        LikeOutcome::Liked
    }
}

/// Runs the vote/like rules through the store's atomic update, so concurrent
/// reactions on the same target never lose each other.
///
/// Emits no notifications; callers decide what a reaction is worth telling.
#[derive(Clone)]
pub struct ReactionLedger {
    db: Arc<Database>,
}

impl ReactionLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn vote(
        &self,
        target: TargetRef,
        user_id: Uuid,
        vote: VoteType,
    ) -> CoreResult<(Reactions, VoteOutcome)> {
        self.db
            .update_reactions(target, |r| apply_vote(r, user_id, vote))?
            .ok_or(CoreError::NotFound(target_label(target)))
    }

    /// Parses the client's vote type first; anything other than
    /// `"upvote"` / `"downvote"` is rejected before the store is touched.
    pub fn vote_raw(
        &self,
        target: TargetRef,
        user_id: Uuid,
        vote_type: &str,
    ) -> CoreResult<(Reactions, VoteOutcome)> {
        let vote = vote_type.parse::<VoteType>()?;
        self.vote(target, user_id, vote)
    }

    pub fn like(&self, target: TargetRef, user_id: Uuid) -> CoreResult<(Reactions, LikeOutcome)> {
        self.db
            .update_reactions(target, |r| toggle_like(r, user_id))?
            .ok_or(CoreError::NotFound(target_label(target)))
    }
}

pub(crate) fn target_label(target: TargetRef) -> &'static str {
    match target.kind() {
        TargetKind::Question => "question",
        TargetKind::Answer => "answer",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_vote_invariants(r: &Reactions) {
        assert!(r.upvoters.is_disjoint(&r.downvoters));
        assert_eq!(r.vote_count, r.upvoters.len() as i64 - r.downvoters.len() as i64);
    }

    #[test]
    fn upvote_twice_toggles_off() {
        let mut r = Reactions::default();
        let u = Uuid::new_v4();

        let first = apply_vote(&mut r, u, VoteType::Upvote);
        assert_eq!(first, VoteOutcome { previous: None, current: Some(VoteType::Upvote) });
        assert_eq!(r.vote_count, 1);

        let second = apply_vote(&mut r, u, VoteType::Upvote);
        assert_eq!(second.current, None);
        assert_eq!(r.vote_count, 0);
        assert!(r.upvoters.is_empty());
        assert_vote_invariants(&r);
    }

    #[test]
    fn switching_vote_moves_user_across() {
        let mut r = Reactions::default();
        let u = Uuid::new_v4();

        apply_vote(&mut r, u, VoteType::Downvote);
        assert_eq!(r.vote_count, -1);

        let outcome = apply_vote(&mut r, u, VoteType::Upvote);
        assert_eq!(outcome.previous, Some(VoteType::Downvote));
        assert_eq!(outcome.current, Some(VoteType::Upvote));
        assert!(!r.downvoters.contains(&u));
        assert!(r.upvoters.contains(&u));
        assert_eq!(r.vote_count, 1);
        assert_vote_invariants(&r);
    }

    #[test]
    fn stale_counter_is_overwritten() {
        let mut r = Reactions { vote_count: 42, ..Default::default() };
        apply_vote(&mut r, Uuid::new_v4(), VoteType::Downvote);
        assert_eq!(r.vote_count, -1);
    }

    #[test]
    fn many_users_keep_invariants() {
        let mut r = Reactions::default();
        let users: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
        let script = [
            VoteType::Upvote,
            VoteType::Downvote,
            VoteType::Upvote,
            VoteType::Upvote,
            VoteType::Downvote,
        ];

        for (round, vote) in script.iter().enumerate() {
            for (i, u) in users.iter().enumerate() {
                if (i + round) % 3 != 0 {
                    apply_vote(&mut r, *u, *vote);
                    assert_vote_invariants(&r);
                }
            }
        }
    }

    #[test]
    fn like_twice_restores_original_state() {
        let mut r = Reactions::default();
        let other = Uuid::new_v4();
        toggle_like(&mut r, other);
        let original = r.clone();

        let u = Uuid::new_v4();
        assert_eq!(toggle_like(&mut r, u), LikeOutcome::Liked);
        assert_eq!(r.like_count, 2);
        assert_eq!(toggle_like(&mut r, u), LikeOutcome::Unliked);
        assert_eq!(r, original);
    }

    #[test]
    fn like_count_never_goes_negative() {
        let u = Uuid::new_v4();
        let mut r = Reactions::default();
        r.likers.insert(u);

        assert_eq!(toggle_like(&mut r, u), LikeOutcome::Unliked);
        assert_eq!(r.like_count, 0);
    }

    #[test]
    fn ledger_reports_missing_target_and_bad_vote_type() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let ledger = ReactionLedger::new(db);
        let target = TargetRef::Answer(Uuid::new_v4());

        assert!(matches!(
            ledger.vote(target, Uuid::new_v4(), VoteType::Upvote),
            Err(CoreError::NotFound("answer"))
        ));
        assert!(matches!(
            ledger.vote_raw(target, Uuid::new_v4(), "meh"),
            Err(CoreError::InvalidVoteType(_))
        ));
        assert!(matches!(
            ledger.like(TargetRef::Question(Uuid::new_v4()), Uuid::new_v4()),
            Err(CoreError::NotFound("question"))
        ));
    }
}
