//! Engine events.
//!
//! The engine appends every emitted event to an in-process journal (drained
//! via [`crate::engine::PriceVote::take_events`]) and mirrors each one
//! through `tracing` for embedders running a subscriber.

use serde::{Deserialize, Serialize};

use crate::{AccountId, Price, RoundId, Tokens};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoundStarted {
        round: RoundId,
        started_at: u64,
    },
    CandidateVoted {
        voter: AccountId,
        round: RoundId,
        candidate: Price,
        amount: Tokens,
    },
    RoundEnded {
        round: RoundId,
        winner: Option<Price>,
        weight: Tokens,
    },
    Claimed {
        caller: AccountId,
        account: AccountId,
        round: RoundId,
        candidate: Price,
        tokens_paid: Tokens,
        tip_paid: Tokens,
    },
}
