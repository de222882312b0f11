//! Stake-weighted price discovery engine.
//!
//! Participants stake tokens behind candidate prices during a bounded round;
//! the candidate carrying the greatest aggregate stake when the round closes
//! becomes the reference price published to the attached exchange. The engine
//! owns three tightly coupled pieces of state:
//!
//! - a per-round [`ranked::RankedList`] ordering candidates by aggregate stake,
//!   placed with caller-supplied (untrusted) neighbor hints,
//! - a durable [`ledger::RoundLedger`] of per-(round, candidate, participant)
//!   staked tokens and attached tips,
//! - the round lifecycle and settlement state machine in [`engine::PriceVote`].
//!
//! # Execution model
//!
//! Calls are single-threaded and serialized, but any outbound value transfer
//! through the [`capabilities::BalanceLedger`] capability may synchronously
//! re-enter the engine before the original call returns. The engine therefore
//! never holds a borrow of its internal state across a capability call, and
//! every balance-reducing ledger write completes before the corresponding
//! outbound transfer. See `engine` module docs for the full discipline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod capabilities;
pub mod config;
pub mod engine;
pub mod events;
pub mod invariants;
pub mod ledger;
pub mod math;
pub mod ranked;

pub use capabilities::{
    BalanceLedger, Clock, Exchange, InMemoryBalanceLedger, InMemoryExchange, ManualClock,
};
pub use config::EngineConfig;
pub use engine::{ClaimOutcome, PriceVote, RoundEnd, RoundStatus};
pub use events::Event;
pub use ledger::{RoundLedger, StakeEntry};
pub use ranked::{Hints, RankedList};

pub const BPS_U16: u16 = 10_000;
pub const BPS_U64: u64 = 10_000;

/// Participant account identifier (opaque 32 bytes supplied by the embedder).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    pub const MIN: AccountId = AccountId([0u8; 32]);
    pub const MAX: AccountId = AccountId([0xff; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        AccountId(bytes)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Candidate price: opaque nonzero unsigned value participants nominate.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Price(pub u64);

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token amount (stake, tip, or aggregate candidate weight).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Tokens(u64);

impl Tokens {
    pub const ZERO: Tokens = Tokens(0);

    pub const fn new(v: u64) -> Tokens {
        Tokens(v)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Tokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing round identifier. Round 0 never exists; the first
/// started round is round 1.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RoundId(pub u64);

impl std::fmt::Display for RoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Basis points in `[0, 10_000]` (correct-by-construction).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bps(u16);

impl Bps {
    pub const ZERO: Bps = Bps(0);
    pub const MAX: Bps = Bps(BPS_U16);

    /// Constructs a bounded bps value; fails closed on out-of-range input.
    pub fn new(v: u16) -> Result<Bps> {
        if v <= BPS_U16 {
            Ok(Bps(v))
        } else {
            Err(StakeRankError::BpsOutOfRange(v))
        }
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }
}

impl TryFrom<u16> for Bps {
    type Error = StakeRankError;

    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        Bps::new(value)
    }
}

/// Unified error type. Every failure cause surfaces as its own named
/// condition; nothing is reported generically and nothing fails silently.
#[derive(Debug, Error)]
pub enum StakeRankError {
    // Lifecycle preconditions.
    #[error("round {round} is already active")]
    RoundAlreadyActive { round: RoundId },

    #[error("no active round")]
    NoActiveRound,

    #[error("voting window closed for round {round}: closes at {closes_at}, now {now}")]
    VotingWindowClosed {
        round: RoundId,
        closes_at: u64,
        now: u64,
    },

    #[error("round {round} still open: closes at {closes_at}, now {now}")]
    RoundStillOpen {
        round: RoundId,
        closes_at: u64,
        now: u64,
    },

    #[error("caller balance {balance} does not exceed start threshold {required}")]
    StartThresholdNotMet { balance: u64, required: u64 },

    #[error("caller balance {balance} does not exceed vote threshold {required}")]
    VoteThresholdNotMet { balance: u64, required: u64 },

    // Input preconditions.
    #[error("candidate price must be nonzero")]
    InvalidCandidate,

    #[error("amount must be > 0")]
    ZeroAmount,

    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: u64, required: u64 },

    #[error("insufficient stake: staked {staked}, requested {requested}")]
    InsufficientStake { staked: u64, requested: u64 },

    #[error("listed weight too low for candidate {candidate}: weight {weight}, requested {requested}")]
    InsufficientWeight {
        candidate: Price,
        weight: u64,
        requested: u64,
    },

    // Ranked list conditions.
    #[error("candidate already listed: {0}")]
    CandidateExists(Price),

    #[error("candidate not listed: {0}")]
    CandidateNotFound(Price),

    #[error("node weight must be > 0")]
    ZeroWeight,

    // Value transfer failures (propagated after bookkeeping rollback).
    #[error("value transfer failed: {0}")]
    TransferFailed(String),

    // Arithmetic bounds (always detected before any commit).
    #[error("arithmetic overflow in {0}")]
    ArithmeticOverflow(&'static str),

    #[error("arithmetic underflow in {0}")]
    ArithmeticUnderflow(&'static str),

    #[error("division by zero in {0}")]
    DivisionByZero(&'static str),

    // Configuration.
    #[error("bps out of range: {0} > 10000")]
    BpsOutOfRange(u16),

    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, StakeRankError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bps_rejects_out_of_range() {
        assert!(Bps::new(10_000).is_ok());
        assert!(matches!(
            Bps::new(10_001),
            Err(StakeRankError::BpsOutOfRange(10_001))
        ));
    }

    #[test]
    fn account_id_displays_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        assert!(AccountId(bytes).to_string().starts_with("ab00"));
    }

    #[test]
    fn account_id_bounds_order() {
        assert!(AccountId::MIN < AccountId::MAX);
    }
}
