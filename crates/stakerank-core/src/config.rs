//! Engine configuration with fail-closed validation.

use crate::{AccountId, Bps, Result, StakeRankError};

/// Configuration for a [`crate::engine::PriceVote`] engine.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Account holding escrowed stakes and tips in the balance ledger.
    pub vault: AccountId,

    /// Length of a round's voting window, in seconds.
    pub round_duration_secs: u64,

    /// A caller may start a round only while holding strictly more than this
    /// fraction of total supply.
    pub start_threshold_bps: Bps,

    /// Anti-spam floor for voting: the voter's balance must strictly exceed
    /// this fraction of total supply. Smaller than the start threshold.
    pub vote_threshold_bps: Bps,
}

impl EngineConfig {
    /// Defaults: 10-minute rounds, 10% start threshold, 0.1% vote threshold.
    pub fn new(vault: AccountId) -> EngineConfig {
        EngineConfig {
            vault,
            round_duration_secs: 600,
            start_threshold_bps: Bps::new(1_000).unwrap_or(Bps::MAX),
            vote_threshold_bps: Bps::new(10).unwrap_or(Bps::ZERO),
        }
    }

    pub fn with_round_duration_secs(mut self, secs: u64) -> EngineConfig {
        self.round_duration_secs = secs;
        self
    }

    pub fn with_start_threshold(mut self, bps: Bps) -> EngineConfig {
        self.start_threshold_bps = bps;
        self
    }

    pub fn with_vote_threshold(mut self, bps: Bps) -> EngineConfig {
        self.vote_threshold_bps = bps;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.round_duration_secs == 0 {
            return Err(StakeRankError::ConfigError(
                "round_duration_secs must be > 0".into(),
            ));
        }
        if self.vote_threshold_bps >= self.start_threshold_bps {
            return Err(StakeRankError::ConfigError(format!(
                "vote threshold ({} bps) must be below start threshold ({} bps)",
                self.vote_threshold_bps.get(),
                self.start_threshold_bps.get()
            )));
        }
        Ok(())
    }
}
