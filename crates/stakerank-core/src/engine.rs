//! Round lifecycle and settlement engine.
//!
//! [`PriceVote`] owns one explicit context: the round counter, the active
//! round, the per-round ranked-list arena, the stake/tip ledger, and the
//! winning price. All of it lives behind a single `RefCell`, and public
//! operations take `&self` so a capability callback can legally re-enter the
//! engine mid-call.
//!
//! # Reentrancy discipline
//!
//! Two rules keep adversarial reentrancy harmless, and both are load-bearing:
//!
//! 1. No `RefCell` borrow is ever held across a capability call. A violation
//!    panics the moment a test re-enters, so it cannot ship quietly.
//! 2. Every balance-reducing ledger write for a key completes before the
//!    corresponding outbound transfer for that key. A callback that re-enters
//!    during the transfer re-reads an already-zeroed (or already-decremented)
//!    entry and can never drain the same value twice. If the transfer fails,
//!    the not-yet-paid bookkeeping is restored additively — additively, so a
//!    legal reentrant mutation that happened inside the callback survives the
//!    rollback.

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::capabilities::{BalanceLedger, Clock, Exchange};
use crate::config::EngineConfig;
use crate::events::Event;
use crate::ledger::{RoundLedger, StakeEntry};
use crate::ranked::{Hints, RankedList};
use crate::{math, AccountId, Price, Result, RoundId, StakeRankError, Tokens};

/// The currently open round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ActiveRound {
    pub(crate) id: RoundId,
    pub(crate) started_at: u64,
}

/// All mutable engine state, in one place (never ambient globals).
#[derive(Debug, Default)]
pub(crate) struct EngineState {
    /// Highest round id ever issued; only increases.
    pub(crate) round_seq: u64,
    pub(crate) active: Option<ActiveRound>,
    pub(crate) started_at: BTreeMap<RoundId, u64>,
    /// Arena of per-round rankings, keyed by round id. Closed rounds keep
    /// their final list; nothing is ever torn down.
    pub(crate) lists: BTreeMap<RoundId, RankedList>,
    pub(crate) stakes: RoundLedger,
    pub(crate) winning_price: Option<Price>,
    pub(crate) events: Vec<Event>,
}

/// Status view of the active round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStatus {
    pub id: RoundId,
    pub started_at: u64,
    pub closes_at: u64,
}

/// Outcome of `end()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEnd {
    pub round: RoundId,
    pub winner: Option<Price>,
    pub weight: Tokens,
}

/// Outcome of `claim()`. All-zero is a successful no-op.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOutcome {
    pub tokens_paid: Tokens,
    pub tip_paid: Tokens,
}

/// Stake-weighted price discovery engine.
pub struct PriceVote {
    cfg: EngineConfig,
    balances: Rc<dyn BalanceLedger>,
    exchange: Rc<dyn Exchange>,
    clock: Rc<dyn Clock>,
    state: RefCell<EngineState>,
}

impl PriceVote {
    /// Creates an engine with a validated configuration.
    pub fn new(
        cfg: EngineConfig,
        balances: Rc<dyn BalanceLedger>,
        exchange: Rc<dyn Exchange>,
        clock: Rc<dyn Clock>,
    ) -> Result<PriceVote> {
        cfg.validate()?;
        Ok(PriceVote {
            cfg,
            balances,
            exchange,
            clock,
            state: RefCell::new(EngineState::default()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub(crate) fn state_ref(&self) -> Ref<'_, EngineState> {
        self.state.borrow()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Opens a new round. The caller's balance must strictly exceed the
    /// configured fraction of total supply.
    pub fn start(&self, caller: AccountId) -> Result<RoundId> {
        let now = self.clock.now();
        let supply = self.exchange.total_supply();
        let required = math::floor_bps(supply.get(), self.cfg.start_threshold_bps)?;
        let balance = self.balances.balance_of(caller).get();

        let round = {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            if let Some(active) = st.active {
                return Err(StakeRankError::RoundAlreadyActive { round: active.id });
            }
            if balance <= required {
                return Err(StakeRankError::StartThresholdNotMet { balance, required });
            }
            st.round_seq = math::add_u64(st.round_seq, 1)?;
            let round = RoundId(st.round_seq);
            st.active = Some(ActiveRound {
                id: round,
                started_at: now,
            });
            st.started_at.insert(round, now);
            st.events.push(Event::RoundStarted {
                round,
                started_at: now,
            });
            round
        };
        info!(round = round.0, started_at = now, "round started");
        Ok(round)
    }

    /// Stakes `amount` behind `candidate` in the active round, attaching
    /// `tip` for whoever later settles the entry via `claim`.
    ///
    /// `amount + tip` is escrowed into the vault before any bookkeeping
    /// commits; the commit itself recomputes every sum against post-escrow
    /// state, so a reentrant vote delivered by the escrow transfer cannot
    /// race the aggregates.
    pub fn vote(
        &self,
        caller: AccountId,
        candidate: Price,
        amount: Tokens,
        hints: Hints,
        tip: Tokens,
    ) -> Result<()> {
        if candidate.0 == 0 {
            return Err(StakeRankError::InvalidCandidate);
        }
        if amount.is_zero() {
            return Err(StakeRankError::ZeroAmount);
        }

        let now = self.clock.now();
        let round = {
            let guard = self.state.borrow();
            let active = guard.active.ok_or(StakeRankError::NoActiveRound)?;
            let closes_at = math::add_u64(active.started_at, self.cfg.round_duration_secs)?;
            if now > closes_at {
                return Err(StakeRankError::VotingWindowClosed {
                    round: active.id,
                    closes_at,
                    now,
                });
            }
            active.id
        };

        let supply = self.exchange.total_supply();
        let floor = math::floor_bps(supply.get(), self.cfg.vote_threshold_bps)?;
        let balance = self.balances.balance_of(caller).get();
        if balance <= floor {
            return Err(StakeRankError::VoteThresholdNotMet {
                balance,
                required: floor,
            });
        }
        let total_in = Tokens::new(math::add_u64(amount.get(), tip.get())?);
        if balance < total_in.get() {
            return Err(StakeRankError::InsufficientBalance {
                balance,
                required: total_in.get(),
            });
        }

        // Escrow first: nothing is committed yet, so a failed or reentrant
        // transfer leaves the engine untouched.
        self.balances.transfer(caller, self.cfg.vault, total_in)?;

        let commit = (|| -> Result<()> {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            let entry = st.stakes.get(round, candidate, caller);
            let new_staked = math::add_u64(entry.staked.get(), amount.get())?;
            let new_tip = math::add_u64(entry.tip.get(), tip.get())?;
            let list = st.lists.entry(round).or_default();
            match list.weight_of(candidate) {
                Some(weight) => {
                    let new_weight = math::add_u64(weight.get(), amount.get())?;
                    list.update(candidate, Tokens::new(new_weight), hints)?;
                }
                None => list.insert(candidate, amount, hints)?,
            }
            st.stakes.set(
                round,
                candidate,
                caller,
                StakeEntry {
                    staked: Tokens::new(new_staked),
                    tip: Tokens::new(new_tip),
                },
            );
            st.events.push(Event::CandidateVoted {
                voter: caller,
                round,
                candidate,
                amount,
            });
            Ok(())
        })();
        if let Err(err) = commit {
            // Escrow went through but bookkeeping could not; refund it. The
            // commit error stays the reported cause even if the refund also
            // fails — that failure is logged, not substituted.
            if let Err(refund_err) = self.balances.transfer(self.cfg.vault, caller, total_in) {
                error!(
                    caller = %caller,
                    round = round.0,
                    amount = total_in.get(),
                    refund_error = %refund_err,
                    "escrow refund failed after aborted vote commit"
                );
            }
            return Err(err);
        }

        info!(
            voter = %caller,
            round = round.0,
            candidate = candidate.0,
            amount = amount.get(),
            tip = tip.get(),
            "vote recorded"
        );
        Ok(())
    }

    /// Closes the active round once its window has elapsed. Permissionless.
    /// Publishes the head of the ranking (if any) as the new winning price.
    pub fn end(&self) -> Result<RoundEnd> {
        let now = self.clock.now();
        let outcome = {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            let active = st.active.ok_or(StakeRankError::NoActiveRound)?;
            let closes_at = math::add_u64(active.started_at, self.cfg.round_duration_secs)?;
            if now <= closes_at {
                return Err(StakeRankError::RoundStillOpen {
                    round: active.id,
                    closes_at,
                    now,
                });
            }
            let list = st.lists.get(&active.id);
            let winner = list.and_then(|l| l.peek_max());
            let weight = winner
                .and_then(|w| list.and_then(|l| l.weight_of(w)))
                .unwrap_or(Tokens::ZERO);
            if let Some(price) = winner {
                st.winning_price = Some(price);
            }
            st.active = None;
            st.events.push(Event::RoundEnded {
                round: active.id,
                winner,
                weight,
            });
            RoundEnd {
                round: active.id,
                winner,
                weight,
            }
        };
        // State is final; publishing may hand control to external code.
        if let Some(price) = outcome.winner {
            self.exchange.publish_reference_price(price, outcome.weight);
        }
        info!(
            round = outcome.round.0,
            winner = outcome.winner.map(|p| p.0),
            weight = outcome.weight.get(),
            "round ended"
        );
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    /// Returns `amount` of the caller's stake behind `candidate` in the
    /// active round, repositioning or removing the candidate's node. After a
    /// round closes, `claim` is the only recovery path.
    pub fn withdraw(
        &self,
        caller: AccountId,
        candidate: Price,
        amount: Tokens,
        hints: Hints,
    ) -> Result<()> {
        if amount.is_zero() {
            return Err(StakeRankError::ZeroAmount);
        }
        let round = {
            let mut guard = self.state.borrow_mut();
            let st = &mut *guard;
            let active = st.active.ok_or(StakeRankError::NoActiveRound)?;
            let round = active.id;
            let entry = st.stakes.get(round, candidate, caller);
            if entry.staked.get() < amount.get() {
                return Err(StakeRankError::InsufficientStake {
                    staked: entry.staked.get(),
                    requested: amount.get(),
                });
            }
            let list = st
                .lists
                .get_mut(&round)
                .ok_or(StakeRankError::CandidateNotFound(candidate))?;
            let weight = list
                .weight_of(candidate)
                .ok_or(StakeRankError::CandidateNotFound(candidate))?;
            if weight.get() < amount.get() {
                return Err(StakeRankError::InsufficientWeight {
                    candidate,
                    weight: weight.get(),
                    requested: amount.get(),
                });
            }
            let new_weight = math::sub_u64(weight.get(), amount.get())?;
            if new_weight > 0 {
                list.update(candidate, Tokens::new(new_weight), hints)?;
            } else {
                list.remove(candidate)?;
            }
            let new_staked = math::sub_u64(entry.staked.get(), amount.get())?;
            st.stakes.set(
                round,
                candidate,
                caller,
                StakeEntry {
                    staked: Tokens::new(new_staked),
                    tip: entry.tip,
                },
            );
            round
        };

        // Bookkeeping is final; now the outbound transfer (reentrancy
        // window). On failure, put the stake back exactly.
        if let Err(err) = self.balances.transfer(self.cfg.vault, caller, amount) {
            self.restore_stake(round, candidate, caller, amount)?;
            return Err(err);
        }
        info!(
            caller = %caller,
            round = round.0,
            candidate = candidate.0,
            amount = amount.get(),
            "stake withdrawn"
        );
        Ok(())
    }

    /// Settles one (round, candidate, account) entry of a closed round:
    /// staked tokens flow to `account`, the tip flows to `caller` — whoever
    /// that is, so third parties have a reason to process stale entries.
    /// Zero amounts succeed as a no-op, which makes repeated claims harmless.
    ///
    /// The active round is off limits: its ledger entries back listed
    /// weights, and paying one out mid-round would leave the candidate
    /// ranked by stake that is no longer locked. `withdraw` is the only
    /// mid-round recovery path.
    pub fn claim(
        &self,
        caller: AccountId,
        account: AccountId,
        round: RoundId,
        candidate: Price,
    ) -> Result<ClaimOutcome> {
        let now = self.clock.now();
        {
            let guard = self.state.borrow();
            if let Some(active) = guard.active {
                if active.id == round {
                    let closes_at =
                        math::add_u64(active.started_at, self.cfg.round_duration_secs)?;
                    return Err(StakeRankError::RoundStillOpen {
                        round,
                        closes_at,
                        now,
                    });
                }
            }
        }

        // Zero the entry before any payment: a reentrant claim from inside a
        // payment callback re-reads zeros and settles nothing.
        let taken = self.state.borrow_mut().stakes.take(round, candidate, account);
        if taken.is_zero() {
            return Ok(ClaimOutcome::default());
        }

        if !taken.staked.is_zero() {
            if let Err(err) = self.balances.transfer(self.cfg.vault, account, taken.staked) {
                // Nothing external happened; restore the whole entry.
                self.state
                    .borrow_mut()
                    .stakes
                    .restore(round, candidate, account, taken.staked, taken.tip)?;
                return Err(err);
            }
        }
        if !taken.tip.is_zero() {
            if let Err(err) = self.balances.transfer(self.cfg.vault, caller, taken.tip) {
                // The staked leg is already final in the external ledger;
                // restore only what is still owed so a later claim retries
                // exactly the tip and nothing can be paid twice.
                self.state
                    .borrow_mut()
                    .stakes
                    .restore(round, candidate, account, Tokens::ZERO, taken.tip)?;
                return Err(err);
            }
        }

        self.state.borrow_mut().events.push(Event::Claimed {
            caller,
            account,
            round,
            candidate,
            tokens_paid: taken.staked,
            tip_paid: taken.tip,
        });
        info!(
            caller = %caller,
            account = %account,
            round = round.0,
            candidate = candidate.0,
            tokens_paid = taken.staked.get(),
            tip_paid = taken.tip.get(),
            "entry claimed"
        );
        Ok(ClaimOutcome {
            tokens_paid: taken.staked,
            tip_paid: taken.tip,
        })
    }

    /// Additive rollback of a withdrawn stake (ledger entry + list weight).
    fn restore_stake(
        &self,
        round: RoundId,
        candidate: Price,
        account: AccountId,
        amount: Tokens,
    ) -> Result<()> {
        let mut guard = self.state.borrow_mut();
        let st = &mut *guard;
        st.stakes
            .restore(round, candidate, account, amount, Tokens::ZERO)?;
        let list = st.lists.entry(round).or_default();
        match list.weight_of(candidate) {
            Some(weight) => {
                let new_weight = math::add_u64(weight.get(), amount.get())?;
                list.update(candidate, Tokens::new(new_weight), Hints::NONE)?;
            }
            None => list.insert(candidate, amount, Hints::NONE)?,
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Views (all rounds stay queryable forever)
    // ------------------------------------------------------------------

    pub fn winning_price(&self) -> Option<Price> {
        self.state.borrow().winning_price
    }

    pub fn current_round(&self) -> Option<RoundStatus> {
        self.state.borrow().active.map(|active| RoundStatus {
            id: active.id,
            started_at: active.started_at,
            closes_at: active
                .started_at
                .saturating_add(self.cfg.round_duration_secs),
        })
    }

    /// Number of rounds ever started.
    pub fn round_count(&self) -> u64 {
        self.state.borrow().round_seq
    }

    pub fn round_started_at(&self, round: RoundId) -> Option<u64> {
        self.state.borrow().started_at.get(&round).copied()
    }

    pub fn staked(&self, round: RoundId, candidate: Price, account: AccountId) -> Tokens {
        self.state.borrow().stakes.get(round, candidate, account).staked
    }

    pub fn tip(&self, round: RoundId, candidate: Price, account: AccountId) -> Tokens {
        self.state.borrow().stakes.get(round, candidate, account).tip
    }

    pub fn candidate_weight(&self, round: RoundId, candidate: Price) -> Option<Tokens> {
        self.state
            .borrow()
            .lists
            .get(&round)
            .and_then(|l| l.weight_of(candidate))
    }

    /// Head of a round's ranking (current leader, or final winner for a
    /// closed round).
    pub fn round_leader(&self, round: RoundId) -> Option<Price> {
        self.state
            .borrow()
            .lists
            .get(&round)
            .and_then(|l| l.peek_max())
    }

    pub fn ranking(&self, round: RoundId) -> Vec<(Price, Tokens)> {
        self.state
            .borrow()
            .lists
            .get(&round)
            .map(|l| l.ranking())
            .unwrap_or_default()
    }

    /// Drains the event journal.
    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut self.state.borrow_mut().events)
    }
}
