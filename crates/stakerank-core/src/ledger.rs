//! Round ledger: the durable record of participant-owned value.
//!
//! One [`StakeEntry`] per (round, candidate, participant) holds the locked
//! stake and the attached tip. The ledger is the source of truth; each
//! round's ranked list is a derived index over the per-candidate sums and is
//! kept consistent transactionally by the engine. Entries for closed rounds
//! stay queryable forever.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{math, AccountId, Price, Result, RoundId, Tokens};

/// One participant's locked tokens and tip for one (round, candidate).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeEntry {
    pub staked: Tokens,
    pub tip: Tokens,
}

impl StakeEntry {
    pub fn is_zero(&self) -> bool {
        self.staked.is_zero() && self.tip.is_zero()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoundLedger {
    entries: BTreeMap<(RoundId, Price, AccountId), StakeEntry>,
}

impl RoundLedger {
    pub fn new() -> RoundLedger {
        RoundLedger::default()
    }

    /// Entry for a key; absent entries read as zeros.
    pub fn get(&self, round: RoundId, candidate: Price, account: AccountId) -> StakeEntry {
        self.entries
            .get(&(round, candidate, account))
            .copied()
            .unwrap_or_default()
    }

    /// Overwrites an entry. Zeroed entries are kept; a zero entry and an
    /// absent one are observationally identical, and keeping them makes
    /// claim idempotence trivial.
    pub fn set(&mut self, round: RoundId, candidate: Price, account: AccountId, entry: StakeEntry) {
        self.entries.insert((round, candidate, account), entry);
    }

    /// Zeroes an entry and returns what it held.
    pub fn take(&mut self, round: RoundId, candidate: Price, account: AccountId) -> StakeEntry {
        let taken = self.get(round, candidate, account);
        if !taken.is_zero() {
            self.set(round, candidate, account, StakeEntry::default());
        }
        taken
    }

    /// Adds `staked`/`tip` back onto an entry (rollback path; checked).
    pub fn restore(
        &mut self,
        round: RoundId,
        candidate: Price,
        account: AccountId,
        staked: Tokens,
        tip: Tokens,
    ) -> Result<()> {
        let cur = self.get(round, candidate, account);
        let entry = StakeEntry {
            staked: Tokens::new(math::add_u64(cur.staked.get(), staked.get())?),
            tip: Tokens::new(math::add_u64(cur.tip.get(), tip.get())?),
        };
        self.set(round, candidate, account, entry);
        Ok(())
    }

    /// Sum of staked amounts across all participants of (round, candidate):
    /// the weight the round's list must carry for that candidate.
    pub fn candidate_total(&self, round: RoundId, candidate: Price) -> Result<Tokens> {
        let mut total = 0u64;
        let range = (round, candidate, AccountId::MIN)..=(round, candidate, AccountId::MAX);
        for entry in self.entries.range(range).map(|(_, e)| e) {
            total = math::add_u64(total, entry.staked.get())?;
        }
        Ok(Tokens::new(total))
    }

    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (&(RoundId, Price, AccountId), &StakeEntry)> + '_ {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(b: u8) -> AccountId {
        AccountId([b; 32])
    }

    const R: RoundId = RoundId(1);
    const C: Price = Price(500);

    #[test]
    fn absent_entry_reads_zero() {
        let ledger = RoundLedger::new();
        assert!(ledger.get(R, C, acct(1)).is_zero());
        assert_eq!(ledger.candidate_total(R, C).unwrap(), Tokens::ZERO);
    }

    #[test]
    fn take_zeroes_and_returns() {
        let mut ledger = RoundLedger::new();
        ledger.set(
            R,
            C,
            acct(1),
            StakeEntry {
                staked: Tokens::new(40),
                tip: Tokens::new(3),
            },
        );
        let taken = ledger.take(R, C, acct(1));
        assert_eq!(taken.staked, Tokens::new(40));
        assert_eq!(taken.tip, Tokens::new(3));
        assert!(ledger.get(R, C, acct(1)).is_zero());
        // Taking again is a no-op returning zeros.
        assert!(ledger.take(R, C, acct(1)).is_zero());
    }

    #[test]
    fn restore_is_additive() {
        let mut ledger = RoundLedger::new();
        ledger.set(
            R,
            C,
            acct(1),
            StakeEntry {
                staked: Tokens::new(5),
                tip: Tokens::ZERO,
            },
        );
        ledger
            .restore(R, C, acct(1), Tokens::new(10), Tokens::new(2))
            .unwrap();
        let entry = ledger.get(R, C, acct(1));
        assert_eq!(entry.staked, Tokens::new(15));
        assert_eq!(entry.tip, Tokens::new(2));
    }

    #[test]
    fn candidate_total_sums_participants_only_for_that_key() {
        let mut ledger = RoundLedger::new();
        ledger.set(
            R,
            C,
            acct(1),
            StakeEntry {
                staked: Tokens::new(10),
                tip: Tokens::new(99),
            },
        );
        ledger.set(
            R,
            C,
            acct(2),
            StakeEntry {
                staked: Tokens::new(25),
                tip: Tokens::ZERO,
            },
        );
        // Different candidate and different round must not contribute.
        ledger.set(
            R,
            Price(501),
            acct(3),
            StakeEntry {
                staked: Tokens::new(1000),
                tip: Tokens::ZERO,
            },
        );
        ledger.set(
            RoundId(2),
            C,
            acct(1),
            StakeEntry {
                staked: Tokens::new(1000),
                tip: Tokens::ZERO,
            },
        );
        assert_eq!(ledger.candidate_total(R, C).unwrap(), Tokens::new(35));
    }
}
