//! Capability interfaces the engine calls into, with in-memory
//! implementations for embedding and tests.
//!
//! The execution model is single-threaded with synchronous reentrancy: a
//! capability call may re-enter the engine before returning. The traits are
//! therefore deliberately not `Send + Sync`, and implementations are free to
//! use `RefCell`/`Cell` interior mutability behind `&self` receivers.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use crate::{math, AccountId, Price, Result, StakeRankError, Tokens};

/// The fungible balance ledger the engine escrows through.
pub trait BalanceLedger {
    fn balance_of(&self, account: AccountId) -> Tokens;

    /// Moves `amount` from `from` to `to`; fails on insufficient balance.
    /// An outbound transfer may deliver control to externally controlled
    /// code, which may re-enter the engine — the sole concurrency hazard.
    fn transfer(&self, from: AccountId, to: AccountId, amount: Tokens) -> Result<()>;
}

/// The attached exchange: total supply for threshold computation, plus the
/// mutable reference-price cell overwritten at round end.
pub trait Exchange {
    fn total_supply(&self) -> Tokens;

    fn publish_reference_price(&self, price: Price, weight: Tokens);
}

/// Monotonic time source, in seconds.
pub trait Clock {
    fn now(&self) -> u64;
}

/// In-memory balance ledger.
#[derive(Debug, Default)]
pub struct InMemoryBalanceLedger {
    balances: RefCell<BTreeMap<AccountId, u64>>,
}

impl InMemoryBalanceLedger {
    pub fn new() -> InMemoryBalanceLedger {
        InMemoryBalanceLedger::default()
    }

    /// Credits `amount` out of thin air (setup/boundary IO).
    pub fn mint(&self, account: AccountId, amount: Tokens) -> Result<()> {
        let mut balances = self.balances.borrow_mut();
        let cur = balances.get(&account).copied().unwrap_or(0);
        balances.insert(account, math::add_u64(cur, amount.get())?);
        Ok(())
    }
}

impl BalanceLedger for InMemoryBalanceLedger {
    fn balance_of(&self, account: AccountId) -> Tokens {
        Tokens::new(self.balances.borrow().get(&account).copied().unwrap_or(0))
    }

    fn transfer(&self, from: AccountId, to: AccountId, amount: Tokens) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let mut balances = self.balances.borrow_mut();
        let from_balance = balances.get(&from).copied().unwrap_or(0);
        if from_balance < amount.get() {
            return Err(StakeRankError::InsufficientBalance {
                balance: from_balance,
                required: amount.get(),
            });
        }
        let to_balance = balances.get(&to).copied().unwrap_or(0);
        let new_to = math::add_u64(to_balance, amount.get())?;
        balances.insert(from, from_balance - amount.get());
        balances.insert(to, new_to);
        Ok(())
    }
}

/// In-memory exchange with a fixed supply and an observable price cell.
#[derive(Debug)]
pub struct InMemoryExchange {
    supply: Cell<u64>,
    reference_price: Cell<Option<(Price, u64)>>,
}

impl InMemoryExchange {
    pub fn new(supply: Tokens) -> InMemoryExchange {
        InMemoryExchange {
            supply: Cell::new(supply.get()),
            reference_price: Cell::new(None),
        }
    }

    pub fn reference_price(&self) -> Option<(Price, Tokens)> {
        self.reference_price
            .get()
            .map(|(p, w)| (p, Tokens::new(w)))
    }
}

impl Exchange for InMemoryExchange {
    fn total_supply(&self) -> Tokens {
        Tokens::new(self.supply.get())
    }

    fn publish_reference_price(&self, price: Price, weight: Tokens) {
        self.reference_price.set(Some((price, weight.get())));
    }
}

/// Settable clock for deterministic window tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new(start: u64) -> ManualClock {
        ManualClock {
            now: Cell::new(start),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.set(now);
    }

    pub fn advance(&self, secs: u64) {
        self.now.set(self.now.get().saturating_add(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(b: u8) -> AccountId {
        AccountId([b; 32])
    }

    #[test]
    fn mint_and_transfer() {
        let ledger = InMemoryBalanceLedger::new();
        ledger.mint(acct(1), Tokens::new(100)).unwrap();
        ledger.transfer(acct(1), acct(2), Tokens::new(30)).unwrap();
        assert_eq!(ledger.balance_of(acct(1)), Tokens::new(70));
        assert_eq!(ledger.balance_of(acct(2)), Tokens::new(30));
    }

    #[test]
    fn transfer_fails_on_insufficient_balance() {
        let ledger = InMemoryBalanceLedger::new();
        ledger.mint(acct(1), Tokens::new(10)).unwrap();
        let err = ledger.transfer(acct(1), acct(2), Tokens::new(11));
        assert!(matches!(
            err,
            Err(StakeRankError::InsufficientBalance {
                balance: 10,
                required: 11
            })
        ));
        // Nothing moved.
        assert_eq!(ledger.balance_of(acct(1)), Tokens::new(10));
        assert_eq!(ledger.balance_of(acct(2)), Tokens::ZERO);
    }

    #[test]
    fn zero_transfer_is_noop() {
        let ledger = InMemoryBalanceLedger::new();
        ledger.transfer(acct(1), acct(2), Tokens::ZERO).unwrap();
    }

    #[test]
    fn exchange_price_cell() {
        let exchange = InMemoryExchange::new(Tokens::new(1_000_000));
        assert_eq!(exchange.total_supply(), Tokens::new(1_000_000));
        assert_eq!(exchange.reference_price(), None);
        exchange.publish_reference_price(Price(42), Tokens::new(7));
        assert_eq!(
            exchange.reference_price(),
            Some((Price(42), Tokens::new(7)))
        );
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now(), 100);
        clock.advance(50);
        assert_eq!(clock.now(), 150);
        clock.set(10);
        assert_eq!(clock.now(), 10);
    }
}
