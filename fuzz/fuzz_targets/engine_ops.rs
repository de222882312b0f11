#![no_main]

// State-machine fuzz of the whole engine: byte-derived start/vote/withdraw/
// end/claim sequences over a handful of accounts, with invariants checked
// after every operation. Conservation is asserted at the end: whatever the
// vault holds must equal the sum of live ledger entries.

use std::rc::Rc;

use libfuzzer_sys::fuzz_target;
use stakerank_core::capabilities::{InMemoryBalanceLedger, InMemoryExchange, ManualClock};
use stakerank_core::{
    invariants, AccountId, EngineConfig, Hints, Price, PriceVote, RoundId, Tokens,
};

const VAULT: AccountId = AccountId([0xee; 32]);

fn acct(b: u8) -> AccountId {
    AccountId([b % 4 + 1; 32])
}

fn price(b: u8) -> Price {
    Price(u64::from(b % 8))
}

fn hint(b: u8) -> Option<Price> {
    if b % 3 == 0 {
        None
    } else {
        Some(price(b))
    }
}

fuzz_target!(|data: &[u8]| {
    let balances = Rc::new(InMemoryBalanceLedger::new());
    let exchange = Rc::new(InMemoryExchange::new(Tokens::new(1_000_000)));
    let clock = Rc::new(ManualClock::new(0));
    for b in 1..=4u8 {
        if balances.mint(acct(b), Tokens::new(200_000)).is_err() {
            return;
        }
    }
    let cfg = EngineConfig::new(VAULT).with_round_duration_secs(10);
    let engine = match PriceVote::new(cfg, balances.clone(), exchange, clock.clone()) {
        Ok(engine) => engine,
        Err(_) => return,
    };

    let mut chunks = data.chunks_exact(6);
    for chunk in &mut chunks {
        let caller = acct(chunk[1]);
        let candidate = price(chunk[2]);
        let amount = Tokens::new(u64::from(chunk[3]) * 10);
        let hints = Hints::new(hint(chunk[4]), hint(chunk[5]));
        match chunk[0] % 6 {
            0 => {
                let _ = engine.start(caller);
            }
            1 => {
                let tip = Tokens::new(u64::from(chunk[5] % 4));
                let _ = engine.vote(caller, candidate, amount, hints, tip);
            }
            2 => {
                let _ = engine.withdraw(caller, candidate, amount, hints);
            }
            3 => {
                let _ = engine.end();
            }
            4 => {
                let round = RoundId(u64::from(chunk[3] % 4));
                let _ = engine.claim(caller, acct(chunk[4]), round, candidate);
            }
            _ => {
                clock.advance(u64::from(chunk[3] % 8));
            }
        }
        if let Err(violation) = invariants::check(&engine) {
            panic!("{violation}");
        }
    }

    // Escrow conservation: the vault holds exactly the unsettled entries.
    let mut owed: u64 = 0;
    for round in 1..=engine.round_count() {
        for cand in 0..8u64 {
            for b in 1..=4u8 {
                let round = RoundId(round);
                owed += engine.staked(round, Price(cand), acct(b)).get();
                owed += engine.tip(round, Price(cand), acct(b)).get();
            }
        }
    }
    assert_eq!(balances.balance_of(VAULT).get(), owed);
});
