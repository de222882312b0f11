#![no_main]

// Drives a ranked list with byte-derived insert/update/remove operations,
// including deliberately bogus hints, and re-checks the structural
// invariants after every step.

use libfuzzer_sys::fuzz_target;
use stakerank_core::invariants;
use stakerank_core::{Hints, Price, RankedList, Tokens};

fn price(b: u8) -> Price {
    // Small key space so operations collide often.
    Price(u64::from(b % 16) + 1)
}

fn hint(b: u8) -> Option<Price> {
    if b % 4 == 0 {
        None
    } else {
        Some(price(b))
    }
}

fuzz_target!(|data: &[u8]| {
    let mut list = RankedList::new();
    let mut chunks = data.chunks_exact(5);
    for chunk in &mut chunks {
        let key = price(chunk[1]);
        let weight = Tokens::new(u64::from(chunk[2]));
        let hints = Hints::new(hint(chunk[3]), hint(chunk[4]));
        match chunk[0] % 3 {
            0 => {
                let _ = list.insert(key, weight, hints);
            }
            1 => {
                let _ = list.update(key, weight, hints);
            }
            _ => {
                let _ = list.remove(key);
            }
        }
        if let Err(violation) = invariants::check_list(&list) {
            panic!("{violation}");
        }
    }

    // Final ranking must be sorted and cover every live node.
    let ranking = list.ranking();
    assert_eq!(ranking.len(), list.len());
    for pair in ranking.windows(2) {
        assert!(pair[0].1 >= pair[1].1);
    }
});
