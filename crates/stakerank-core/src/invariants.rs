//! Structural invariant checks for tests and fuzz targets.
//!
//! Production paths maintain these properties by construction; the checkers
//! here re-derive them from raw state so a regression shows up as a named
//! violation instead of a subtly wrong ranking.

use std::collections::BTreeMap;
use std::fmt;

use crate::ranked::RankedList;
use crate::{PriceVote, Tokens};

/// Stable identifiers for the properties we check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvariantId {
    /// Weights are non-increasing from head to tail.
    ListSorted,
    /// prev/next pointers, head, and tail are mutually consistent.
    ListLinks,
    /// Every node is reachable exactly once and carries positive weight.
    ListShape,
    /// In the active round, each node's weight equals the ledger sum of
    /// stakes behind that candidate, and vice versa.
    LedgerAgreement,
}

#[derive(Debug)]
pub struct InvariantViolation {
    pub id: InvariantId,
    pub details: String,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invariant {:?} violated: {}", self.id, self.details)
    }
}

impl std::error::Error for InvariantViolation {}

fn violation(id: InvariantId, details: String) -> InvariantViolation {
    InvariantViolation { id, details }
}

/// Walks a ranked list front to back and checks ordering, link symmetry,
/// and shape against the node table.
pub fn check_list(list: &RankedList) -> std::result::Result<(), InvariantViolation> {
    if list.nodes.is_empty() {
        if list.head.is_some() || list.tail.is_some() {
            return Err(violation(
                InvariantId::ListLinks,
                "empty table with non-empty head/tail".into(),
            ));
        }
        return Ok(());
    }

    let mut visited = 0usize;
    let mut prev_key = None;
    let mut prev_weight = u64::MAX;
    let mut cursor = list.head;
    while let Some(key) = cursor {
        let node = list.nodes.get(&key).ok_or_else(|| {
            violation(
                InvariantId::ListLinks,
                format!("chain reaches {key:?} which is not in the table"),
            )
        })?;
        visited += 1;
        if visited > list.nodes.len() {
            return Err(violation(
                InvariantId::ListLinks,
                "chain is longer than the table (cycle)".into(),
            ));
        }
        if node.weight.is_zero() {
            return Err(violation(
                InvariantId::ListShape,
                format!("{key:?} has zero weight"),
            ));
        }
        if node.prev != prev_key {
            return Err(violation(
                InvariantId::ListLinks,
                format!("{key:?} prev pointer disagrees with the chain"),
            ));
        }
        if node.weight.get() > prev_weight {
            return Err(violation(
                InvariantId::ListSorted,
                format!("{key:?} outweighs its predecessor"),
            ));
        }
        prev_weight = node.weight.get();
        prev_key = Some(key);
        cursor = node.next;
    }
    if visited != list.nodes.len() {
        return Err(violation(
            InvariantId::ListShape,
            format!("chain visits {visited} of {} nodes", list.nodes.len()),
        ));
    }
    if list.tail != prev_key {
        return Err(violation(
            InvariantId::ListLinks,
            "tail does not point at the last chained node".into(),
        ));
    }
    Ok(())
}

/// Checks every round's list, plus ledger agreement for the active round.
///
/// Agreement is only meaningful while a round is open: a closed round's list
/// is frozen at its final shape while claims keep draining ledger entries.
pub fn check(engine: &PriceVote) -> std::result::Result<(), InvariantViolation> {
    let state = engine.state_ref();
    for list in state.lists.values() {
        check_list(list)?;
    }

    let Some(active) = state.active else {
        return Ok(());
    };
    let mut totals: BTreeMap<_, u64> = BTreeMap::new();
    for ((round, candidate, _), entry) in state.stakes.iter() {
        if *round == active.id && !entry.staked.is_zero() {
            let slot = totals.entry(*candidate).or_insert(0);
            *slot = slot.checked_add(entry.staked.get()).ok_or_else(|| {
                violation(
                    InvariantId::LedgerAgreement,
                    format!("ledger total for {candidate:?} overflows"),
                )
            })?;
        }
    }
    let empty = RankedList::new();
    let list = state.lists.get(&active.id).unwrap_or(&empty);
    for (candidate, total) in &totals {
        match list.weight_of(*candidate) {
            Some(weight) if weight == Tokens::new(*total) => {}
            Some(weight) => {
                return Err(violation(
                    InvariantId::LedgerAgreement,
                    format!(
                        "{candidate:?} weight {} != ledger total {total}",
                        weight.get()
                    ),
                ))
            }
            None => {
                return Err(violation(
                    InvariantId::LedgerAgreement,
                    format!("{candidate:?} has ledger stake {total} but no node"),
                ))
            }
        }
    }
    for (candidate, _) in list.ranking() {
        if !totals.contains_key(&candidate) {
            return Err(violation(
                InvariantId::LedgerAgreement,
                format!("{candidate:?} has a node but no ledger stake"),
            ));
        }
    }
    Ok(())
}
