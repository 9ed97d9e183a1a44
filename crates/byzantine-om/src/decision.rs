//! Majority combination of relayed orders.
//!
//! Every lieutenant keeps each letter it receives keyed by chain. Once its
//! mailbox is drained it folds the tree bottom-up:
//!
//! ```text
//! resolve(c) = value(c)                                   if |c| = m + 1
//! resolve(c) = majority(value(c), resolve(c ++ [j]) ...)  for j ∉ c, j ≠ self
//! ```
//!
//! and decides `resolve([commander])`. This is OM(m) unrolled: the value
//! `j` relays at depth k stands in for `j` acting as commander of OM(k).

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::general::{Decision, GeneralId};
use crate::letter::{Chain, Letter};

/// Strict majority of `values`, `tie_break` when tied or empty.
pub fn majority<I>(values: I, tie_break: Decision) -> Decision
where
    I: IntoIterator<Item = Decision>,
{
    let (attack, retreat) = values.into_iter().fold((0usize, 0usize), |(a, r), v| match v {
        Decision::Attack => (a + 1, r),
        Decision::Retreat => (a, r + 1),
    });
    if attack > retreat {
        Decision::Attack
    } else if retreat > attack {
        Decision::Retreat
    } else {
        tie_break
    }
}

/// The letters one lieutenant received, keyed by chain.
#[derive(Debug, Clone)]
pub struct InformationTree {
    owner: GeneralId,
    values: BTreeMap<Chain, Decision>,
}

impl InformationTree {
    pub fn new(owner: GeneralId) -> Self {
        Self {
            owner,
            values: BTreeMap::new(),
        }
    }

    /// Store a received letter. The same chain twice is a protocol violation.
    pub fn record(&mut self, letter: &Letter) -> Result<()> {
        if letter.chain.contains(self.owner) {
            return Err(Error::ProtocolViolation(format!(
                "general {} received its own relay {}",
                self.owner, letter.chain
            )));
        }
        if self.values.insert(letter.chain.clone(), letter.decision).is_some() {
            return Err(Error::ProtocolViolation(format!(
                "general {} received chain {} twice",
                self.owner, letter.chain
            )));
        }
        Ok(())
    }

    pub fn get(&self, chain: &Chain) -> Option<Decision> {
        self.values.get(chain).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Received letters in chain order.
    pub fn letters(&self) -> Vec<Letter> {
        self.values
            .iter()
            .map(|(chain, &decision)| Letter::new(chain.clone(), decision))
            .collect()
    }

    /// This lieutenant's decision for the order `commander` issued.
    ///
    /// `None` if the commander's own letter never arrived.
    pub fn decide(
        &self,
        commander: GeneralId,
        generals: usize,
        max_len: usize,
        tie_break: Decision,
    ) -> Option<Decision> {
        self.resolve(&Chain::root(commander), generals, max_len, tie_break)
    }

    fn resolve(
        &self,
        chain: &Chain,
        generals: usize,
        max_len: usize,
        tie_break: Decision,
    ) -> Option<Decision> {
        let own = self.get(chain)?;
        if chain.len() >= max_len {
            return Some(own);
        }

        let relayed = (0..generals)
            .map(GeneralId)
            .filter(|&j| j != self.owner && !chain.contains(j))
            .filter_map(|j| self.resolve(&chain.extend(j), generals, max_len, tie_break));

        Some(majority(std::iter::once(own).chain(relayed), tie_break))
    }
}
