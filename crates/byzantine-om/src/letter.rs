//! Letters and the relay chains they carry.
//!
//! A chain is the ordered path of generals a letter has traversed, starting
//! with the commander. Two invariants hold for every delivered letter:
//! - no id appears twice
//! - length is at most m + 1
//!
//! Each relay gets its own copy of the chain, so sibling branches of the
//! recursion never share a buffer.

use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::general::{Decision, GeneralId};

/// Ordered path of generals, commander first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Chain(Vec<GeneralId>);

impl Chain {
    /// A fresh chain holding only the commander.
    pub fn root(commander: GeneralId) -> Self {
        Self(vec![commander])
    }

    /// Copy of this chain with `relay` appended.
    #[must_use]
    pub fn extend(&self, relay: GeneralId) -> Self {
        let mut ids = Vec::with_capacity(self.0.len() + 1);
        ids.extend_from_slice(&self.0);
        ids.push(relay);
        Self(ids)
    }

    pub fn contains(&self, id: GeneralId) -> bool {
        self.0.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The commander that started this chain.
    pub fn commander(&self) -> Option<GeneralId> {
        self.0.first().copied()
    }

    pub fn ids(&self) -> &[GeneralId] {
        &self.0
    }

    /// Check both chain invariants against `max_len`.
    pub fn validate(&self, max_len: usize) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::ProtocolViolation("empty chain".into()));
        }
        if self.0.len() > max_len {
            return Err(Error::ProtocolViolation(format!(
                "chain {} longer than {}",
                self, max_len
            )));
        }
        for (i, id) in self.0.iter().enumerate() {
            if self.0[..i].contains(id) {
                return Err(Error::ProtocolViolation(format!(
                    "general {} revisited in chain {}",
                    id, self
                )));
            }
        }
        Ok(())
    }
}

/// Colon-joined, most recent hop first.
impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for id in self.0.iter().rev() {
            if !first {
                write!(f, ":")?;
            }
            write!(f, "{}", id)?;
            first = false;
        }
        Ok(())
    }
}

/// A message between generals: the path so far and the relayed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Letter {
    pub chain: Chain,
    pub decision: Decision,
}

impl Letter {
    pub fn new(chain: Chain, decision: Decision) -> Self {
        Self { chain, decision }
    }

    /// Recursion depth left once this letter arrives, given chains of at
    /// most `max_len` ids.
    pub fn depth_remaining(&self, max_len: usize) -> usize {
        max_len.saturating_sub(self.chain.len())
    }
}

/// One line of reporter output: a chain and the order it carried at depth 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceRecord {
    pub chain: Chain,
    pub decision: Decision,
}

impl From<&Letter> for TraceRecord {
    fn from(letter: &Letter) -> Self {
        Self {
            chain: letter.chain.clone(),
            decision: letter.decision,
        }
    }
}

/// `3:2:1:A` for chain [1, 2, 3] carrying Attack.
impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.decision)
    }
}
