//! What a traitor says.
//!
//! A disloyal general consults its [`Adversary`] on every relay hop, not
//! only at the root. Loyal generals always forward exactly what they
//! received.

use std::fmt;

use crate::general::{Decision, GeneralId};

/// Corruption strategy applied by disloyal generals.
///
/// Implementations must be deterministic for a given input so runs are
/// reproducible.
pub trait Adversary: Send + Sync + fmt::Debug {
    /// The order a traitor `acting` sends to `target` in place of `honest`.
    fn corrupt(&self, acting: GeneralId, target: GeneralId, honest: Decision) -> Decision;
}

/// Even targets hear Retreat, odd targets hear Attack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParityAdversary;

impl Adversary for ParityAdversary {
    fn corrupt(&self, _acting: GeneralId, target: GeneralId, _honest: Decision) -> Decision {
        if target.is_even() {
            Decision::Retreat
        } else {
            Decision::Attack
        }
    }
}

/// Always sends the opposite of the honest order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inverting;

impl Adversary for Inverting {
    fn corrupt(&self, _acting: GeneralId, _target: GeneralId, honest: Decision) -> Decision {
        honest.flip()
    }
}

/// Always sends the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constant(pub Decision);

impl Adversary for Constant {
    fn corrupt(&self, _acting: GeneralId, _target: GeneralId, _honest: Decision) -> Decision {
        self.0
    }
}

/// The order `acting` forwards to `target`.
pub fn relay_value(
    adversary: &dyn Adversary,
    acting: GeneralId,
    loyal: bool,
    target: GeneralId,
    received: Decision,
) -> Decision {
    if loyal {
        received
    } else {
        adversary.corrupt(acting, target, received)
    }
}
