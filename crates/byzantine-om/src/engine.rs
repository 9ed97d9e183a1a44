//! The OM recursion step.
//!
//! A general that drains a letter with recursion depth left acts as
//! commander of a smaller OM instance: it relays to every general that is
//! neither itself nor already on the chain, in ascending id order. The
//! receiving general runs the same step in its own task, one level
//! shallower. At depth 0 the reporter records what arrived.

use crate::adversary::{relay_value, Adversary};
use crate::error::Result;
use crate::general::{Decision, GeneralId};
use crate::letter::{Chain, Letter};
use crate::run::Run;

/// Round 0: the commander's order to every other general.
pub fn round_zero(
    adversary: &dyn Adversary,
    generals: usize,
    sender: GeneralId,
    loyal: bool,
    command: Decision,
) -> Vec<(GeneralId, Letter)> {
    (0..generals)
        .map(GeneralId)
        .filter(|&target| target != sender)
        .map(|target| {
            let decision = relay_value(adversary, sender, loyal, target, command);
            (target, Letter::new(Chain::root(sender), decision))
        })
        .collect()
}

/// Relays `acting` sends after receiving `letter`.
///
/// Each relay carries its own copy of the chain with `acting` appended.
pub fn fan_out(
    adversary: &dyn Adversary,
    generals: usize,
    acting: GeneralId,
    loyal: bool,
    letter: &Letter,
) -> Vec<(GeneralId, Letter)> {
    let chain = letter.chain.extend(acting);
    (0..generals)
        .map(GeneralId)
        .filter(|&target| target != acting && !letter.chain.contains(target))
        .map(|target| {
            let decision = relay_value(adversary, acting, loyal, target, letter.decision);
            (target, Letter::new(chain.clone(), decision))
        })
        .collect()
}

/// Run one OM step for `letter`, just drained by `acting`.
pub(crate) fn om(run: &Run, acting: GeneralId, loyal: bool, letter: &Letter) -> Result<()> {
    letter.chain.validate(run.max_chain_len())?;

    let depth = letter.depth_remaining(run.max_chain_len());
    if depth == 0 {
        if run.is_reporter(acting) {
            run.report(letter);
        }
        return Ok(());
    }

    let relays = fan_out(run.adversary(), run.generals(), acting, loyal, letter);
    tracing::debug!(
        general = %acting,
        depth,
        chain = %letter.chain,
        relays = relays.len(),
        "relaying as sub-commander"
    );
    for (target, relay) in relays {
        run.deliver(target, relay)?;
    }
    Ok(())
}
