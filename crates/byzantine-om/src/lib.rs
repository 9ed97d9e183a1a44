//! Byzantine Generals via Oral Messages
//!
//! A commander issues Attack or Retreat to `n - 1` lieutenants, some of whom
//! are traitors. Lamport's OM(m) algorithm lets every loyal lieutenant reach
//! the same decision as long as **n > 3m**.
//!
//! # Execution Model
//!
//! Every general runs in its own tokio task with a bounded mailbox:
//!
//! 1. [`Run::setup`] validates the loyalty vector and allocates mailboxes
//! 2. [`Run::general`] is each general's task body
//! 3. [`Run::broadcast`] sends round 0 and waits for the whole recursion
//! 4. [`Run::cleanup`] tears everything down
//!
//! A lieutenant that drains a letter with depth left becomes a
//! sub-commander and relays to everyone not yet on the letter's chain.
//! Traitors corrupt every relay through an [`Adversary`].
//!
//! # Example
//!
//! ```no_run
//! use byzantine_om::{Decision, GeneralId, Run, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> byzantine_om::Result<()> {
//!     let run = Run::setup(&[true, true, true, false], GeneralId(0), RunConfig::default())?;
//!     let handles = run.spawn_generals();
//!     let outcome = run.broadcast(Decision::Attack, GeneralId(1)).await?;
//!     for line in outcome.trace_lines() {
//!         println!("{line}");
//!     }
//!     for handle in handles {
//!         let _ = handle.await;
//!     }
//!     run.cleanup();
//!     Ok(())
//! }
//! ```

mod adversary;
mod bound;
mod config;
mod decision;
mod engine;
mod error;
mod general;
mod letter;
mod mailbox;
mod run;
mod tracker;

pub use adversary::{relay_value, Adversary, Constant, Inverting, ParityAdversary};
pub use bound::{letters_per_lieutenant, max_traitors, tolerates, DEFAULT_MAX_DEPTH};
pub use config::RunConfig;
pub use decision::{majority, InformationTree};
pub use engine::{fan_out, round_zero};
pub use error::{Error, Result};
pub use general::{Decision, General, GeneralId, Registry};
pub use letter::{Chain, Letter, TraceRecord};
pub use mailbox::{Inbox, Mailbox, MailboxSet, MAX_CAPACITY};
pub use run::{Outcome, Run};
pub use tracker::{ActiveGuard, CompletionTracker, Counters};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_generals_tolerate_one_traitor() {
        assert_eq!(max_traitors(4), 1);
        let config = RunConfig::default();
        assert!(Run::setup(&[true, true, true, false], GeneralId(0), config.clone()).is_ok());
        assert!(Run::setup(&[true, false, false, true], GeneralId(0), config).is_err());
    }

    #[test]
    fn outcome_serializes() {
        let outcome = Outcome {
            sender: GeneralId(1),
            command: Decision::Attack,
            reporter: GeneralId(0),
            loyal: vec![true, true],
            trace: vec![TraceRecord {
                chain: Chain::root(GeneralId(1)),
                decision: Decision::Attack,
            }],
            decisions: [(GeneralId(0), Decision::Attack)].into_iter().collect(),
            received: Default::default(),
            delivered: 1,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["command"], "Attack");
        assert_eq!(json["reporter"], 0);
        assert_eq!(json["decisions"]["0"], "Attack");
        assert_eq!(json["trace"][0]["chain"], serde_json::json!([1]));
    }
}
