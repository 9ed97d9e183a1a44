//! Shared harness for end-to-end OM runs.
//!
//! Plays the role of the outer test driver: sets a run up, spawns one task
//! per general, broadcasts, then tears the run down.

use std::sync::Arc;
use std::time::Duration;

use byzantine_om::{
    Adversary, Decision, GeneralId, Outcome, ParityAdversary, Result, Run, RunConfig,
};

/// One end-to-end run description.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub loyal: Vec<bool>,
    pub reporter: GeneralId,
    pub sender: GeneralId,
    pub command: Decision,
    pub config: RunConfig,
    pub adversary: Arc<dyn Adversary>,
    /// Generals whose task starts late, and by how much.
    pub delays: Vec<(GeneralId, Duration)>,
}

impl Scenario {
    pub fn new(loyal: &[bool]) -> Self {
        Self {
            loyal: loyal.to_vec(),
            reporter: GeneralId(0),
            sender: GeneralId(1),
            command: Decision::Attack,
            config: RunConfig::default(),
            adversary: Arc::new(ParityAdversary),
            delays: Vec::new(),
        }
    }

    #[must_use]
    pub fn reporter(mut self, id: usize) -> Self {
        self.reporter = GeneralId(id);
        self
    }

    #[must_use]
    pub fn sender(mut self, id: usize) -> Self {
        self.sender = GeneralId(id);
        self
    }

    #[must_use]
    pub fn command(mut self, command: Decision) -> Self {
        self.command = command;
        self
    }

    #[must_use]
    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn adversary(mut self, adversary: Arc<dyn Adversary>) -> Self {
        self.adversary = adversary;
        self
    }

    /// Start general `id`'s task only after `delay`.
    #[must_use]
    pub fn delay(mut self, id: usize, delay: Duration) -> Self {
        self.delays.push((GeneralId(id), delay));
        self
    }

    /// Set up, spawn every general, broadcast, and tear down.
    pub async fn run(self) -> Result<Outcome> {
        let run = Run::setup_with_adversary(
            &self.loyal,
            self.reporter,
            self.config.clone(),
            Arc::clone(&self.adversary),
        )?;

        let handles: Vec<_> = (0..run.generals())
            .map(|i| {
                let run = Arc::clone(&run);
                let delay = self
                    .delays
                    .iter()
                    .find(|(id, _)| id.0 == i)
                    .map(|(_, d)| *d);
                tokio::spawn(async move {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    run.general(GeneralId(i)).await
                })
            })
            .collect();

        let outcome = run.broadcast(self.command, self.sender).await;
        run.cleanup();
        for handle in handles {
            let general = handle.await.expect("general task panicked");
            if outcome.is_ok() {
                general?;
            }
        }
        outcome
    }
}

/// Loyalty vector with traitors at `traitors`.
pub fn loyalty(generals: usize, traitors: &[usize]) -> Vec<bool> {
    (0..generals).map(|i| !traitors.contains(&i)).collect()
}
