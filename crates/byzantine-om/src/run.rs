//! One OM run: setup, per-general entry point, broadcast, teardown.
//!
//! All shared state lives in a [`Run`] that is handed to every general's
//! task and to the dispatcher, so separate runs never interfere.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adversary::{Adversary, ParityAdversary};
use crate::bound::{letters_per_lieutenant, tolerates};
use crate::config::RunConfig;
use crate::decision::InformationTree;
use crate::engine;
use crate::error::{Error, Result};
use crate::general::{Decision, GeneralId, Registry};
use crate::letter::{Letter, TraceRecord};
use crate::mailbox::{Inbox, MailboxSet};
use crate::tracker::{CompletionTracker, Counters};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The root order, published once by `broadcast`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Order {
    sender: GeneralId,
    command: Decision,
}

/// Result of a completed broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub sender: GeneralId,
    pub command: Decision,
    pub reporter: GeneralId,
    /// Loyalty of every general, by id.
    pub loyal: Vec<bool>,
    /// The reporter's depth-0 records, in arrival order.
    pub trace: Vec<TraceRecord>,
    /// Each lieutenant's majority decision.
    pub decisions: BTreeMap<GeneralId, Decision>,
    /// Every letter each lieutenant received, in chain order.
    pub received: BTreeMap<GeneralId, Vec<Letter>>,
    /// Total letters delivered, round 0 included.
    pub delivered: usize,
}

impl Outcome {
    pub fn decision(&self, id: GeneralId) -> Option<Decision> {
        self.decisions.get(&id).copied()
    }

    /// Decisions of loyal lieutenants only.
    pub fn loyal_decisions(&self) -> BTreeMap<GeneralId, Decision> {
        self.decisions
            .iter()
            .filter(|(id, _)| self.loyal.get(id.0).copied().unwrap_or(false))
            .map(|(&id, &d)| (id, d))
            .collect()
    }

    /// True if every loyal lieutenant reached the same decision.
    pub fn loyal_agree(&self) -> bool {
        let mut values = self.loyal_decisions().into_values();
        match values.next() {
            Some(first) => values.all(|d| d == first),
            None => true,
        }
    }

    /// Reporter output, one `path:decision` line per record.
    pub fn trace_lines(&self) -> Vec<String> {
        self.trace.iter().map(ToString::to_string).collect()
    }
}

/// Aborts the run if a general unwinds instead of returning.
struct UnwindGuard<'a> {
    run: &'a Run,
    id: GeneralId,
}

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.run.abort(self.id, Error::Panicked(self.id));
        }
    }
}

/// Run-scoped context shared by the dispatcher and every general.
pub struct Run {
    config: RunConfig,
    adversary: Arc<dyn Adversary>,
    /// Recursion depth m, fixed at setup.
    depth: usize,
    /// Letters each lieutenant drains before deciding.
    letters: usize,
    registry: RwLock<Registry>,
    mailboxes: MailboxSet,
    tracker: CompletionTracker,
    order: watch::Sender<Option<Order>>,
    cancel: CancellationToken,
    failure: Mutex<Option<Error>>,
    trace: Mutex<Vec<TraceRecord>>,
    decisions: Mutex<BTreeMap<GeneralId, Decision>>,
    received: Mutex<BTreeMap<GeneralId, Vec<Letter>>>,
    delivered: AtomicUsize,
    torn_down: AtomicBool,
}

impl std::fmt::Debug for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("generals", &self.generals())
            .field("depth", &self.depth)
            .field("adversary", &self.adversary)
            .field("counters", &self.tracker.snapshot())
            .finish_non_exhaustive()
    }
}

impl Run {
    /// Set up a run with the parity traitor rule.
    ///
    /// Fails, before any general can start, when `n <= 3m`, when `m`
    /// exceeds the configured depth, when the reporter is unknown, when the
    /// letter count overflows, when the mailbox capacity is below `n - 1` or
    /// above [`MAX_CAPACITY`](crate::MAX_CAPACITY), or when allocation fails.
    pub fn setup(loyal: &[bool], reporter: GeneralId, config: RunConfig) -> Result<Arc<Self>> {
        Self::setup_with_adversary(loyal, reporter, config, Arc::new(ParityAdversary))
    }

    /// Set up a run with a custom traitor strategy.
    pub fn setup_with_adversary(
        loyal: &[bool],
        reporter: GeneralId,
        config: RunConfig,
        adversary: Arc<dyn Adversary>,
    ) -> Result<Arc<Self>> {
        let result = Self::build(loyal, reporter, config, adversary);
        match &result {
            Ok(run) => info!(
                generals = run.generals(),
                traitors = run.depth,
                reporter = %reporter,
                letters = run.letters,
                "run set up"
            ),
            Err(e) => warn!(generals = loyal.len(), error = %e, "run setup rejected"),
        }
        result
    }

    fn build(
        loyal: &[bool],
        reporter: GeneralId,
        config: RunConfig,
        adversary: Arc<dyn Adversary>,
    ) -> Result<Arc<Self>> {
        let registry = Registry::new(loyal, reporter)?;
        let generals = registry.len();
        let traitors = registry.traitors();

        if !tolerates(generals, traitors) {
            return Err(Error::TooManyTraitors { generals, traitors });
        }
        if traitors > config.max_depth {
            return Err(Error::DepthExceeded {
                traitors,
                max: config.max_depth,
            });
        }

        let letters = letters_per_lieutenant(generals, traitors)
            .ok_or(Error::TooManyLetters { generals, traitors })?;
        let capacity = config
            .capacity_for(generals, traitors)
            .ok_or(Error::TooManyLetters { generals, traitors })?;
        let required = generals.saturating_sub(1).max(1);
        if capacity < required {
            return Err(Error::CapacityTooSmall { capacity, required });
        }

        let mailboxes = MailboxSet::new(generals, capacity)?;
        let (order, _) = watch::channel(None);

        Ok(Arc::new(Self {
            config,
            adversary,
            depth: traitors,
            letters,
            registry: RwLock::new(registry),
            mailboxes,
            tracker: CompletionTracker::new(generals),
            order,
            cancel: CancellationToken::new(),
            failure: Mutex::new(None),
            trace: Mutex::new(Vec::new()),
            decisions: Mutex::new(BTreeMap::new()),
            received: Mutex::new(BTreeMap::new()),
            delivered: AtomicUsize::new(0),
            torn_down: AtomicBool::new(false),
        }))
    }

    /// Number of generals `n`.
    pub fn generals(&self) -> usize {
        self.mailboxes.len()
    }

    /// Recursion depth `m`, the traitor count at setup.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Longest chain a letter may carry: m + 1.
    pub fn max_chain_len(&self) -> usize {
        self.depth + 1
    }

    pub fn counters(&self) -> Counters {
        self.tracker.snapshot()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub(crate) fn adversary(&self) -> &dyn Adversary {
        self.adversary.as_ref()
    }

    fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_loyal(&self, id: GeneralId) -> bool {
        self.registry().is_loyal(id)
    }

    pub(crate) fn is_reporter(&self, id: GeneralId) -> bool {
        self.registry().is_reporter(id)
    }

    pub(crate) fn deliver(&self, target: GeneralId, letter: Letter) -> Result<()> {
        self.mailboxes.deliver(target, letter)?;
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Append a depth-0 letter to the reporter trace.
    pub(crate) fn report(&self, letter: &Letter) {
        let record = TraceRecord::from(letter);
        info!(record = %record, "OM(0)");
        lock(&self.trace).push(record);
    }

    /// Spawn one task per general running [`Run::general`].
    pub fn spawn_generals(self: &Arc<Self>) -> Vec<JoinHandle<Result<()>>> {
        (0..self.generals())
            .map(|i| {
                let run = Arc::clone(self);
                tokio::spawn(async move { run.general(GeneralId(i)).await })
            })
            .collect()
    }

    /// Body of general `id`'s task. Runs once per run.
    ///
    /// Waits for the root order; the commander then returns at once, every
    /// lieutenant drains its mailbox, relaying through the OM step, and
    /// finally records its majority decision.
    pub async fn general(&self, id: GeneralId) -> Result<()> {
        let inbox = self.mailboxes.take_inbox(id)?;
        let _active = self.tracker.enter();
        let _unwind = UnwindGuard { run: self, id };

        let result = self.serve(id, inbox).await;
        if let Err(e) = &result {
            self.abort(id, e.clone());
        }
        result
    }

    async fn serve(&self, id: GeneralId, mut inbox: Inbox) -> Result<()> {
        let order = self.wait_for_order().await?;
        if self.registry().is_commander(id) {
            debug!(general = %id, "commander does not take part in OM");
            return Ok(());
        }

        let loyal = self.is_loyal(id);
        let mut tree = InformationTree::new(id);

        for _ in 0..self.letters {
            let letter = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Aborted),
                letter = inbox.recv() => letter.ok_or(Error::MailboxClosed(id))?,
            };
            engine::om(self, id, loyal, &letter)?;
            tree.record(&letter)?;
        }

        let decision = tree
            .decide(
                order.sender,
                self.generals(),
                self.max_chain_len(),
                self.config.tie_break,
            )
            .ok_or_else(|| {
                Error::ProtocolViolation(format!("general {} never heard the commander", id))
            })?;

        debug!(
            general = %id,
            loyal,
            command = %order.command,
            decision = %decision,
            letters = tree.len(),
            "decided"
        );
        lock(&self.decisions).insert(id, decision);
        lock(&self.received).insert(id, tree.letters());
        Ok(())
    }

    async fn wait_for_order(&self) -> Result<Order> {
        let mut rx = self.order.subscribe();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Aborted),
            published = rx.wait_for(Option::is_some) => {
                if published.is_err() {
                    return Err(Error::Aborted);
                }
            }
        }
        let order = *rx.borrow();
        order.ok_or(Error::Aborted)
    }

    /// Record the first failure and release every blocked general.
    fn abort(&self, id: GeneralId, error: Error) {
        {
            let mut failure = lock(&self.failure);
            if failure.is_none() && error != Error::Aborted {
                warn!(general = %id, error = %error, "aborting run");
                *failure = Some(error);
            }
        }
        self.tracker.fail();
        self.cancel.cancel();
    }

    /// Issue `command` from `sender` and wait for the whole OM recursion.
    ///
    /// The sender's round-0 letter goes to every other general's mailbox
    /// (corrupted per target if the sender is a traitor). Returns once every
    /// general has started and finished.
    pub async fn broadcast(&self, command: Decision, sender: GeneralId) -> Result<Outcome> {
        if sender.0 >= self.generals() {
            return Err(Error::UnknownGeneral(sender));
        }
        if self.is_torn_down() {
            return Err(Error::MailboxClosed(sender));
        }

        // The commander flag is set before any general can see the order.
        let mut marked = Ok(());
        self.order.send_if_modified(|slot| {
            if slot.is_some() {
                marked = Err(Error::AlreadyBroadcast);
                return false;
            }
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            marked = if registry.is_empty() {
                Err(Error::MailboxClosed(sender))
            } else {
                registry.mark_commander(sender)
            };
            if marked.is_err() {
                return false;
            }
            *slot = Some(Order { sender, command });
            true
        });
        marked?;

        let (loyal, reporter, loyalty) = {
            let registry = self.registry();
            let reporter = registry.reporter().ok_or(Error::MailboxClosed(sender))?;
            (registry.is_loyal(sender), reporter, registry.loyalty())
        };
        info!(sender = %sender, command = %command, loyal, "broadcast");

        for (target, letter) in
            engine::round_zero(self.adversary(), self.generals(), sender, loyal, command)
        {
            if let Err(e) = self.deliver(target, letter) {
                self.abort(sender, e.clone());
                return Err(e);
            }
        }

        let counters = self.tracker.wait().await?;
        if let Some(e) = lock(&self.failure).take() {
            return Err(e);
        }
        if counters.failed {
            return Err(Error::Aborted);
        }

        let outcome = Outcome {
            sender,
            command,
            reporter,
            loyal: loyalty,
            trace: lock(&self.trace).clone(),
            decisions: lock(&self.decisions).clone(),
            received: lock(&self.received).clone(),
            delivered: self.delivered.load(Ordering::SeqCst),
        };
        info!(
            delivered = outcome.delivered,
            records = outcome.trace.len(),
            agree = outcome.loyal_agree(),
            "broadcast complete"
        );
        Ok(outcome)
    }

    /// Release every mailbox, clear the registry and reset the counters.
    ///
    /// Safe to call more than once; later calls return false.
    pub fn cleanup(&self) -> bool {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        let closed = self.mailboxes.close_all();
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.tracker.reset();
        lock(&self.trace).clear();
        lock(&self.decisions).clear();
        lock(&self.received).clear();
        debug!(mailboxes = closed, "run torn down");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adversary::Inverting;
    use crate::mailbox::MAX_CAPACITY;
    use std::time::Duration;

    async fn run_to_end(run: &Arc<Run>, command: Decision, sender: GeneralId) -> Outcome {
        let handles = run.spawn_generals();
        let outcome = run.broadcast(command, sender).await.unwrap();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        outcome
    }

    #[test]
    fn setup_rejects_too_many_traitors() {
        let err = Run::setup(&[true, false, false, true], GeneralId(0), RunConfig::default())
            .unwrap_err();
        assert_eq!(
            err,
            Error::TooManyTraitors {
                generals: 4,
                traitors: 2
            }
        );
    }

    #[test]
    fn setup_rejects_depth_and_capacity() {
        let loyal = [true, true, true, true, true, true, true, false, false];
        let err = Run::setup(&loyal, GeneralId(0), RunConfig::default().with_max_depth(1))
            .unwrap_err();
        assert_eq!(err, Error::DepthExceeded { traitors: 2, max: 1 });

        let err = Run::setup(
            &[true, true, true, false],
            GeneralId(0),
            RunConfig::default().with_mailbox_capacity(2),
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::CapacityTooSmall {
                capacity: 2,
                required: 3
            }
        );
    }

    #[test]
    fn setup_rejects_unknown_reporter() {
        let err = Run::setup(&[true, true], GeneralId(7), RunConfig::default()).unwrap_err();
        assert_eq!(err, Error::UnknownGeneral(GeneralId(7)));
    }

    #[tokio::test]
    async fn all_loyal_attack() {
        let run = Run::setup(&[true; 4], GeneralId(0), RunConfig::default()).unwrap();
        let outcome = run_to_end(&run, Decision::Attack, GeneralId(1)).await;

        assert_eq!(outcome.delivered, 3);
        assert_eq!(outcome.trace_lines(), vec!["1:A".to_string()]);
        assert_eq!(outcome.decisions.len(), 3);
        assert!(outcome.decisions.values().all(|&d| d == Decision::Attack));
        assert!(outcome.decision(GeneralId(1)).is_none());
        assert_eq!(run.counters().active, 0);
        assert_eq!(run.counters().visited, 4);
    }

    #[tokio::test]
    async fn traitor_lieutenant_is_outvoted() {
        let run = Run::setup(&[true, true, true, false], GeneralId(0), RunConfig::default())
            .unwrap();
        let outcome = run_to_end(&run, Decision::Attack, GeneralId(1)).await;

        assert_eq!(outcome.delivered, 9);
        assert_eq!(outcome.decision(GeneralId(0)), Some(Decision::Attack));
        assert_eq!(outcome.decision(GeneralId(2)), Some(Decision::Attack));
        assert!(outcome.loyal_agree());

        let mut lines = outcome.trace_lines();
        lines.sort();
        assert_eq!(lines, vec!["2:1:A".to_string(), "3:1:R".to_string()]);
    }

    #[tokio::test]
    async fn broadcast_only_once() {
        let run = Run::setup(&[true; 4], GeneralId(0), RunConfig::default()).unwrap();
        run_to_end(&run, Decision::Retreat, GeneralId(2)).await;
        assert_eq!(
            run.broadcast(Decision::Attack, GeneralId(2)).await.unwrap_err(),
            Error::AlreadyBroadcast
        );
    }

    #[tokio::test]
    async fn general_runs_once() {
        let run = Run::setup(&[true; 4], GeneralId(0), RunConfig::default()).unwrap();
        run_to_end(&run, Decision::Attack, GeneralId(0)).await;
        assert_eq!(
            run.general(GeneralId(2)).await.unwrap_err(),
            Error::AlreadyStarted(GeneralId(2))
        );
        assert_eq!(run.counters().visited, 4);
    }

    #[tokio::test]
    async fn broadcast_waits_for_slow_general() {
        let run = Run::setup(&[true; 4], GeneralId(0), RunConfig::default()).unwrap();
        let mut handles = Vec::new();
        for i in 0..4 {
            let run = Arc::clone(&run);
            handles.push(tokio::spawn(async move {
                if i == 3 {
                    tokio::time::sleep(Duration::from_millis(80)).await;
                }
                run.general(GeneralId(i)).await
            }));
        }

        let started = std::time::Instant::now();
        run.broadcast(Decision::Attack, GeneralId(1)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(run.counters().active, 0);
        for h in handles {
            h.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn custom_adversary_is_used() {
        let run = Run::setup_with_adversary(
            &[true, true, true, false],
            GeneralId(0),
            RunConfig::default(),
            Arc::new(Inverting),
        )
        .unwrap();
        let outcome = run_to_end(&run, Decision::Retreat, GeneralId(3)).await;
        // Inverting traitor commander tells everyone Attack.
        assert!(outcome
            .loyal_decisions()
            .values()
            .all(|&d| d == Decision::Attack));
    }

    #[derive(Debug)]
    struct Faulty;

    impl Adversary for Faulty {
        fn corrupt(&self, acting: GeneralId, _: GeneralId, _: Decision) -> Decision {
            panic!("traitor {acting} crashed");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_general_aborts_run() {
        let run = Run::setup_with_adversary(
            &[true, true, true, false],
            GeneralId(0),
            RunConfig::default(),
            Arc::new(Faulty),
        )
        .unwrap();
        let handles = run.spawn_generals();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run.broadcast(Decision::Attack, GeneralId(1)),
        )
        .await
        .expect("broadcast blocked after a general panicked");
        assert_eq!(result.unwrap_err(), Error::Panicked(GeneralId(3)));

        let mut panicked = 0;
        for h in handles {
            if h.await.is_err() {
                panicked += 1;
            }
        }
        assert_eq!(panicked, 1);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let run = Run::setup(&[true; 4], GeneralId(0), RunConfig::default()).unwrap();
        run_to_end(&run, Decision::Attack, GeneralId(1)).await;
        assert!(run.cleanup());
        assert!(!run.cleanup());
        assert!(run.is_torn_down());
        let counters = run.counters();
        assert_eq!((counters.active, counters.visited), (0, 0));
        assert_eq!(
            run.general(GeneralId(0)).await.unwrap_err(),
            Error::MailboxClosed(GeneralId(0))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cleanup_releases_pending_broadcast() {
        let run = Run::setup(&[true; 4], GeneralId(0), RunConfig::default()).unwrap();
        // General 3 never starts, so the barrier cannot settle on its own.
        let handles: Vec<_> = (0..3)
            .map(|i| {
                let run = Arc::clone(&run);
                tokio::spawn(async move { run.general(GeneralId(i)).await })
            })
            .collect();
        let pending = {
            let run = Arc::clone(&run);
            tokio::spawn(async move { run.broadcast(Decision::Attack, GeneralId(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        assert!(run.cleanup());
        let result = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .expect("broadcast still blocked after cleanup")
            .unwrap();
        assert_eq!(result.unwrap_err(), Error::Aborted);
        for h in handles {
            h.await.unwrap().ok();
        }
    }

    #[test]
    fn setup_rejects_uncountable_runs() {
        let loyal: Vec<bool> = (0..70).map(|i| i >= 23).collect();
        let err = Run::setup(&loyal, GeneralId(0), RunConfig::default().with_max_depth(23))
            .unwrap_err();
        assert_eq!(
            err,
            Error::TooManyLetters {
                generals: 70,
                traitors: 23
            }
        );

        let err = Run::setup(
            &[true; 4],
            GeneralId(0),
            RunConfig::default().with_mailbox_capacity(usize::MAX),
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::CapacityTooLarge {
                capacity: usize::MAX,
                max: MAX_CAPACITY
            }
        );
    }

    #[tokio::test]
    async fn commander_flag_follows_broadcast() {
        let run = Run::setup(&[true; 4], GeneralId(3), RunConfig::default()).unwrap();
        let outcome = run_to_end(&run, Decision::Retreat, GeneralId(2)).await;
        assert!(run.registry().is_commander(GeneralId(2)));
        assert!(!run.registry().is_commander(GeneralId(3)));
        assert_eq!(outcome.reporter, GeneralId(3));
        assert_eq!(outcome.loyal, vec![true; 4]);
    }

    #[tokio::test]
    async fn cleanup_releases_waiting_generals() {
        let run = Run::setup(&[true; 4], GeneralId(0), RunConfig::default()).unwrap();
        let handles = run.spawn_generals();
        tokio::task::yield_now().await;
        run.cleanup();
        for h in handles {
            let err = h.await.unwrap().unwrap_err();
            assert!(matches!(err, Error::Aborted | Error::MailboxClosed(_)), "{err}");
        }
    }
}
