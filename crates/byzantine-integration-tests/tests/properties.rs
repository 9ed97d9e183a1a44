//! Property tests over random loyalty vectors.

use std::collections::BTreeSet;

use byzantine_integration_tests::Scenario;
use byzantine_om::{max_traitors, tolerates, Decision, GeneralId, Outcome, Run, RunConfig};
use proptest::prelude::*;

fn block_on(scenario: Scenario) -> Outcome {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
        .block_on(scenario.run())
        .unwrap()
}

/// (loyalty, sender, reporter, command) with n in 4..=7 and n > 3m.
fn tolerable_run() -> impl Strategy<Value = (Vec<bool>, usize, usize, Decision)> {
    (4usize..=7)
        .prop_flat_map(|n| {
            let ids: Vec<usize> = (0..n).collect();
            let traitors = proptest::sample::subsequence(ids, 0..=max_traitors(n));
            (Just(n), traitors, 0..n, 0..n, any::<bool>())
        })
        .prop_map(|(n, traitors, sender, reporter, attack)| {
            let loyal = (0..n).map(|i| !traitors.contains(&i)).collect();
            let command = if attack { Decision::Attack } else { Decision::Retreat };
            (loyal, sender, reporter, command)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn setup_follows_traitor_bound(loyal in proptest::collection::vec(any::<bool>(), 1..10)) {
        let traitors = loyal.iter().filter(|l| !**l).count();
        let config = RunConfig::default().with_max_depth(10);
        let result = Run::setup(&loyal, GeneralId(0), config);
        prop_assert_eq!(result.is_ok(), tolerates(loyal.len(), traitors));
    }

    #[test]
    fn chains_are_simple_and_bounded((loyal, sender, reporter, command) in tolerable_run()) {
        let m = loyal.iter().filter(|l| !**l).count();
        let outcome = block_on(
            Scenario::new(&loyal).sender(sender).reporter(reporter).command(command),
        );

        for (id, letters) in &outcome.received {
            for letter in letters {
                let ids: BTreeSet<_> = letter.chain.ids().iter().copied().collect();
                prop_assert_eq!(ids.len(), letter.chain.len());
                prop_assert!(letter.chain.len() <= m + 1);
                prop_assert!(!letter.chain.contains(*id));
                prop_assert_eq!(letter.chain.commander(), Some(GeneralId(sender)));
            }
        }
        for record in &outcome.trace {
            prop_assert_eq!(record.chain.len(), m + 1);
        }
    }

    #[test]
    fn loyal_lieutenants_agree((loyal, sender, reporter, command) in tolerable_run()) {
        let outcome = block_on(
            Scenario::new(&loyal).sender(sender).reporter(reporter).command(command),
        );

        prop_assert!(outcome.loyal_agree());
        if loyal[sender] {
            for decision in outcome.loyal_decisions().values() {
                prop_assert_eq!(*decision, command);
            }
        }
    }
}
