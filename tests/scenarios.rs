//! End-to-end scenarios, one per spec.md §8 "Concrete scenarios" case.
//!
//! Timeouts here are far shorter than the crate's production defaults
//! (`phase_timeout` defaults to 4s, `run_timeout` to 30s) so the suite stays
//! fast; the scenarios themselves are unchanged.

use std::time::Duration;

use paxos_sim::{CrashEvent, Driver, NodeId, Role, SimulationConfig, Value};

fn base_config() -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.phase_timeout = Duration::from_millis(150);
    config.run_timeout = Duration::from_secs(3);
    config
}

#[tokio::test]
async fn happy_path() {
    let mut config = base_config();
    config.proposer_count = 1;
    config.acceptor_count = 3;
    config.learner_count = 1;
    config.initial_value = Value::from("v");

    let driver = Driver::new(config).await.unwrap();
    let metrics = driver.run().await;

    assert_eq!(metrics.decided, Some(Value::from("v")));
    assert_eq!(metrics.network.dropped, 0);
    assert_eq!(metrics.rounds_by_proposer[0].1, 1);
}

#[tokio::test]
async fn drop_half_the_prepares_still_decides() {
    let mut config = base_config();
    config.acceptor_count = 3;
    config.initial_value = Value::from("v");
    config.network.drop_rate = 0.5;
    config.network.max_retries = 5;
    config.run_timeout = Duration::from_secs(5);

    let driver = Driver::new(config).await.unwrap();
    let metrics = driver.run().await;

    assert_eq!(metrics.decided, Some(Value::from("v")));
}

#[tokio::test]
async fn leader_crash_handoff_to_second_proposer() {
    let mut config = base_config();
    config.proposer_count = 2;
    config.acceptor_count = 3;
    config.proposer_values = vec![(0, Value::from("A")), (1, Value::from("B"))];
    config.crash_schedule.push(CrashEvent {
        target: NodeId::new(Role::Proposer, 0),
        after: Duration::from_millis(10),
    });
    config.run_timeout = Duration::from_secs(3);

    let driver = Driver::new(config).await.unwrap();
    // P1 proposes "B" shortly after P0 is scheduled to crash.
    driver.start_proposer(1);
    let metrics = driver.run().await;

    match &metrics.decided {
        Some(v) => assert!(v == &Value::from("A") || v == &Value::from("B")),
        None => panic!("expected a decision"),
    }
}

#[tokio::test]
async fn two_of_five_acceptors_crash_still_decides() {
    let mut config = base_config();
    config.acceptor_count = 5;
    config.initial_value = Value::from("v");
    config.crash_schedule.push(CrashEvent {
        target: NodeId::new(Role::Acceptor, 0),
        after: Duration::from_millis(50),
    });
    config.crash_schedule.push(CrashEvent {
        target: NodeId::new(Role::Acceptor, 1),
        after: Duration::from_millis(50),
    });

    let driver = Driver::new(config).await.unwrap();
    let metrics = driver.run().await;

    assert_eq!(metrics.decided, Some(Value::from("v")));
}

#[tokio::test]
async fn insufficient_acceptors_times_out() {
    let mut config = base_config();
    config.acceptor_count = 3;
    config.max_retries = 2;
    config.phase_timeout = Duration::from_millis(80);
    config.run_timeout = Duration::from_millis(600);
    config.crash_schedule.push(CrashEvent {
        target: NodeId::new(Role::Acceptor, 0),
        after: Duration::ZERO,
    });
    config.crash_schedule.push(CrashEvent {
        target: NodeId::new(Role::Acceptor, 1),
        after: Duration::ZERO,
    });
    let max_retries = config.max_retries as u64;

    let driver = Driver::new(config).await.unwrap();
    let metrics = driver.run().await;

    assert_eq!(metrics.decided, None);
    // spec.md §8 scenario 5: gives up after exactly `max_phase_retries` rounds.
    assert_eq!(metrics.rounds_by_proposer[0].1, max_retries);
}

#[tokio::test]
async fn contending_proposers_decide_one_value() {
    let mut config = base_config();
    config.proposer_count = 2;
    config.acceptor_count = 3;
    config.proposer_values = vec![(0, Value::from("X")), (1, Value::from("Y"))];
    config.run_timeout = Duration::from_secs(3);

    let driver = Driver::new(config).await.unwrap();
    driver.start_proposer(1);
    let metrics = driver.run().await;

    match &metrics.decided {
        Some(v) => assert!(v == &Value::from("X") || v == &Value::from("Y")),
        None => panic!("expected a decision despite contention"),
    }
}
