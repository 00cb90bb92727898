//! Run orchestration (spec.md §4.5, §6, §8).
//!
//! Grounded in the teacher's `examples/simulate.rs` wiring (construct nodes,
//! wire them to one shared transport, run to completion) and
//! `original_source/paxos_analysis/paxos_simulation.py`'s top-level
//! `run_simulation`, which builds the node set, schedules crashes, and
//! collects the same sent/dropped/retried counters this crate reports.

use std::sync::Arc;
use std::time::Duration;

use crate::acceptor::Acceptor;
use crate::error::SimError;
use crate::learner::Learner;
use crate::message::Value;
use crate::network::{Network, NetworkConfig, NetworkCounters};
use crate::node::{Endpoint, NodeId, Role};
use crate::proposer::{Proposer, ProposerConfig};

/// A crash scheduled to fire `after` the run starts.
#[derive(Debug, Clone)]
pub struct CrashEvent {
    pub target: NodeId,
    pub after: Duration,
}

/// Top-level run configuration (spec.md §4.5). Distinct from
/// [`NetworkConfig`], which only covers fabric knobs; this also covers the
/// node counts, the value a proposer starts with, and crash scheduling.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub proposer_count: u32,
    pub acceptor_count: u32,
    pub learner_count: u32,
    pub network: NetworkConfig,
    pub phase_timeout: Duration,
    pub max_retries: u32,
    /// The value every proposer starts a round with, unless overridden per
    /// index in `proposer_values` (spec.md §8's "contending proposers"
    /// scenario needs distinct values per proposer). Every configured
    /// proposer starts idle and only contends if the driver starts it
    /// explicitly via [`Driver::start_proposer`].
    pub initial_value: Value,
    pub proposer_values: Vec<(u32, Value)>,
    pub crash_schedule: Vec<CrashEvent>,
    /// Upper bound on how long [`Driver::run`] waits for a decision before
    /// reporting `decided: None` (spec.md §8's "insufficient acceptors"
    /// scenario needs this — without it a quorum that can never form would
    /// hang the run forever).
    pub run_timeout: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            proposer_count: 1,
            acceptor_count: 3,
            learner_count: 1,
            network: NetworkConfig::default(),
            phase_timeout: Duration::from_secs(4),
            max_retries: 3,
            initial_value: Value::from("default"),
            proposer_values: Vec::new(),
            crash_schedule: Vec::new(),
            run_timeout: Duration::from_secs(30),
        }
    }
}

impl SimulationConfig {
    fn validate(&self) -> Result<(), SimError> {
        if self.proposer_count == 0 {
            return Err(SimError::NoProposers);
        }
        if self.acceptor_count == 0 {
            return Err(SimError::NoAcceptors);
        }
        if self.learner_count == 0 {
            return Err(SimError::NoLearners);
        }
        if !(0.0..=1.0).contains(&self.network.drop_rate) {
            return Err(SimError::InvalidDropRate(self.network.drop_rate));
        }
        let (min, max) = self.network.delay_range;
        if min > max {
            return Err(SimError::InvalidDelayRange { min, max });
        }
        for crash in &self.crash_schedule {
            let in_range = match crash.target.role {
                Role::Proposer => crash.target.index < self.proposer_count,
                Role::Acceptor => crash.target.index < self.acceptor_count,
                Role::Learner => crash.target.index < self.learner_count,
            };
            if !in_range {
                return Err(SimError::UnknownCrashTarget(crash.target));
            }
        }
        Ok(())
    }
}

/// Everything a run reports once it finishes (spec.md §4.5, §8).
#[derive(Debug, Clone)]
pub struct RunMetrics {
    pub network: NetworkCounters,
    pub decided: Option<Value>,
    pub rounds_by_proposer: Vec<(NodeId, u64)>,
    /// `decide_ts - start_ts` (spec.md §3, §6 "latency_s") for whichever
    /// proposer reached a decision first. Distinct from `elapsed`, which is
    /// this whole `run()` call's wall-clock and includes `wait_for_decision`'s
    /// poll slop and network teardown.
    pub latency_s: Option<f64>,
    pub elapsed: Duration,
}

/// Owns every node in a run and the shared [`Network`] connecting them.
pub struct Driver {
    network: Network,
    proposers: Vec<(Arc<Proposer>, tokio::sync::mpsc::UnboundedSender<()>)>,
    learners: Vec<Arc<Learner>>,
    crash_flags: std::collections::HashMap<NodeId, Arc<std::sync::atomic::AtomicBool>>,
    config: SimulationConfig,
}

impl Driver {
    /// Builds every node and registers it with a fresh [`Network`], but does
    /// not start any proposer yet — call [`Driver::run`] to do both.
    pub async fn new(config: SimulationConfig) -> Result<Self, SimError> {
        config.validate()?;

        let network = Network::new(config.network.clone());
        let quorum = config.acceptor_count as usize / 2 + 1;

        let mut crash_flags = std::collections::HashMap::new();

        for i in 0..config.acceptor_count {
            let id = NodeId::new(Role::Acceptor, i);
            let (handle, crashed) = Acceptor::spawn(id, network.clone());
            network.register(handle as Arc<dyn Endpoint>).await;
            crash_flags.insert(id, crashed);
        }

        let mut learners = Vec::new();
        for i in 0..config.learner_count {
            let id = NodeId::new(Role::Learner, i);
            let (handle, crashed) = Learner::spawn(id, quorum);
            network.register(handle.clone() as Arc<dyn Endpoint>).await;
            crash_flags.insert(id, crashed);
            learners.push(handle);
        }

        let mut proposers = Vec::new();
        for i in 0..config.proposer_count {
            let id = NodeId::new(Role::Proposer, i);
            let value = config
                .proposer_values
                .iter()
                .find(|(idx, _)| *idx == i)
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| config.initial_value.clone());
            let proposer_config = ProposerConfig {
                initial_value: value,
                phase_timeout: config.phase_timeout,
                max_retries: config.max_retries,
                quorum_size: quorum,
            };
            let (handle, crashed, start_tx) = Proposer::spawn(id, proposer_config, network.clone());
            network.register(handle.clone() as Arc<dyn Endpoint>).await;
            crash_flags.insert(id, crashed);
            proposers.push((handle, start_tx));
        }

        Ok(Driver {
            network,
            proposers,
            learners,
            crash_flags,
            config,
        })
    }

    /// Starts proposer `index` on round 1. spec.md's "contending proposers"
    /// scenario (§8) calls this for more than one index.
    pub fn start_proposer(&self, index: u32) {
        let id = NodeId::new(Role::Proposer, index);
        if let Some((_, start_tx)) = self
            .proposers
            .iter()
            .find(|(p, _)| p.id() == id)
        {
            let _ = start_tx.send(());
        }
    }

    fn schedule_crashes(&self) {
        for crash in self.config.crash_schedule.clone() {
            if let Some(flag) = self.crash_flags.get(&crash.target).cloned() {
                let target = crash.target;
                tokio::spawn(async move {
                    tokio::time::sleep(crash.after).await;
                    flag.store(true, std::sync::atomic::Ordering::SeqCst);
                    log::warn!("{} crashed", target);
                });
            }
        }
    }

    /// Starts proposer 0, applies the crash schedule, and waits for a
    /// learner to decide (or `run_timeout` to elapse). Returns the run's
    /// metrics either way (spec.md §8: a stalled run is a valid outcome,
    /// not an error).
    pub async fn run(self) -> RunMetrics {
        let started = tokio::time::Instant::now();
        self.schedule_crashes();
        self.start_proposer(0);

        let learners = self.learners.clone();
        let decided = wait_for_decision(&learners, self.config.run_timeout).await;

        self.network.stop().await;

        let mut rounds_by_proposer = Vec::new();
        let mut latency_s = None;
        for (proposer, _) in &self.proposers {
            let snap = proposer.snapshot().borrow().clone();
            rounds_by_proposer.push((proposer.id(), snap.round));
            if latency_s.is_none() {
                latency_s = snap.latency.map(|d| d.as_secs_f64());
            }
        }

        RunMetrics {
            network: self.network.counters(),
            decided,
            rounds_by_proposer,
            latency_s,
            elapsed: started.elapsed(),
        }
    }
}

async fn wait_for_decision(learners: &[Arc<Learner>], timeout: Duration) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        for learner in learners {
            if let Some((_, value)) = learner.snapshot().borrow().decided.clone() {
                return Some(value);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_zero_acceptors() {
        let mut config = SimulationConfig::default();
        config.acceptor_count = 0;
        let result = Driver::new(config).await;
        assert!(matches!(result, Err(SimError::NoAcceptors)));
    }

    #[tokio::test]
    async fn rejects_out_of_range_crash_target() {
        let mut config = SimulationConfig::default();
        config.crash_schedule.push(CrashEvent {
            target: NodeId::new(Role::Acceptor, 99),
            after: Duration::from_millis(1),
        });
        let result = Driver::new(config).await;
        assert!(matches!(result, Err(SimError::UnknownCrashTarget(_))));
    }

    #[tokio::test]
    async fn happy_path_decides() {
        let mut config = SimulationConfig::default();
        config.phase_timeout = Duration::from_millis(200);
        config.run_timeout = Duration::from_secs(5);
        let driver = Driver::new(config).await.unwrap();
        let metrics = driver.run().await;
        assert_eq!(metrics.decided, Some(Value::from("default")));
    }
}
