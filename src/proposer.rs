//! Proposer role (spec.md §4.3) and its retry/timeout state machine
//! (spec.md §4.4, §6).
//!
//! The phase-timeout-as-self-message pattern and the generation counter that
//! makes a stale timer firing a no-op are this crate's realization of
//! SPEC_FULL.md §5; the retry/give-up semantics themselves are read off
//! `original_source/paxos_analysis/paxos_simulation.py`'s
//! `_check_promise_timeout`/`_check_accept_timeout`, since spec.md leaves the
//! exact resend/give-up boundary to "a bounded number of attempts".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::message::{Envelope, Message, Value};
use crate::network::Network;
use crate::node::{Endpoint, NodeId, Role};
use crate::proposal::ProposalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not currently running a round.
    Idle,
    /// Prepare sent, waiting on a quorum of promises.
    Preparing,
    /// Accept sent, waiting on a quorum of accepted notices.
    Accepting,
    /// A quorum accepted; the round succeeded.
    Decided,
    /// Exhausted `max_retries` without reaching a decision.
    GaveUp,
}

/// A read-only view of a proposer's progress, exposed via `watch` so a
/// driver can observe it without reaching into the actor's owned state
/// (SPEC_FULL.md §5).
#[derive(Debug, Clone)]
pub struct ProposerSnapshot {
    pub phase: Phase,
    pub round: u64,
    pub prepare_retries: u32,
    pub accept_retries: u32,
    pub decided_value: Option<Value>,
    /// `decide_ts - start_ts` (spec.md §3, §4.3), set once a round reaches
    /// accept quorum.
    pub latency: Option<Duration>,
}

impl Default for ProposerSnapshot {
    fn default() -> Self {
        ProposerSnapshot {
            phase: Phase::Idle,
            round: 0,
            prepare_retries: 0,
            accept_retries: 0,
            decided_value: None,
            latency: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProposerConfig {
    pub initial_value: Value,
    pub phase_timeout: Duration,
    pub max_retries: u32,
    pub quorum_size: usize,
}

struct ProposerState {
    id: NodeId,
    config: ProposerConfig,
    phase: Phase,
    round: u64,
    /// Bumped on every `prepare()`/accept resend; a `PhaseTimeout` event
    /// carrying a stale generation is ignored.
    generation: u64,
    prepare_retries: u32,
    accept_retries: u32,
    promises_received: Vec<(NodeId, Option<(ProposalId, Value)>)>,
    accepts_received: Vec<NodeId>,
    /// The value this round is trying to get chosen: the proposer's own
    /// initial value, unless a quorum of promises carried a higher-numbered
    /// prior acceptance (spec.md §4.3, the defining Paxos safety rule).
    value_in_flight: Value,
    /// spec.md §3 `start_ts?`: stamped on the very first `prepare()`, not
    /// reset by later retries, so latency covers the whole decree.
    start_ts: Option<tokio::time::Instant>,
    /// spec.md §3 `decide_ts?`: stamped once, the first time accept quorum
    /// is reached.
    decide_ts: Option<tokio::time::Instant>,
}

/// Events a proposer's task drains from its inbox — network messages and its
/// own self-posted timeouts, serialized through the same channel
/// (SPEC_FULL.md §5).
enum Event {
    Message(Envelope),
    PhaseTimeout { generation: u64 },
}

pub struct Proposer {
    id: NodeId,
    crashed: Arc<AtomicBool>,
    inbox: mpsc::UnboundedSender<Event>,
    snapshot_rx: watch::Receiver<ProposerSnapshot>,
}

impl Proposer {
    pub fn snapshot(&self) -> watch::Receiver<ProposerSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Spawns the proposer's task, registers nothing itself (the caller
    /// registers the returned handle with the network), and kicks off round 1
    /// once `start` fires.
    pub fn spawn(
        id: NodeId,
        config: ProposerConfig,
        network: Network,
    ) -> (Arc<Proposer>, Arc<AtomicBool>, mpsc::UnboundedSender<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let (start_tx, mut start_rx) = mpsc::unbounded_channel::<()>();
        let crashed = Arc::new(AtomicBool::new(false));
        let (snapshot_tx, snapshot_rx) = watch::channel(ProposerSnapshot::default());

        let handle_id = id;
        let handle = Arc::new(Proposer {
            id,
            crashed: crashed.clone(),
            inbox: tx.clone(),
            snapshot_rx: snapshot_rx.clone(),
        });

        let task_crashed = crashed.clone();
        let task_config = config.clone();
        let task_tx = tx.clone();
        tokio::spawn(async move {
            let quorum = task_config.quorum_size;
            let mut state = ProposerState {
                id,
                value_in_flight: task_config.initial_value.clone(),
                config: task_config,
                phase: Phase::Idle,
                round: 0,
                generation: 0,
                prepare_retries: 0,
                accept_retries: 0,
                promises_received: Vec::new(),
                accepts_received: Vec::new(),
                start_ts: None,
                decide_ts: None,
            };

            // Wait for the driver's explicit start signal before minting round 1.
            if start_rx.recv().await.is_some() {
                prepare(&mut state, &network, &task_tx, &snapshot_tx).await;
            }

            while let Some(event) = rx.recv().await {
                if task_crashed.load(Ordering::SeqCst) {
                    log::debug!("{} ignoring event, crashed", handle_id);
                    continue;
                }
                match event {
                    Event::Message(envelope) => {
                        handle_message(
                            &mut state,
                            envelope,
                            quorum,
                            &network,
                            &task_tx,
                            &snapshot_tx,
                        )
                        .await;
                    }
                    Event::PhaseTimeout { generation } => {
                        if generation != state.generation {
                            continue;
                        }
                        handle_timeout(&mut state, &network, &task_tx, &snapshot_tx).await;
                    }
                }
            }
            log::info!("{} task exiting", handle_id);
        });

        (handle, crashed, start_tx)
    }
}

#[async_trait]
impl Endpoint for Proposer {
    fn id(&self) -> NodeId {
        self.id
    }

    fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    async fn deliver(&self, envelope: Envelope) {
        let _ = self.inbox.send(Event::Message(envelope));
    }
}

fn publish(state: &ProposerState, tx: &watch::Sender<ProposerSnapshot>) {
    let decided_value = if state.phase == Phase::Decided {
        Some(state.value_in_flight.clone())
    } else {
        None
    };
    let latency = match (state.start_ts, state.decide_ts) {
        (Some(start), Some(decide)) => Some(decide.saturating_duration_since(start)),
        _ => None,
    };
    let _ = tx.send(ProposerSnapshot {
        phase: state.phase,
        round: state.round,
        prepare_retries: state.prepare_retries,
        accept_retries: state.accept_retries,
        decided_value,
        latency,
    });
}

fn arm_timeout(
    state: &ProposerState,
    tx: &mpsc::UnboundedSender<Event>,
) {
    let generation = state.generation;
    let timeout = state.config.phase_timeout;
    let tx = tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let _ = tx.send(Event::PhaseTimeout { generation });
    });
}

/// Begins a fresh round: bumps `round` and `generation`, resets per-round
/// tallies, broadcasts Prepare to every acceptor, and arms the phase timer.
async fn prepare(
    state: &mut ProposerState,
    network: &Network,
    tx: &mpsc::UnboundedSender<Event>,
    snapshot_tx: &watch::Sender<ProposerSnapshot>,
) {
    if state.start_ts.is_none() {
        state.start_ts = Some(tokio::time::Instant::now());
    }
    state.round += 1;
    state.generation += 1;
    state.phase = Phase::Preparing;
    state.promises_received.clear();
    state.accepts_received.clear();

    let proposal_id = ProposalId::new(state.round, state.id);
    log::info!("{} preparing round {}", state.id, state.round);

    for acceptor in network.members(Role::Acceptor).await {
        network
            .send(Envelope::new(
                state.id,
                acceptor,
                Message::Prepare { id: proposal_id },
            ))
            .await;
    }
    arm_timeout(state, tx);
    publish(state, snapshot_tx);
}

/// Sends Accept for the round's current proposal id and value to every
/// acceptor, without resetting `accepts_received` — used both for the first
/// accept broadcast and for an accept-phase timeout resend.
async fn send_accepts(
    state: &ProposerState,
    network: &Network,
    tx: &mpsc::UnboundedSender<Event>,
) {
    let proposal_id = ProposalId::new(state.round, state.id);
    for acceptor in network.members(Role::Acceptor).await {
        network
            .send(Envelope::new(
                state.id,
                acceptor,
                Message::Accept {
                    id: proposal_id,
                    value: state.value_in_flight.clone(),
                },
            ))
            .await;
    }
    arm_timeout(state, tx);
}

async fn handle_message(
    state: &mut ProposerState,
    envelope: Envelope,
    quorum: usize,
    network: &Network,
    tx: &mpsc::UnboundedSender<Event>,
    snapshot_tx: &watch::Sender<ProposerSnapshot>,
) {
    let current_id = ProposalId::new(state.round, state.id);
    match envelope.body {
        Message::Promise { id, prior } if state.phase == Phase::Preparing && id == current_id => {
            if state.promises_received.iter().any(|(from, _)| *from == envelope.from) {
                return; // duplicate promise, ignore
            }
            state.promises_received.push((envelope.from, prior));
            log::debug!(
                "{} promise {}/{} for round {}",
                state.id,
                state.promises_received.len(),
                quorum,
                state.round
            );
            if state.promises_received.len() >= quorum {
                // spec.md §4.3: adopt the value of the highest-numbered
                // prior acceptance among the quorum, if any carried one.
                if let Some((_, Some((prior_id, prior_value)))) = state
                    .promises_received
                    .iter()
                    .max_by_key(|(_, prior)| prior.as_ref().map(|(pid, _)| *pid))
                {
                    state.value_in_flight = prior_value.clone();
                    let _ = prior_id;
                }
                state.phase = Phase::Accepting;
                state.generation += 1;
                state.accept_retries = 0;
                state.accepts_received.clear();
                log::info!(
                    "{} quorum of promises for round {}, moving to accept phase",
                    state.id,
                    state.round
                );
                send_accepts(state, network, tx).await;
                publish(state, snapshot_tx);
            }
        }
        Message::Accepted { id, .. } if state.phase == Phase::Accepting && id == current_id => {
            if state.accepts_received.contains(&envelope.from) {
                return;
            }
            state.accepts_received.push(envelope.from);
            log::debug!(
                "{} accepted {}/{} for round {}",
                state.id,
                state.accepts_received.len(),
                quorum,
                state.round
            );
            if state.accepts_received.len() >= quorum {
                state.phase = Phase::Decided;
                state.decide_ts.get_or_insert_with(tokio::time::Instant::now);
                log::info!(
                    "{} round {} decided value {}",
                    state.id,
                    state.round,
                    state.value_in_flight
                );
                publish(state, snapshot_tx);
            }
        }
        other => {
            log::debug!(
                "{} ignoring stale/unexpected {} for {}",
                state.id,
                other.kind(),
                other.proposal_id()
            );
        }
    }
}

async fn handle_timeout(
    state: &mut ProposerState,
    network: &Network,
    tx: &mpsc::UnboundedSender<Event>,
    snapshot_tx: &watch::Sender<ProposerSnapshot>,
) {
    match state.phase {
        Phase::Preparing => {
            state.prepare_retries += 1;
            if state.prepare_retries < state.config.max_retries {
                log::info!(
                    "{} prepare timeout, retry {}/{}",
                    state.id,
                    state.prepare_retries,
                    state.config.max_retries
                );
                prepare(state, network, tx, snapshot_tx).await;
            } else {
                log::warn!("{} giving up after prepare retries exhausted", state.id);
                state.phase = Phase::GaveUp;
                publish(state, snapshot_tx);
            }
        }
        Phase::Accepting => {
            state.accept_retries += 1;
            if state.accept_retries < state.config.max_retries {
                log::info!(
                    "{} accept timeout, retry {}/{}",
                    state.id,
                    state.accept_retries,
                    state.config.max_retries
                );
                state.generation += 1;
                send_accepts(state, network, tx).await;
                publish(state, snapshot_tx);
            } else {
                log::warn!(
                    "{} accept phase stalled, restarting from a fresh round",
                    state.id
                );
                prepare(state, network, tx, snapshot_tx).await;
            }
        }
        Phase::Idle | Phase::Decided | Phase::GaveUp => {
            // Stale timer from a phase we've already moved past; no-op.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ProposerConfig {
        ProposerConfig {
            initial_value: Value::from("v"),
            phase_timeout: Duration::from_millis(50),
            max_retries: 2,
            quorum_size: 2,
        }
    }

    #[tokio::test]
    async fn reaches_decided_on_quorum_of_accepts() {
        let network = Network::new(crate::network::NetworkConfig::default());
        let proposer_id = NodeId::new(Role::Proposer, 0);
        let (proposer, _crashed, start_tx) = Proposer::spawn(proposer_id, cfg(), network.clone());
        network.register(proposer.clone() as Arc<dyn Endpoint>).await;

        let mut snap = proposer.snapshot();
        start_tx.send(()).unwrap();

        // Drive promises and accepteds directly, as an acceptor would.
        for i in 0..2u32 {
            let acceptor = NodeId::new(Role::Acceptor, i);
            proposer
                .deliver(Envelope::new(
                    acceptor,
                    proposer_id,
                    Message::Promise {
                        id: ProposalId::new(1, proposer_id),
                        prior: None,
                    },
                ))
                .await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        for i in 0..2u32 {
            let acceptor = NodeId::new(Role::Acceptor, i);
            proposer
                .deliver(Envelope::new(
                    acceptor,
                    proposer_id,
                    Message::Accepted {
                        id: ProposalId::new(1, proposer_id),
                        value: Value::from("v"),
                    },
                ))
                .await;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        snap.changed().await.ok();
        // Drain until decided or timeout budget exceeded.
        for _ in 0..20 {
            if snap.borrow().phase == Phase::Decided {
                break;
            }
            let _ = tokio::time::timeout(Duration::from_millis(20), snap.changed()).await;
        }
        assert_eq!(snap.borrow().phase, Phase::Decided);
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let mut c = cfg();
        c.max_retries = 1;
        c.phase_timeout = Duration::from_millis(20);
        let network = Network::new(crate::network::NetworkConfig::default());
        let proposer_id = NodeId::new(Role::Proposer, 0);
        let (proposer, _crashed, start_tx) = Proposer::spawn(proposer_id, c, network.clone());
        network.register(proposer.clone() as Arc<dyn Endpoint>).await;
        let mut snap = proposer.snapshot();
        start_tx.send(()).unwrap();

        for _ in 0..30 {
            if snap.borrow().phase == Phase::GaveUp {
                break;
            }
            let _ = tokio::time::timeout(Duration::from_millis(30), snap.changed()).await;
        }
        assert_eq!(snap.borrow().phase, Phase::GaveUp);
        assert_eq!(snap.borrow().prepare_retries, 1);
    }
}
