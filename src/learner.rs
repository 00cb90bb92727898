//! Learner role (spec.md §4.3 "Learners").
//!
//! Grounded in the teacher's client-reporting path in `multi_paxos.rs`
//! (`NetNode` forwarding `Phase3`/accepted notices to learners) and
//! `original_source/paxos_analysis/paxos_simulation.py`'s `PaxosLearner`,
//! which tallies `Accepted` notices per proposal id and declares a decision
//! on the first quorum — the same structure used here.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::message::{Envelope, Message, Value};
use crate::node::{Endpoint, NodeId};
use crate::proposal::ProposalId;

#[derive(Debug, Clone, Default)]
pub struct LearnerSnapshot {
    pub decided: Option<(ProposalId, Value)>,
}

struct LearnerState {
    id: NodeId,
    quorum: usize,
    /// Distinct acceptors seen so far, per proposal id (spec.md §4.3:
    /// duplicate `Accepted` from the same acceptor doesn't advance a tally).
    tallies: HashMap<ProposalId, HashSet<NodeId>>,
    decided: Option<(ProposalId, Value)>,
}

impl LearnerState {
    /// Returns `Err` if this `Accepted` would contradict an already-decided
    /// value under a *different* id — a safety violation that should never
    /// happen given correct acceptors, surfaced here as a hard assertion
    /// rather than silently ignored (spec.md §7 invariant violations).
    fn on_accepted(&mut self, from: NodeId, id: ProposalId, value: Value) {
        if let Some((decided_id, decided_value)) = &self.decided {
            if *decided_id != id && *decided_value != value {
                panic!(
                    "{} observed conflicting decisions: {} = {} and {} = {}",
                    self.id, decided_id, decided_value, id, value
                );
            }
            return;
        }

        let voters = self.tallies.entry(id).or_default();
        voters.insert(from);
        if voters.len() >= self.quorum {
            log::info!("{} learned decision {} = {}", self.id, id, value);
            self.decided = Some((id, value));
        }
    }
}

pub struct Learner {
    id: NodeId,
    crashed: Arc<AtomicBool>,
    inbox: mpsc::UnboundedSender<Envelope>,
    snapshot_rx: watch::Receiver<LearnerSnapshot>,
}

impl Learner {
    pub fn snapshot(&self) -> watch::Receiver<LearnerSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn spawn(id: NodeId, quorum: usize) -> (Arc<Learner>, Arc<AtomicBool>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let crashed = Arc::new(AtomicBool::new(false));
        let (snapshot_tx, snapshot_rx) = watch::channel(LearnerSnapshot::default());

        let handle = Arc::new(Learner {
            id,
            crashed: crashed.clone(),
            inbox: tx,
            snapshot_rx,
        });

        let task_crashed = crashed.clone();
        tokio::spawn(async move {
            let mut state = LearnerState {
                id,
                quorum,
                tallies: HashMap::new(),
                decided: None,
            };
            while let Some(envelope) = rx.recv().await {
                if task_crashed.load(Ordering::SeqCst) {
                    log::debug!("{} ignoring message, crashed", id);
                    continue;
                }
                match envelope.body {
                    Message::Accepted { id: pid, value } => {
                        state.on_accepted(envelope.from, pid, value);
                        let _ = snapshot_tx.send(LearnerSnapshot {
                            decided: state.decided.clone(),
                        });
                    }
                    other => {
                        log::warn!("{} received unexpected {}", id, other.kind());
                    }
                }
            }
            log::info!("{} task exiting", id);
        });

        (handle, crashed)
    }
}

#[async_trait]
impl Endpoint for Learner {
    fn id(&self) -> NodeId {
        self.id
    }

    fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    async fn deliver(&self, envelope: Envelope) {
        let _ = self.inbox.send(envelope);
    }
}
