//! Acceptor role (spec.md §4.2).
//!
//! Grounded in the teacher's `NetNode` promise/accept handling in
//! `multi_paxos.rs`, generalized from Multi-Paxos's per-slot acceptor state to
//! this simulator's single decree. State is owned outright by the task
//! draining this node's channel rather than guarded by an explicit `Mutex`
//! (SPEC_FULL.md §5) — the actor *is* the mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::message::{Envelope, Message, Value};
use crate::network::Network;
use crate::node::{Endpoint, NodeId};
use crate::proposal::ProposalId;

#[derive(Debug, Clone, Default)]
struct AcceptorState {
    /// Highest proposal id ever promised or accepted under (spec.md §4.2
    /// invariant: an acceptor never accepts below this).
    promised: Option<ProposalId>,
    /// The value most recently accepted, with the id it was accepted under.
    accepted: Option<(ProposalId, Value)>,
}

impl AcceptorState {
    fn on_prepare(&mut self, id: ProposalId) -> Option<Message> {
        if Some(id) >= self.promised {
            self.promised = Some(id);
            Some(Message::Promise {
                id,
                prior: self.accepted.clone(),
            })
        } else {
            None
        }
    }

    fn on_accept(&mut self, id: ProposalId, value: Value) -> Option<Message> {
        if Some(id) >= self.promised {
            self.promised = Some(id);
            self.accepted = Some((id, value.clone()));
            Some(Message::Accepted { id, value })
        } else {
            None
        }
    }
}

/// A running acceptor node: an owned [`AcceptorState`] behind a channel, plus
/// the crash flag and id the network needs from outside the task.
pub struct Acceptor {
    id: NodeId,
    crashed: Arc<AtomicBool>,
    inbox: mpsc::UnboundedSender<Envelope>,
}

#[async_trait]
impl Endpoint for Acceptor {
    fn id(&self) -> NodeId {
        self.id
    }

    fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    async fn deliver(&self, envelope: Envelope) {
        // The receiver may have shut down after the network looked it up;
        // a dropped send here just means the message arrives nowhere.
        let _ = self.inbox.send(envelope);
    }
}

impl Acceptor {
    /// Spawns the acceptor's task and returns a handle the network can
    /// register and the driver can crash.
    pub fn spawn(id: NodeId, network: Network) -> (Arc<Acceptor>, Arc<AtomicBool>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let crashed = Arc::new(AtomicBool::new(false));
        let handle = Arc::new(Acceptor {
            id,
            crashed: crashed.clone(),
            inbox: tx,
        });

        let task_crashed = crashed.clone();
        tokio::spawn(async move {
            let mut state = AcceptorState::default();
            while let Some(envelope) = rx.recv().await {
                if task_crashed.load(Ordering::SeqCst) {
                    log::debug!("{} ignoring message, crashed", id);
                    continue;
                }
                let reply = match envelope.body {
                    Message::Prepare { id: pid } => {
                        log::debug!("{} prepare {}", id, pid);
                        state.on_prepare(pid)
                    }
                    Message::Accept { id: pid, value } => {
                        log::debug!("{} accept {} = {}", id, pid, value);
                        state.on_accept(pid, value)
                    }
                    other => {
                        log::warn!("{} received unexpected {}", id, other.kind());
                        None
                    }
                };
                if let Some(body) = reply {
                    let reply_to = envelope.from;
                    let from = id;
                    let is_accepted = matches!(body, Message::Accepted { .. });
                    if is_accepted {
                        // spec.md §4.2 broadcasts accepted() to every proposer, not just
                        // the one that sent this accept; narrowed here to the sender
                        // only, since a proposer ignores any accepted() whose id isn't
                        // its own current_id, so the broadcast form and this unicast
                        // form are behaviorally equivalent for quorum-counting.
                        for learner in network.members(crate::node::Role::Learner).await {
                            network
                                .send(Envelope::new(from, learner, body.clone()))
                                .await;
                        }
                    }
                    network.send(Envelope::new(from, reply_to, body)).await;
                }
            }
            log::info!("{} task exiting", id);
        });

        (handle, crashed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Role;

    fn pid(round: u64, idx: u32) -> ProposalId {
        ProposalId::new(round, NodeId::new(Role::Proposer, idx))
    }

    #[test]
    fn promises_monotonic_ids_only() {
        let mut s = AcceptorState::default();
        assert!(s.on_prepare(pid(2, 0)).is_some());
        assert!(s.on_prepare(pid(1, 0)).is_none());
        assert!(s.on_prepare(pid(2, 1)).is_some());
    }

    #[test]
    fn accept_rejected_below_promise() {
        let mut s = AcceptorState::default();
        s.on_prepare(pid(5, 0));
        assert!(s.on_accept(pid(4, 0), Value::from("x")).is_none());
        assert!(s.on_accept(pid(5, 0), Value::from("x")).is_some());
    }

    #[test]
    fn promise_carries_prior_accepted_value() {
        let mut s = AcceptorState::default();
        s.on_prepare(pid(1, 0));
        s.on_accept(pid(1, 0), Value::from("first"));
        match s.on_prepare(pid(2, 0)) {
            Some(Message::Promise { prior, .. }) => {
                assert_eq!(prior, Some((pid(1, 0), Value::from("first"))));
            }
            other => panic!("expected Promise, got {:?}", other),
        }
    }
}
