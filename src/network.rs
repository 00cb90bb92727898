//! The in-process network fabric: delay, loss, retry/backoff, and duplicate
//! suppression (spec.md §4.1).
//!
//! Grounded directly in `original_source/paxos_analysis/paxos_simulation.py`'s
//! `NetworkSimulator` (`send_message`/`_retry_message`/`_deliver_message`) and
//! the teacher's `NetNode` send/receive split, rebuilt on `tokio` so delay and
//! backoff are real (if compressed) waits instead of `threading.Timer`.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, RwLock};

use crate::message::{Envelope, MessageKind};
use crate::node::{Endpoint, NodeId, Role};
use crate::proposal::ProposalId;

/// Network-fabric knobs (distinct from [`crate::driver::SimulationConfig`],
/// which is the outward-facing knob set a driver run takes).
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub delay_range: (Duration, Duration),
    pub drop_rate: f64,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            delay_range: (Duration::ZERO, Duration::ZERO),
            drop_rate: 0.0,
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(5),
        }
    }
}

/// A snapshot of the network's sent/dropped/retried counters (spec.md §4.1).
///
/// Semantics, pinned down per spec.md §9's first open question: `sent` is
/// incremented once per `send` attempt (a retry is its own attempt and its
/// own increment); `dropped` once per drop decision, terminal or not;
/// `retried` once per retry actually scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkCounters {
    pub sent: u64,
    pub dropped: u64,
    pub retried: u64,
}

/// Uniquely identifies one in-flight send attempt, so a retry of the same
/// logical message doesn't get double-enqueued (spec.md §4.1, §9 "Duplicate
/// suppression").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    from: NodeId,
    to: NodeId,
    kind: MessageKind,
    proposal_id: ProposalId,
    attempt: u32,
}

impl Token {
    fn new(envelope: &Envelope, attempt: u32) -> Self {
        Token {
            from: envelope.from,
            to: envelope.to,
            kind: envelope.body.kind(),
            proposal_id: envelope.body.proposal_id(),
            attempt,
        }
    }
}

struct Counters {
    sent: AtomicU64,
    dropped: AtomicU64,
    retried: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Counters {
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            retried: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> NetworkCounters {
        NetworkCounters {
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    nodes: RwLock<HashMap<NodeId, Arc<dyn Endpoint>>>,
    active: Mutex<HashSet<Token>>,
    running: AtomicBool,
    counters: Counters,
    config: NetworkConfig,
}

/// The shared network fabric. Cheap to clone — every node task and the
/// driver hold their own clone of the same underlying state.
#[derive(Clone)]
pub struct Network {
    inner: Arc<Inner>,
}

impl Network {
    pub fn new(config: NetworkConfig) -> Self {
        Network {
            inner: Arc::new(Inner {
                nodes: RwLock::new(HashMap::new()),
                active: Mutex::new(HashSet::new()),
                running: AtomicBool::new(true),
                counters: Counters::new(),
                config,
            }),
        }
    }

    /// Idempotently records `node.id() → node`.
    pub async fn register(&self, node: Arc<dyn Endpoint>) {
        let id = node.id();
        self.inner.nodes.write().await.entry(id).or_insert(node);
        log::info!("{} started", id);
    }

    /// Every registered node id of the given role, for broadcast sends.
    pub async fn members(&self, role: Role) -> Vec<NodeId> {
        self.inner
            .nodes
            .read()
            .await
            .keys()
            .filter(|id| id.role == role)
            .copied()
            .collect()
    }

    pub fn counters(&self) -> NetworkCounters {
        self.inner.counters.snapshot()
    }

    /// Sends `envelope`. Returns immediately; delivery (or its loss) happens
    /// on a spawned task.
    pub async fn send(&self, envelope: Envelope) {
        self.send_with_attempt(envelope, 0).await;
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt as i32);
        let scaled = self.inner.config.backoff_base.mul_f64(factor);
        scaled.min(self.inner.config.backoff_cap)
    }

    fn sample_delay(&self) -> Duration {
        let (min, max) = self.inner.config.delay_range;
        if min >= max {
            return min;
        }
        let millis = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis());
        Duration::from_millis(millis as u64)
    }

    async fn remove_token(&self, token: &Token) {
        self.inner.active.lock().await.remove(token);
    }

    fn send_with_attempt(
        &self,
        envelope: Envelope,
        attempt: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if !self.inner.running.load(Ordering::SeqCst) {
                return;
            }

            let token = Token::new(&envelope, attempt);
            {
                let mut active = self.inner.active.lock().await;
                if !active.insert(token.clone()) {
                    // Identical in-flight message already being handled.
                    return;
                }
            }
            self.inner.counters.sent.fetch_add(1, Ordering::Relaxed);

            let drop_roll: f64 = rand::thread_rng().gen();
            if drop_roll < self.inner.config.drop_rate {
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "dropped {} from {} to {} (attempt {})",
                    envelope.body.kind(),
                    envelope.from,
                    envelope.to,
                    attempt
                );
                self.remove_token(&token).await;

                let can_retry =
                    attempt < self.inner.config.max_retries && self.inner.config.drop_rate < 1.0;
                if can_retry {
                    self.inner.counters.retried.fetch_add(1, Ordering::Relaxed);
                    let backoff = self.backoff_for(attempt);
                    log::debug!(
                        "retry {} scheduled for {} -> {} in {:?}",
                        attempt + 1,
                        envelope.from,
                        envelope.to,
                        backoff
                    );
                    let net = self.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(backoff).await;
                        net.send_with_attempt(envelope, attempt + 1).await;
                    });
                } else {
                    log::debug!(
                        "{} permanently dropped from {} to {}",
                        envelope.body.kind(),
                        envelope.from,
                        envelope.to
                    );
                }
                return;
            }

            let delay = self.sample_delay();
            let net = self.clone();
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                net.try_deliver(envelope, token).await;
            });
        })
    }

    async fn try_deliver(&self, envelope: Envelope, token: Token) {
        if self.inner.running.load(Ordering::SeqCst) {
            let target = self.inner.nodes.read().await.get(&envelope.to).cloned();
            match target {
                Some(node) if !node.is_crashed() => {
                    log::debug!(
                        "delivered {} from {} to {}",
                        envelope.body.kind(),
                        envelope.from,
                        envelope.to
                    );
                    node.deliver(envelope).await;
                }
                Some(_) => {
                    log::debug!("dropping delivery to crashed node {}", envelope.to);
                }
                None => {
                    log::warn!(
                        "unknown receiver {} for {} from {}",
                        envelope.to,
                        envelope.body.kind(),
                        envelope.from
                    );
                }
            }
        }
        self.remove_token(&token).await;
    }

    /// Clears `running`, drains pending tokens. Further `send` calls are no-ops.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.active.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        id: NodeId,
        hits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Endpoint for Counter {
        fn id(&self) -> NodeId {
            self.id
        }
        fn is_crashed(&self) -> bool {
            false
        }
        async fn deliver(&self, _envelope: Envelope) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pid(idx: u32) -> ProposalId {
        ProposalId::new(1, NodeId::new(Role::Proposer, idx))
    }

    #[tokio::test]
    async fn delivers_with_zero_delay_and_zero_drop() {
        let net = Network::new(NetworkConfig::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let from = NodeId::new(Role::Proposer, 0);
        let to = NodeId::new(Role::Acceptor, 0);
        net.register(Arc::new(Counter { id: to, hits: hits.clone() }))
            .await;

        net.send(Envelope::new(from, to, Message::Prepare { id: pid(0) }))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let counters = net.counters();
        assert_eq!(counters.sent, 1);
        assert_eq!(counters.dropped, 0);
        assert_eq!(counters.retried, 0);
    }

    #[tokio::test]
    async fn full_drop_rate_never_delivers_or_retries() {
        let mut cfg = NetworkConfig::default();
        cfg.drop_rate = 1.0;
        let net = Network::new(cfg);
        let hits = Arc::new(AtomicUsize::new(0));
        let from = NodeId::new(Role::Proposer, 0);
        let to = NodeId::new(Role::Acceptor, 0);
        net.register(Arc::new(Counter { id: to, hits: hits.clone() }))
            .await;

        net.send(Envelope::new(from, to, Message::Prepare { id: pid(0) }))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        let counters = net.counters();
        assert_eq!(counters.sent, 1);
        assert_eq!(counters.dropped, 1);
        assert_eq!(counters.retried, 0);
    }

    #[tokio::test]
    async fn duplicate_token_is_not_reenqueued() {
        let net = Network::new(NetworkConfig::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let from = NodeId::new(Role::Proposer, 0);
        let to = NodeId::new(Role::Acceptor, 0);
        net.register(Arc::new(Counter { id: to, hits: hits.clone() }))
            .await;

        let env = Envelope::new(from, to, Message::Prepare { id: pid(0) });
        let token = Token::new(&env, 0);
        net.inner.active.lock().await.insert(token);

        net.send(env).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_prevents_further_delivery() {
        let net = Network::new(NetworkConfig::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let from = NodeId::new(Role::Proposer, 0);
        let to = NodeId::new(Role::Acceptor, 0);
        net.register(Arc::new(Counter { id: to, hits: hits.clone() }))
            .await;

        net.stop().await;
        net.send(Envelope::new(from, to, Message::Prepare { id: pid(0) }))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn members_filters_by_role() {
        let net = Network::new(NetworkConfig::default());
        let a0 = NodeId::new(Role::Acceptor, 0);
        let a1 = NodeId::new(Role::Acceptor, 1);
        let p0 = NodeId::new(Role::Proposer, 0);
        for id in [a0, a1, p0] {
            net.register(Arc::new(Counter { id, hits: Arc::new(AtomicUsize::new(0)) }))
                .await;
        }
        let mut acceptors = net.members(Role::Acceptor).await;
        acceptors.sort();
        assert_eq!(acceptors, vec![a0, a1]);
    }
}
