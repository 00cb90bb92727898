//! Node identity and the typed-routing endpoint trait the network delivers through.
//!
//! The teacher crate picked a receiver out of `network.nodes` by probing its
//! dynamic type (`isinstance(node, PaxosAcceptor)` in the Python original,
//! `match node { ... }` on a dynamic enum in the Rust teacher). Here a node's
//! [`Role`] is part of its address, so the network can answer "give me every
//! acceptor" with a plain filter over keys instead of a type test.

use std::fmt;

use async_trait::async_trait;

use crate::message::Envelope;

/// Which of the three Paxos roles a node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Proposer,
    Acceptor,
    Learner,
}

impl Role {
    fn as_char(self) -> char {
        match self {
            Role::Proposer => 'P',
            Role::Acceptor => 'A',
            Role::Learner => 'L',
        }
    }
}

/// A node's address: its role plus its index among nodes of that role.
///
/// Ordered lexicographically by `(role, index)`, which is also the tie-break
/// `ProposalId` uses between proposers (spec.md §3: "break ties by proposer
/// lexicographic order").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub role: Role,
    pub index: u32,
}

impl NodeId {
    pub fn new(role: Role, index: u32) -> Self {
        NodeId { role, index }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.role.as_char(), self.index)
    }
}

/// Anything the network can deliver a message to.
///
/// Implemented by [`crate::proposer::Proposer`], [`crate::acceptor::Acceptor`]
/// and [`crate::learner::Learner`]. `deliver` must never block on the
/// receiving node's own processing — it only needs to hand the envelope off
/// (spec.md §5: delivery is realized by "a short-lived worker").
#[async_trait]
pub trait Endpoint: Send + Sync {
    fn id(&self) -> NodeId;

    /// Whether this node has been crashed (spec.md §3 "Lifecycles").
    /// A crashed node accepts no further input.
    fn is_crashed(&self) -> bool;

    async fn deliver(&self, envelope: Envelope);
}
