//! The totally-ordered proposal identifier (spec.md §3).

use std::fmt;

use crate::node::NodeId;

/// `(round, proposer)`, ordered lexicographically with round as the primary
/// key. No two distinct proposals ever share an id: a proposer only mints
/// one by incrementing its own `round`, and ties between equal rounds can't
/// arise because a round is local to the proposer that owns it.
///
/// The spec also calls for a "null proposal id" that compares below any real
/// one; rather than carry a sentinel `round = 0` (which a teacher-style
/// implementation would reach for), this crate represents absence with
/// `Option<ProposalId>` and leans on `Option`'s derived `Ord`, where `None`
/// sorts before every `Some(_)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProposalId {
    pub round: u64,
    pub proposer: NodeId,
}

impl ProposalId {
    pub fn new(round: u64, proposer: NodeId) -> Self {
        ProposalId { round, proposer }
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.round, self.proposer)
    }
}
