//! Message kinds exchanged between nodes (spec.md §3).
//!
//! The teacher's `message.rs` has one struct per phase plus a wrapping
//! `Message<T>` enum (`Phase0a`..`Phase3`) because Multi-Paxos also carries
//! client requests and inter-proposer catch-up. This simulator is
//! single-decree and has no catch-up phase, so the enum trims down to the
//! four phases spec.md §3 actually names.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node::NodeId;
use crate::proposal::ProposalId;

/// An opaque byte string. The system never interprets its contents
/// (spec.md §3) — only byte-equality matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value(pub Vec<u8>);

impl Value {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Value(bytes.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value(s.into_bytes())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => write!(f, "<{} bytes>", self.0.len()),
        }
    }
}

/// A short tag for a [`Message`] variant, used as part of a retry [`crate::network::Token`]
/// and for logging without cloning the whole message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Prepare,
    Promise,
    Accept,
    Accepted,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageKind::Prepare => "prepare",
            MessageKind::Promise => "promise",
            MessageKind::Accept => "accept",
            MessageKind::Accepted => "accepted",
        };
        write!(f, "{}", s)
    }
}

/// One of the four message kinds the protocol exchanges.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Proposer → acceptor: "promise not to accept anything below `id`."
    Prepare { id: ProposalId },
    /// Acceptor → proposer: the pledge, plus whatever it had previously accepted.
    Promise {
        id: ProposalId,
        prior: Option<(ProposalId, Value)>,
    },
    /// Proposer → acceptor: "accept `value` under `id`."
    Accept { id: ProposalId, value: Value },
    /// Acceptor → learner/proposer: "I accepted `value` under `id`."
    Accepted { id: ProposalId, value: Value },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Prepare { .. } => MessageKind::Prepare,
            Message::Promise { .. } => MessageKind::Promise,
            Message::Accept { .. } => MessageKind::Accept,
            Message::Accepted { .. } => MessageKind::Accepted,
        }
    }

    pub fn proposal_id(&self) -> ProposalId {
        match self {
            Message::Prepare { id }
            | Message::Promise { id, .. }
            | Message::Accept { id, .. }
            | Message::Accepted { id, .. } => *id,
        }
    }
}

/// A message in flight between two specific nodes.
///
/// `dropped` is carried for observability only (spec.md §3): the network
/// never delivers an envelope with `dropped = true`; it is set on the copy
/// handed to a log line, never on the one in `active` tracking.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: NodeId,
    pub to: NodeId,
    pub body: Message,
    pub dropped: bool,
}

impl Envelope {
    pub fn new(from: NodeId, to: NodeId, body: Message) -> Self {
        Envelope {
            from,
            to,
            body,
            dropped: false,
        }
    }
}
