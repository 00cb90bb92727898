//! A single-decree Paxos consensus simulator: proposers, acceptors and
//! learners running as independent tasks over an in-process network fabric
//! that injects delay, message loss, and node crashes.
//!
//! See [`driver::Driver`] for the entry point that wires a run together.

pub mod acceptor;
pub mod driver;
pub mod error;
pub mod learner;
pub mod message;
pub mod network;
pub mod node;
pub mod proposal;
pub mod proposer;

pub use driver::{CrashEvent, Driver, RunMetrics, SimulationConfig};
pub use error::SimError;
pub use message::{Envelope, Message, Value};
pub use network::{NetworkConfig, NetworkCounters};
pub use node::{NodeId, Role};
pub use proposal::ProposalId;
