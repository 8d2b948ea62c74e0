//! Deterministic simulation harness for the Revline realtime client.
//!
//! Runs the real [`revline_client::Client`] state machines against an
//! in-memory relay on a virtual clock. A scenario is a deterministic function
//! of its seed and the operations applied, so any failure reproduces exactly.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Invariants verify WHAT must be true across all execution paths, not
//! specific scenarios. [`SimWorld`] checks [`InvariantRegistry::standard()`]
//! after every processed event.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_env;
pub mod sim_relay;
pub mod world;

pub use invariants::{
    AttemptsBounded, ClientSnapshot, DisconnectedIsClean, Invariant, InvariantRegistry,
    InvariantResult, ObserversMatchTracker, ShutdownIsFinal, SingleLiveTransport, SystemSnapshot,
    TypingRequiresConnection, Violation,
};
pub use sim_env::{SimEnv, SimInstant};
pub use sim_relay::{ClientIdx, Delivery, SimRelay};
pub use world::{SimClient, SimOptions, SimWorld};
