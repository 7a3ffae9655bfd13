//! # Summary
//!
//! Single-decree Paxos, run independently per log position, plus a
//! replicated key-value map that serializes every client operation
//! through the agreed log before applying it.
//!
//! The [`Paxos`] peer implements the classic three-phase protocol
//! (prepare, accept, decide) against a fixed set of peers, with
//! watermark-based garbage collection of per-slot state. [`KvMap`]
//! consumes a peer as a total-order sequencer: each operation is
//! proposed, waited on, and applied only after every earlier decision
//! has been replayed into the local map.

mod config;
mod kv;
mod message;
mod paxos;
mod socket;
mod state;
mod store;
mod thread;

pub use crate::config::Config;
pub use crate::kv::{KvMap, Proposal};
pub use crate::paxos::Paxos;
pub use crate::state::Value;
