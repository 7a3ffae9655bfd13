//! # Summary
//!
//! This module contains the background tasks spawned by a peer: the
//! propose loop (with its decision broadcast), and the accept loop
//! serving inbound peer-to-peer calls.

/// Propose loop and decision broadcast.
pub(crate) mod proposer;

/// Accept loop and per-connection serving.
pub(crate) mod listener;
