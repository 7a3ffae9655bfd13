//! # Summary
//!
//! Wire types for the three peer-to-peer calls, one per protocol phase.
//! Every request carries the caller's done watermark and index so the
//! responder can fold them in; every reply carries the responder's own
//! watermark back.

use serde_derive::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Prepare {
    pub seq: i64,
    pub ballot: i64,
    pub done: i64,
    pub from: usize,
}

#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Accept<V> {
    pub seq: i64,
    pub ballot: i64,
    pub value: V,
    pub done: i64,
    pub from: usize,
}

#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decide<V> {
    pub seq: i64,
    pub value: V,
    pub done: i64,
    pub from: usize,
}

#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug)]
pub enum Request<V> {
    Prepare(Prepare),
    Accept(Accept<V>),
    Decide(Decide<V>),
}

/// Reply to a prepare. `decided` short-circuits the phase: the responder
/// already knows the outcome for this slot. Otherwise `promised` reports
/// whether the ballot was high enough, and `accepted` carries the
/// highest-ballot value this responder has previously accepted.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug)]
pub struct PrepareReply<V> {
    pub done: i64,
    pub decided: Option<V>,
    pub promised: bool,
    pub accepted: Option<(i64, V)>,
}

#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug)]
pub struct AcceptReply<V> {
    pub done: i64,
    pub decided: Option<V>,
    pub accepted: bool,
}

#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug)]
pub struct DecideReply {
    pub done: i64,
}

#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug)]
pub enum Reply<V> {
    Prepare(PrepareReply<V>),
    Accept(AcceptReply<V>),
    Decide(DecideReply),
}
