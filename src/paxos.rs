//! # Summary
//!
//! This module defines the `Paxos` peer: one per replica, answering
//! prepare/accept/decide calls from other peers and running the propose
//! loop for slots it is asked to decide. Per-slot ballot state lives in
//! the instance allocator; decided values live in their own store; both
//! are reclaimed once every peer's done watermark has passed a slot.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time;

use log::trace;
use parking_lot::Mutex;
use tokio::net;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::message;
use crate::state;
use crate::store;

/// A single Paxos replica. Cheap to clone; all clones share one peer.
#[derive(Clone)]
pub struct Paxos<V: state::Value> {
    inner: Arc<Inner<V>>,
}

struct Inner<V: state::Value> {
    /// Ordered peer endpoints, identical on every replica
    peers: Vec<String>,

    /// This replica's index into `peers`
    me: usize,

    /// Timeout for a single peer-to-peer call
    timeout: time::Duration,

    /// Set once by `kill`; checked cooperatively everywhere
    dead: AtomicBool,

    /// Test hook: drop or half-serve a fraction of inbound calls
    unreliable: AtomicBool,

    /// Highest slot seen in any role; a hint for allocating fresh slots
    max: AtomicI64,

    /// Last done watermark reported by each peer
    min: Mutex<Vec<i64>>,

    /// Per-slot ballot state
    instances: store::Instances<V>,

    /// Decided values
    decisions: store::Decisions<V>,

    /// Latched by `kill` to stop the accept loop
    shutdown: CancellationToken,
}

impl<V: state::Value> Paxos<V> {
    /// Binds the listening socket at `config.addr()` and spawns the
    /// accept loop. The peer is live as soon as this returns.
    pub async fn bind(config: &Config) -> io::Result<Self> {
        let listener = net::TcpListener::bind(config.addr()).await?;
        let paxos = Paxos {
            inner: Arc::new(Inner {
                peers: config.peers().to_vec(),
                me: config.me(),
                timeout: config.timeout(),
                dead: AtomicBool::new(false),
                unreliable: AtomicBool::new(false),
                max: AtomicI64::new(-1),
                min: Mutex::new(vec![-1; config.total()]),
                instances: store::Instances::new(),
                decisions: store::Decisions::new(),
                shutdown: CancellationToken::new(),
            }),
        };
        tokio::spawn(paxos.clone().listen(listener));
        Ok(paxos)
    }

    /// Asynchronously starts trying to get `value` (or whatever value
    /// has already won) decided for slot `seq`. Returns immediately;
    /// safe to call repeatedly for the same slot.
    pub fn start(&self, seq: i64, value: V) {
        if self.is_dead() {
            return;
        }
        self.refresh_max(seq);
        tokio::spawn(self.clone().propose(seq, value));
    }

    /// Non-blocking read of this peer's knowledge of `seq`'s decision.
    pub fn status(&self, seq: i64) -> Option<V> {
        if self.is_dead() {
            return None;
        }
        self.inner.decisions.read(seq)
    }

    /// Declares that this peer no longer needs any slot at or below
    /// `seq`, and propagates the new global minimum to both stores.
    pub fn done(&self, seq: i64) {
        self.refresh_min(seq, self.inner.me);
    }

    /// Highest slot this peer has seen in any role.
    pub fn max(&self) -> i64 {
        self.inner.max.load(Ordering::Relaxed)
    }

    /// One past the lowest done watermark across all peers. Slots below
    /// this are fully garbage-collected and must not be reused.
    pub fn min(&self) -> i64 {
        let min = self.inner.min.lock();
        min.iter().copied().min().unwrap_or(-1) + 1
    }

    /// Marks the peer dead: inbound calls are dropped without reply,
    /// no new proposals start, and in-flight ones abort at their next
    /// check.
    pub fn kill(&self) {
        self.inner.dead.store(true, Ordering::Relaxed);
        self.inner.shutdown.cancel();
    }

    /// Test hook mirroring a lossy network: drops ~10% of inbound
    /// calls outright and discards the reply for ~20% more.
    pub fn set_unreliable(&self, unreliable: bool) {
        self.inner.unreliable.store(unreliable, Ordering::Relaxed);
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.inner.dead.load(Ordering::Relaxed)
    }

    pub(crate) fn is_unreliable(&self) -> bool {
        self.inner.unreliable.load(Ordering::Relaxed)
    }

    pub(crate) fn me(&self) -> usize {
        self.inner.me
    }

    pub(crate) fn total(&self) -> usize {
        self.inner.peers.len()
    }

    pub(crate) fn peer(&self, index: usize) -> &str {
        &self.inner.peers[index]
    }

    pub(crate) fn timeout(&self) -> time::Duration {
        self.inner.timeout
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    pub(crate) fn decisions(&self) -> &store::Decisions<V> {
        &self.inner.decisions
    }

    pub(crate) fn instances(&self) -> &store::Instances<V> {
        &self.inner.instances
    }

    /// This peer's own done watermark, piggybacked on every request.
    pub(crate) fn local_done(&self) -> i64 {
        self.inner.min.lock()[self.inner.me]
    }

    pub(crate) fn refresh_max(&self, seq: i64) {
        self.inner.max.fetch_max(seq, Ordering::Relaxed);
    }

    /// Folds in a done watermark reported by `index`. When the global
    /// minimum advances, both stores reclaim everything behind it.
    pub(crate) fn refresh_min(&self, seq: i64, index: usize) {
        let mut min = self.inner.min.lock();
        if seq <= min[index] {
            return;
        }
        min[index] = seq;
        let bound = min.iter().copied().min().unwrap_or(-1);
        self.inner.instances.done(bound);
        self.inner.decisions.done(bound);
    }

    /// Smallest ballot congruent to our index mod the group size that
    /// exceeds the highest ballot seen for this slot. No two peers can
    /// ever pick the same number.
    pub(crate) fn next_ballot(&self, instance: &Mutex<store::Instance<V>>) -> i64 {
        let promised = instance.lock().promised;
        let total = self.total() as i64;
        let me = self.inner.me as i64;
        let mut ballot = (promised / total) * total + me;
        while ballot <= promised {
            ballot += total;
        }
        ballot
    }

    pub(crate) fn handle(&self, request: message::Request<V>) -> message::Reply<V> {
        match request {
            message::Request::Prepare(m) => message::Reply::Prepare(self.handle_prepare(m)),
            message::Request::Accept(m) => message::Reply::Accept(self.handle_accept(m)),
            message::Request::Decide(m) => message::Reply::Decide(self.handle_decide(m)),
        }
    }

    /// Prepare: promise never to accept a ballot below `m.ballot`,
    /// reporting the highest-ballot proposal accepted so far. Short-
    /// circuits when the slot is already decided here.
    pub(crate) fn handle_prepare(&self, m: message::Prepare) -> message::PrepareReply<V> {
        self.refresh_max(m.seq);
        self.refresh_min(m.done, m.from);
        let done = self.local_done();

        if let Some(value) = self.inner.decisions.read(m.seq) {
            return message::PrepareReply {
                done,
                decided: Some(value),
                promised: false,
                accepted: None,
            };
        }

        let instance = self.inner.instances.create(m.seq);
        let mut instance = instance.lock();
        if m.ballot > instance.promised {
            instance.promised = m.ballot;
            trace!("slot {} promised ballot {}", m.seq, m.ballot);
            message::PrepareReply {
                done,
                decided: None,
                promised: true,
                accepted: instance.accepted.clone(),
            }
        } else {
            message::PrepareReply {
                done,
                decided: None,
                promised: false,
                accepted: None,
            }
        }
    }

    /// Accept: record the proposal iff its ballot is at least as high
    /// as the current promise.
    pub(crate) fn handle_accept(&self, m: message::Accept<V>) -> message::AcceptReply<V> {
        self.refresh_max(m.seq);
        self.refresh_min(m.done, m.from);
        let done = self.local_done();

        if let Some(value) = self.inner.decisions.read(m.seq) {
            return message::AcceptReply {
                done,
                decided: Some(value),
                accepted: false,
            };
        }

        let instance = self.inner.instances.create(m.seq);
        let mut instance = instance.lock();
        if m.ballot >= instance.promised {
            instance.promised = m.ballot;
            instance.accepted = Some((m.ballot, m.value));
            trace!("slot {} accepted ballot {}", m.seq, m.ballot);
            message::AcceptReply {
                done,
                decided: None,
                accepted: true,
            }
        } else {
            message::AcceptReply {
                done,
                decided: None,
                accepted: false,
            }
        }
    }

    /// Decide: learn the agreed value. Idempotent by construction of
    /// the decided-value store.
    pub(crate) fn handle_decide(&self, m: message::Decide<V>) -> message::DecideReply {
        self.refresh_max(m.seq);
        self.refresh_min(m.done, m.from);
        self.inner.decisions.write(m.seq, m.value);
        message::DecideReply {
            done: self.local_done(),
        }
    }
}
