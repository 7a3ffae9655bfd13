//! # Summary
//!
//! The propose loop: one task per `(seq, value)` pair, retrying whole
//! rounds with a doubling backoff until the slot is decided, reclaimed,
//! or the peer dies. A peer that fails to answer is a silent non-vote;
//! the round simply proceeds with whoever replied.

use std::time;

use log::{debug, info};

use crate::message;
use crate::paxos::Paxos;
use crate::socket;
use crate::state;

/// First delay after a failed round.
const RETRY_FLOOR: time::Duration = time::Duration::from_millis(25);

/// Ceiling on the round retry delay.
const RETRY_CEILING: time::Duration = time::Duration::from_millis(500);

/// Pause between broadcast passes over unacknowledged peers.
const BROADCAST_RETRY: time::Duration = time::Duration::from_millis(50);

impl<V: state::Value> Paxos<V> {
    /// Dispatches a request to peer `index`, short-circuiting through
    /// the local handlers for our own vote.
    async fn call(&self, index: usize, request: message::Request<V>) -> Option<message::Reply<V>> {
        if index == self.me() {
            Some(self.handle(request))
        } else {
            socket::call(self.peer(index), &request, self.timeout()).await
        }
    }

    /// Records a decision learned mid-phase from another peer and
    /// spreads it before giving up the slot.
    fn learn(&self, seq: i64, value: V) {
        self.decisions().write(seq, value.clone());
        tokio::spawn(self.clone().broadcast(seq, value));
    }

    pub(crate) async fn propose(self, seq: i64, value: V) {
        self.refresh_max(seq);
        let instance = self.instances().create(seq);
        let mut backoff = RETRY_FLOOR;

        loop {
            // Reclaimed means someone decided long ago and every peer
            // has moved on; decided locally means nothing left to do.
            if self.is_dead() || seq < self.min() {
                return;
            }
            if self.decisions().read(seq).is_some() {
                return;
            }

            let ballot = self.next_ballot(&instance);
            debug!("slot {} opening ballot {}", seq, ballot);

            // Prepare phase
            let mut votes = 0;
            let mut chosen = value.clone();
            let mut prior = -1;
            for index in 0..self.total() {
                if self.is_dead() {
                    return;
                }
                let request = message::Request::Prepare(message::Prepare {
                    seq,
                    ballot,
                    done: self.local_done(),
                    from: self.me(),
                });
                let Some(message::Reply::Prepare(reply)) = self.call(index, request).await else {
                    continue;
                };
                self.refresh_min(reply.done, index);
                if seq < self.min() {
                    return;
                }
                if let Some(decided) = reply.decided {
                    self.learn(seq, decided);
                    return;
                }
                if reply.promised {
                    votes += 1;
                    // Oblige the highest-ballot value already out there.
                    if let Some((accepted, value)) = reply.accepted {
                        if accepted > prior {
                            prior = accepted;
                            chosen = value;
                        }
                    }
                }
            }

            if 2 * votes <= self.total() {
                debug!("slot {} ballot {} prepared by {}/{}", seq, ballot, votes, self.total());
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, RETRY_CEILING);
                continue;
            }

            // Accept phase
            votes = 0;
            for index in 0..self.total() {
                if self.is_dead() {
                    return;
                }
                let request = message::Request::Accept(message::Accept {
                    seq,
                    ballot,
                    value: chosen.clone(),
                    done: self.local_done(),
                    from: self.me(),
                });
                let Some(message::Reply::Accept(reply)) = self.call(index, request).await else {
                    continue;
                };
                self.refresh_min(reply.done, index);
                if let Some(decided) = reply.decided {
                    self.learn(seq, decided);
                    return;
                }
                if reply.accepted {
                    votes += 1;
                }
            }

            // Watermarks folded above may have overtaken this slot.
            if seq < self.min() {
                return;
            }

            if 2 * votes <= self.total() {
                debug!("slot {} ballot {} accepted by {}/{}", seq, ballot, votes, self.total());
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, RETRY_CEILING);
                continue;
            }

            info!("slot {} decided at ballot {}", seq, ballot);
            self.decisions().write(seq, chosen.clone());
            tokio::spawn(self.clone().broadcast(seq, chosen));
            return;
        }
    }

    /// Fire-and-retry spread of a decision: keeps calling peers that
    /// have not yet acknowledged until all have, the slot is reclaimed,
    /// or the peer dies.
    pub(crate) async fn broadcast(self, seq: i64, value: V) {
        let mut pending: Vec<usize> = (0..self.total()).filter(|index| *index != self.me()).collect();

        while seq >= self.min() && !pending.is_empty() {
            let mut waiting = Vec::with_capacity(pending.len());
            for index in pending {
                if self.is_dead() {
                    return;
                }
                let request = message::Request::Decide(message::Decide {
                    seq,
                    value: value.clone(),
                    done: self.local_done(),
                    from: self.me(),
                });
                match self.call(index, request).await {
                    Some(message::Reply::Decide(reply)) => self.refresh_min(reply.done, index),
                    _ => waiting.push(index),
                }
            }
            pending = waiting;
            if !pending.is_empty() {
                tokio::time::sleep(BROADCAST_RETRY).await;
            }
        }
    }
}
