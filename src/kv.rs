//! # Summary
//!
//! Replicated key-value map driven by the agreed log. Every client
//! operation, reads included, is first proposed to Paxos; the slot it
//! wins becomes a barrier: all earlier decisions are replayed into the
//! local map before the operation executes and returns. One operation
//! proceeds at a time per replica.

use std::io;
use std::time;

use hashbrown::HashMap as Map;
use log::debug;
use serde_derive::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::paxos::Paxos;

/// First delay while polling for a decision.
const WAIT_FLOOR: time::Duration = time::Duration::from_millis(10);

/// Ceiling on the decision poll delay.
const WAIT_CEILING: time::Duration = time::Duration::from_secs(1);

/// Operation carried through the log. Two proposals are equal iff all
/// of their fields match. `Null` only fills a gap to establish order.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Proposal {
    Put { key: String, value: String },
    Get { key: String },
    Update { key: String, value: String },
    Delete { key: String },
    Count,
    Dump,
    Null,
}

pub struct KvMap {
    paxos: Paxos<Proposal>,
    state: Mutex<State>,
}

struct State {
    dead: bool,

    /// Next slot not yet applied to `data`
    done: i64,

    data: Map<String, String>,
}

/// Folds one decided proposal into the map. Deterministic: replaying
/// the same prefix on any replica yields identical contents.
fn apply(data: &mut Map<String, String>, proposal: Proposal) {
    match proposal {
        Proposal::Put { key, value } => {
            data.entry(key).or_insert(value);
        }
        Proposal::Update { key, value } => {
            if let Some(slot) = data.get_mut(&key) {
                *slot = value;
            }
        }
        Proposal::Delete { key } => {
            data.remove(&key);
        }
        Proposal::Get { .. } | Proposal::Count | Proposal::Dump | Proposal::Null => (),
    }
}

impl KvMap {
    /// Starts the underlying Paxos peer and an empty map.
    pub async fn bind(config: &Config) -> io::Result<Self> {
        Ok(KvMap {
            paxos: Paxos::bind(config).await?,
            state: Mutex::new(State {
                dead: false,
                done: 0,
                data: Map::default(),
            }),
        })
    }

    /// Inserts `key` only if absent. Returns whether it was inserted.
    pub async fn put(&self, key: &str, value: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.dead {
            return false;
        }
        let seq = self
            .submit(Proposal::Put {
                key: key.to_owned(),
                value: value.to_owned(),
            })
            .await;
        self.catch_up(&mut state, seq).await;

        let inserted = if state.data.contains_key(key) {
            false
        } else {
            state.data.insert(key.to_owned(), value.to_owned());
            true
        };
        self.advance(&mut state);
        inserted
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        if state.dead {
            return None;
        }
        let seq = self.submit(Proposal::Get { key: key.to_owned() }).await;
        self.catch_up(&mut state, seq).await;

        let value = state.data.get(key).cloned();
        self.advance(&mut state);
        value
    }

    /// Overwrites `key` only if present. Returns whether it was updated.
    pub async fn update(&self, key: &str, value: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.dead {
            return false;
        }
        let seq = self
            .submit(Proposal::Update {
                key: key.to_owned(),
                value: value.to_owned(),
            })
            .await;
        self.catch_up(&mut state, seq).await;

        let updated = match state.data.get_mut(key) {
            Some(slot) => {
                *slot = value.to_owned();
                true
            }
            None => false,
        };
        self.advance(&mut state);
        updated
    }

    /// Removes `key` unconditionally, returning the previous value.
    pub async fn delete(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        if state.dead {
            return None;
        }
        let seq = self.submit(Proposal::Delete { key: key.to_owned() }).await;
        self.catch_up(&mut state, seq).await;

        let previous = state.data.remove(key);
        self.advance(&mut state);
        previous
    }

    pub async fn count(&self) -> Option<usize> {
        let mut state = self.state.lock().await;
        if state.dead {
            return None;
        }
        let seq = self.submit(Proposal::Count).await;
        self.catch_up(&mut state, seq).await;

        let count = state.data.len();
        self.advance(&mut state);
        Some(count)
    }

    /// Serializes the map as a JSON list of `[key, value]` pairs, in
    /// unspecified order.
    pub async fn dump(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        if state.dead {
            return None;
        }
        let seq = self.submit(Proposal::Dump).await;
        self.catch_up(&mut state, seq).await;

        let pairs: Vec<(&String, &String)> = state.data.iter().collect();
        let dump = serde_json::to_string(&pairs).ok();
        self.advance(&mut state);
        dump
    }

    /// Marks the map dead and kills the underlying peer. Every later
    /// operation returns the failure value.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.dead = true;
        self.paxos.kill();
    }

    /// Gets `proposal` decided at some slot, resubmitting at a fresh
    /// one whenever a competing value wins, and returns the slot it
    /// finally won.
    async fn submit(&self, proposal: Proposal) -> i64 {
        loop {
            let seq = self.paxos.max() + 1;
            debug!("submitting {:?} for slot {}", proposal, seq);
            self.paxos.start(seq, proposal.clone());
            self.wait_decided(seq).await;
            if self.paxos.status(seq).as_ref() == Some(&proposal) {
                return seq;
            }
        }
    }

    /// Polls the decision for `seq` with a doubling backoff. Loops
    /// forever if a majority of peers stays unreachable.
    async fn wait_decided(&self, seq: i64) {
        let mut delay = WAIT_FLOOR;
        while self.paxos.status(seq).is_none() {
            tokio::time::sleep(delay).await;
            delay = std::cmp::min(delay * 2, WAIT_CEILING);
        }
    }

    /// Replays every decided slot below `seq` into the local map,
    /// forcing `Null` into any gap this replica has not yet learned.
    async fn catch_up(&self, state: &mut State, seq: i64) {
        while state.done < seq {
            let slot = state.done;
            if self.paxos.status(slot).is_none() {
                self.paxos.start(slot, Proposal::Null);
                self.wait_decided(slot).await;
            }
            if let Some(proposal) = self.paxos.status(slot) {
                debug!("replaying {:?} from slot {}", proposal, slot);
                apply(&mut state.data, proposal);
            }
            self.advance(state);
        }
    }

    /// Reports the slot just applied as done and moves the cursor.
    fn advance(&self, state: &mut State) {
        self.paxos.done(state.done);
        state.done += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay(log: &[Proposal]) -> Map<String, String> {
        let mut data = Map::default();
        for proposal in log {
            apply(&mut data, proposal.clone());
        }
        data
    }

    fn put(key: &str, value: &str) -> Proposal {
        Proposal::Put {
            key: key.to_owned(),
            value: value.to_owned(),
        }
    }

    #[test]
    fn apply_put_keeps_first_value() {
        let data = replay(&[put("a", "1"), put("a", "2")]);
        assert_eq!(data.get("a").map(String::as_str), Some("1"));
    }

    #[test]
    fn apply_update_requires_presence() {
        let data = replay(&[
            Proposal::Update {
                key: "a".to_owned(),
                value: "9".to_owned(),
            },
            put("a", "1"),
            Proposal::Update {
                key: "a".to_owned(),
                value: "2".to_owned(),
            },
        ]);
        assert_eq!(data.get("a").map(String::as_str), Some("2"));
    }

    #[test]
    fn apply_ignores_read_only_proposals() {
        let log = [
            put("a", "1"),
            Proposal::Get { key: "a".to_owned() },
            Proposal::Count,
            Proposal::Dump,
            Proposal::Null,
        ];
        assert_eq!(replay(&log), replay(&log[..1]));
    }

    #[test]
    fn replay_is_deterministic() {
        let log = [
            put("a", "1"),
            put("b", "2"),
            Proposal::Delete { key: "a".to_owned() },
            Proposal::Update {
                key: "b".to_owned(),
                value: "3".to_owned(),
            },
            put("a", "4"),
        ];
        assert_eq!(replay(&log), replay(&log));
        assert_eq!(replay(&log).len(), 2);
    }
}
