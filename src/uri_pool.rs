//! The URI Pool — an ordered multiset of candidate endpoints.
//!
//! A single ordered `Vec` is the source of truth for every endpoint the
//! pool has ever seen, in insertion order. Membership in *available* vs.
//! *in-use* is tracked as a `HashSet` of excluded endpoints rather than as
//! two separate lists, so `return_all` rejoining endpoints in insertion
//! order falls out for free: an endpoint simply reappears at its original
//! position once it leaves the in-use set. A `pending_removal` set defers
//! an explicit `remove` of a currently in-use endpoint until it is
//! actually returned.
//!
//! Operations are synchronous and uncontended for short spans only (no
//! `.await` ever happens while holding the lock), so a plain `std::sync::Mutex`
//! is used rather than `tokio::sync::Mutex` — the same call made for the
//! per-conductor bookkeeping in `conductor/pool_map.rs`, which guards its
//! `DashMap` with no held lock across awaits either.

use crate::endpoint::Endpoint;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    /// Every known endpoint, in first-add order.
    all: Vec<Endpoint>,
    /// Endpoints currently excluded from selection (in use).
    in_use: HashSet<Endpoint>,
    /// Endpoints marked preferred.
    priority: HashSet<Endpoint>,
    /// `remove()` calls against an in-use endpoint, applied on return.
    pending_removal: HashSet<Endpoint>,
    randomize: bool,
}

/// Ordered multiset of candidate endpoints with priority, randomization,
/// and safe runtime mutation.
pub struct UriPool {
    state: Mutex<State>,
}

impl Default for UriPool {
    fn default() -> Self {
        Self::new()
    }
}

impl UriPool {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Add an endpoint. Idempotent.
    pub fn add(&self, endpoint: Endpoint) {
        let mut s = self.state.lock().unwrap();
        if !s.all.contains(&endpoint) {
            s.all.push(endpoint);
        }
    }

    /// Add an endpoint as a priority candidate.
    pub fn add_priority(&self, endpoint: Endpoint) {
        let mut s = self.state.lock().unwrap();
        if !s.all.contains(&endpoint) {
            s.all.push(endpoint.clone());
        }
        s.priority.insert(endpoint);
    }

    pub fn add_all(&self, endpoints: impl IntoIterator<Item = Endpoint>) {
        for e in endpoints {
            self.add(e);
        }
    }

    /// Remove an endpoint. If it is currently in use, exclusion is deferred
    /// until it is returned via `return_all`.
    pub fn remove(&self, endpoint: &Endpoint) {
        let mut s = self.state.lock().unwrap();
        if s.in_use.contains(endpoint) {
            s.pending_removal.insert(endpoint.clone());
        } else {
            s.all.retain(|e| e != endpoint);
            s.priority.remove(endpoint);
        }
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.state.lock().unwrap().all.contains(endpoint)
    }

    pub fn is_priority(&self, endpoint: &Endpoint) -> bool {
        self.state.lock().unwrap().priority.contains(endpoint)
    }

    pub fn set_randomize(&self, randomize: bool) {
        self.state.lock().unwrap().randomize = randomize;
    }

    /// Atomically move an endpoint from *available* to *in-use* and return
    /// it. `None` when no endpoint is available.
    ///
    /// When randomization is on, the endpoint is chosen uniformly from the
    /// highest-priority non-empty tier of the available set; otherwise FIFO
    /// within that tier.
    pub fn take(&self) -> Option<Endpoint> {
        let mut s = self.state.lock().unwrap();

        let available: Vec<Endpoint> = s
            .all
            .iter()
            .filter(|e| !s.in_use.contains(*e))
            .cloned()
            .collect();
        if available.is_empty() {
            return None;
        }

        let priority_tier: Vec<Endpoint> = available
            .iter()
            .filter(|e| s.priority.contains(*e))
            .cloned()
            .collect();
        let tier = if priority_tier.is_empty() {
            available
        } else {
            priority_tier
        };

        let chosen = if s.randomize {
            tier.choose(&mut rand::thread_rng()).cloned().unwrap()
        } else {
            tier.into_iter().next().unwrap()
        };

        s.in_use.insert(chosen.clone());
        Some(chosen)
    }

    /// Return endpoints to *available*, in the order given. An endpoint
    /// marked for removal while in use is dropped entirely instead of
    /// rejoining the pool.
    pub fn return_all(&self, endpoints: impl IntoIterator<Item = Endpoint>) {
        let mut s = self.state.lock().unwrap();
        for e in endpoints {
            s.in_use.remove(&e);
            if s.pending_removal.remove(&e) {
                s.all.retain(|x| x != &e);
                s.priority.remove(&e);
            }
        }
    }

    pub fn clear(&self) {
        let mut s = self.state.lock().unwrap();
        *s = State {
            randomize: s.randomize,
            ..State::default()
        };
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
