//! The Request Map — correlation-id indexed memory of in-flight commands,
//! used to replay unacknowledged sends onto a freshly connected transport.
//!
//! A `DashMap<u64, Command>` is the same shape `registry.rs` uses to map
//! conductor app ids to handles: many concurrent readers (the send path
//! inserting/removing) and one occasional bulk reader (the reconnect
//! worker snapshotting everything to replay) without a global lock.

use crate::command::Command;
use dashmap::DashMap;

/// Tracks commands sent while tracking is enabled for them, keyed by
/// correlation id, so they can be resent after the underlying transport
/// is replaced.
#[derive(Default)]
pub struct RequestMap {
    entries: DashMap<u64, Command>,
}

impl RequestMap {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Record a command pending response. Overwrites any prior entry with
    /// the same correlation id (a reused id is a caller bug, not ours to
    /// detect).
    pub fn insert(&self, correlation_id: u64, command: Command) {
        self.entries.insert(correlation_id, command);
    }

    /// Remove the entry for a correlation id, typically once its response
    /// arrives or it is judged stale on reconnect.
    pub fn remove(&self, correlation_id: u64) -> Option<Command> {
        self.entries.remove(&correlation_id).map(|(_, c)| c)
    }

    pub fn contains(&self, correlation_id: u64) -> bool {
        self.entries.contains_key(&correlation_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All currently tracked commands, in no particular order — the
    /// reconnect worker is responsible for any replay ordering it needs
    /// (state-tracker restoration commands are sent first, separately).
    pub fn snapshot(&self) -> Vec<Command> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use bytes::Bytes;

    fn cmd(id: u64) -> Command {
        Command::new(CommandKind::Other, Bytes::new()).with_correlation_id(id)
    }

    #[test]
    fn insert_and_remove_roundtrip() {
        let map = RequestMap::new();
        map.insert(1, cmd(1));
        assert!(map.contains(1));
        let removed = map.remove(1).unwrap();
        assert_eq!(removed.correlation_id, Some(1));
        assert!(!map.contains(1));
    }

    #[test]
    fn snapshot_returns_all_entries() {
        let map = RequestMap::new();
        map.insert(1, cmd(1));
        map.insert(2, cmd(2));
        let mut ids: Vec<u64> = map
            .snapshot()
            .into_iter()
            .map(|c| c.correlation_id.unwrap())
            .collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn clear_empties_the_map() {
        let map = RequestMap::new();
        map.insert(1, cmd(1));
        map.clear();
        assert!(map.is_empty());
    }
}
