//! The state-tracker seam: an external collaborator that remembers enough
//! protocol state (consumers, producers, sessions, transactions) to replay
//! it onto a freshly connected transport, and to judge which in-flight
//! commands are still worth retransmitting after a reconnect.
//!
//! The failover core treats this purely as a trait object, the same way
//! `admin_client.rs` treats the conductor connection as an opaque
//! request/response channel rather than inlining protocol knowledge.

use crate::command::Command;
use crate::error::FailoverError;
use async_trait::async_trait;

/// Bookkeeping a tracked command carries once handed to a `StateTracker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracked {
    /// The tracker recorded this command and will replay it on reconnect.
    Yes,
    /// The tracker has no interest in this command; it is not replayed.
    No,
}

/// External collaborator owning protocol-level replay state.
///
/// Implementations are expected to be cheap to call and non-blocking;
/// the failover core calls `track` and `restore` while holding internal
/// locks briefly, matching how `registry.rs`'s lookups are expected to be
/// near-instant `DashMap` reads.
#[async_trait]
pub trait StateTracker: Send + Sync {
    /// Offer a command to the tracker. Returns whether the tracker chose
    /// to track it (and therefore expects it to survive into `restore`).
    fn track(&self, command: &Command) -> Tracked;

    /// Let the tracker see a response command, in case it correlates with
    /// tracked state (e.g. a consumer-id allocation response).
    fn track_response(&self, command: &Command);

    /// Produce the commands needed to recreate tracked protocol state on a
    /// newly connected transport, in the order they must be sent.
    async fn restore(&self) -> Result<Vec<Command>, FailoverError>;

    /// Drop all tracked state. Called when the core is disposed.
    fn clear(&self);

    fn set_track_messages(&self, track: bool);
    fn set_max_cache_size(&self, size: usize);
    fn set_track_transaction_producers(&self, track: bool);
}

/// A `StateTracker` that tracks nothing and restores nothing. The default
/// when the caller has no session/consumer state worth replaying.
#[derive(Default)]
pub struct NullStateTracker;

#[async_trait]
impl StateTracker for NullStateTracker {
    fn track(&self, _command: &Command) -> Tracked {
        Tracked::No
    }

    fn track_response(&self, _command: &Command) {}

    async fn restore(&self) -> Result<Vec<Command>, FailoverError> {
        Ok(Vec::new())
    }

    fn clear(&self) {}

    fn set_track_messages(&self, _track: bool) {}
    fn set_max_cache_size(&self, _size: usize) {}
    fn set_track_transaction_producers(&self, _track: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::command::CommandKind;

    #[tokio::test]
    async fn null_tracker_tracks_nothing_and_restores_empty() {
        let tracker = NullStateTracker;
        let cmd = Command::new(CommandKind::Other, Bytes::new());
        assert_eq!(tracker.track(&cmd), Tracked::No);
        assert!(tracker.restore().await.unwrap().is_empty());
    }
}
