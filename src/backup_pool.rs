//! The Backup Pool — a small number of pre-started, already-connected
//! spare transports kept warm so a failover can hand one to the caller
//! immediately instead of waiting out a fresh connect.
//!
//! Modeled on `worker/pool.rs`'s idle-worker bookkeeping: a bounded set of
//! ready-to-use handles, topped up by a background task rather than on
//! the hot path.

use crate::endpoint::Endpoint;
use crate::transport::UnderlyingTransport;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One pre-connected spare transport, paired with the endpoint it was
/// built for so it can be excluded from/returned to the URI Pool
/// correctly if it is never promoted.
pub struct BackupTransport {
    pub endpoint: Endpoint,
    pub transport: Arc<dyn UnderlyingTransport>,
}

/// Holds up to `size` pre-connected spares.
pub struct BackupPool {
    enabled: AtomicBool,
    size: AtomicUsize,
    priority_backup: AtomicBool,
    spares: Mutex<Vec<BackupTransport>>,
}

impl Default for BackupPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupPool {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            size: AtomicUsize::new(1),
            priority_backup: AtomicBool::new(false),
            spares: Mutex::new(Vec::new()),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_size(&self, size: usize) {
        self.size.store(size, Ordering::SeqCst);
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// When set, the backup worker only keeps priority endpoints warm,
    /// reconnecting to a higher-priority endpoint as soon as one frees up
    /// rather than sticking with a non-priority spare.
    pub fn set_priority_backup(&self, priority_backup: bool) {
        self.priority_backup.store(priority_backup, Ordering::SeqCst);
    }

    pub fn wants_priority_only(&self) -> bool {
        self.priority_backup.load(Ordering::SeqCst)
    }

    /// Number of currently warm spares.
    pub async fn len(&self) -> usize {
        self.spares.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// How many more spares are needed to reach `size`.
    pub async fn deficit(&self) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        self.size().saturating_sub(self.len().await)
    }

    /// Add a freshly connected spare, dropping the oldest if this would
    /// exceed `size` (the newest connection is assumed the most likely to
    /// still be healthy). Returns any spares evicted to make room; the
    /// caller is responsible for closing their transports and returning
    /// their endpoints to the URI pool.
    pub async fn push(&self, spare: BackupTransport) -> Vec<BackupTransport> {
        let mut spares = self.spares.lock().await;
        spares.push(spare);
        let size = self.size();
        let mut evicted = Vec::new();
        while spares.len() > size {
            evicted.push(spares.remove(0));
        }
        evicted
    }

    /// Hand over the first available spare, removing it from the pool.
    pub async fn take(&self) -> Option<BackupTransport> {
        let mut spares = self.spares.lock().await;
        if spares.is_empty() {
            None
        } else {
            Some(spares.remove(0))
        }
    }

    /// Remove and return every spare, e.g. to close them all on dispose.
    pub async fn drain(&self) -> Vec<BackupTransport> {
        std::mem::take(&mut *self.spares.lock().await)
    }

    /// Endpoints currently held as spares, so the reconnect worker can
    /// avoid redundantly connecting to one already warm.
    pub async fn held_endpoints(&self) -> Vec<Endpoint> {
        self.spares
            .lock()
            .await
            .iter()
            .map(|s| s.endpoint.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::error::FailoverError;
    use crate::listener::TransportListener;
    use async_trait::async_trait;

    struct StubTransport;

    #[async_trait]
    impl UnderlyingTransport for StubTransport {
        async fn start(&self) -> Result<(), FailoverError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), FailoverError> {
            Ok(())
        }
        async fn oneway(&self, _command: Command) -> Result<(), FailoverError> {
            Ok(())
        }
        fn set_listener(&self, _listener: Arc<dyn TransportListener>) {}
        fn remote_address(&self) -> Option<String> {
            None
        }
    }

    fn spare(uri: &str) -> BackupTransport {
        BackupTransport {
            endpoint: Endpoint::parse(uri).unwrap(),
            transport: Arc::new(StubTransport),
        }
    }

    #[tokio::test]
    async fn deficit_is_zero_when_disabled() {
        let pool = BackupPool::new();
        pool.set_size(2);
        assert_eq!(pool.deficit().await, 0);
    }

    #[tokio::test]
    async fn deficit_tracks_size_minus_current() {
        let pool = BackupPool::new();
        pool.set_enabled(true);
        pool.set_size(2);
        assert_eq!(pool.deficit().await, 2);
        pool.push(spare("tcp://a:1")).await;
        assert_eq!(pool.deficit().await, 1);
    }

    #[tokio::test]
    async fn push_evicts_oldest_past_capacity() {
        let pool = BackupPool::new();
        pool.set_enabled(true);
        pool.set_size(1);
        assert!(pool.push(spare("tcp://a:1")).await.is_empty());
        let evicted = pool.push(spare("tcp://b:1")).await;
        assert_eq!(pool.len().await, 1);
        let remaining = pool.held_endpoints().await;
        assert_eq!(remaining[0].as_str(), "tcp://b:1");
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].endpoint.as_str(), "tcp://a:1");
    }

    #[tokio::test]
    async fn take_removes_and_returns_a_spare() {
        let pool = BackupPool::new();
        pool.set_enabled(true);
        pool.set_size(1);
        pool.push(spare("tcp://a:1")).await;
        let taken = pool.take().await;
        assert!(taken.is_some());
        assert!(pool.is_empty().await);
    }
}
