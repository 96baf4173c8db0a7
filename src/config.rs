//! Runtime-tunable configuration for a failover transport instance.
//!
//! Every option is its own atomic rather than one struct behind a single
//! lock, the same choice `hosts/heartbeat.rs` makes for its running flags
//! and counters: readers on the send path and the reconnect worker never
//! block a caller updating one setting, and vice versa. Invalid values
//! are rejected and leave the previous value in place rather than
//! panicking, matching the `Result<(), String>` style of `Args::validate`.

use crate::error::FailoverError;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

pub struct FailoverConfig {
    timeout_ms: AtomicI64,
    initial_reconnect_delay_ms: AtomicU64,
    max_reconnect_delay_ms: AtomicU64,
    backoff_multiplier_bits: AtomicU64,
    use_exponential_backoff: AtomicBool,
    max_reconnect_attempts: AtomicU32,
    startup_max_reconnect_attempts: AtomicU32,
    randomize: AtomicBool,
    track_messages: AtomicBool,
    track_transaction_producers: AtomicBool,
    max_cache_size: AtomicU64,
    reconnect_supported: AtomicBool,
    update_uris_supported: AtomicBool,
    rebalance_update_uris: AtomicBool,
    priority_backup: AtomicBool,
    backup: AtomicBool,
    backup_pool_size: AtomicU64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            timeout_ms: AtomicI64::new(-1),
            initial_reconnect_delay_ms: AtomicU64::new(10),
            max_reconnect_delay_ms: AtomicU64::new(30_000),
            backoff_multiplier_bits: AtomicU64::new(2.0_f64.to_bits()),
            use_exponential_backoff: AtomicBool::new(true),
            max_reconnect_attempts: AtomicU32::new(0),
            startup_max_reconnect_attempts: AtomicU32::new(0),
            randomize: AtomicBool::new(true),
            track_messages: AtomicBool::new(true),
            track_transaction_producers: AtomicBool::new(true),
            max_cache_size: AtomicU64::new(131_072),
            reconnect_supported: AtomicBool::new(true),
            update_uris_supported: AtomicBool::new(true),
            rebalance_update_uris: AtomicBool::new(true),
            priority_backup: AtomicBool::new(false),
            backup: AtomicBool::new(false),
            backup_pool_size: AtomicU64::new(1),
        }
    }
}

impl FailoverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Max time `oneway` waits for a connected transport. `None` means
    /// wait forever.
    pub fn timeout(&self) -> Option<Duration> {
        let ms = self.timeout_ms.load(Ordering::Relaxed);
        if ms < 0 {
            None
        } else {
            Some(Duration::from_millis(ms as u64))
        }
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) {
        let ms = timeout.map(|d| d.as_millis() as i64).unwrap_or(-1);
        self.timeout_ms.store(ms, Ordering::Relaxed);
    }

    pub fn initial_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.initial_reconnect_delay_ms.load(Ordering::Relaxed))
    }

    pub fn set_initial_reconnect_delay(&self, delay: Duration) -> Result<(), FailoverError> {
        if delay.is_zero() {
            return Err(FailoverError::configuration(
                "initial-reconnect-delay",
                "must be greater than zero",
            ));
        }
        self.initial_reconnect_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
        Ok(())
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms.load(Ordering::Relaxed))
    }

    pub fn set_max_reconnect_delay(&self, delay: Duration) -> Result<(), FailoverError> {
        if delay.is_zero() {
            return Err(FailoverError::configuration(
                "max-reconnect-delay",
                "must be greater than zero",
            ));
        }
        self.max_reconnect_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
        Ok(())
    }

    pub fn backoff_multiplier(&self) -> f64 {
        f64::from_bits(self.backoff_multiplier_bits.load(Ordering::Relaxed))
    }

    pub fn set_backoff_multiplier(&self, multiplier: f64) -> Result<(), FailoverError> {
        if !(multiplier > 1.0) {
            return Err(FailoverError::configuration(
                "backoff-multiplier",
                "must be greater than 1.0",
            ));
        }
        self.backoff_multiplier_bits
            .store(multiplier.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn use_exponential_backoff(&self) -> bool {
        self.use_exponential_backoff.load(Ordering::Relaxed)
    }

    pub fn set_use_exponential_backoff(&self, enabled: bool) {
        self.use_exponential_backoff.store(enabled, Ordering::Relaxed);
    }

    /// 0 means unlimited.
    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts.load(Ordering::Relaxed)
    }

    pub fn set_max_reconnect_attempts(&self, attempts: u32) {
        self.max_reconnect_attempts.store(attempts, Ordering::Relaxed);
    }

    /// 0 means: fall back to `max_reconnect_attempts`.
    pub fn startup_max_reconnect_attempts(&self) -> u32 {
        self.startup_max_reconnect_attempts.load(Ordering::Relaxed)
    }

    pub fn set_startup_max_reconnect_attempts(&self, attempts: u32) {
        self.startup_max_reconnect_attempts
            .store(attempts, Ordering::Relaxed);
    }

    pub fn randomize(&self) -> bool {
        self.randomize.load(Ordering::Relaxed)
    }

    pub fn set_randomize(&self, randomize: bool) {
        self.randomize.store(randomize, Ordering::Relaxed);
    }

    pub fn track_messages(&self) -> bool {
        self.track_messages.load(Ordering::Relaxed)
    }

    pub fn set_track_messages(&self, track: bool) {
        self.track_messages.store(track, Ordering::Relaxed);
    }

    pub fn track_transaction_producers(&self) -> bool {
        self.track_transaction_producers.load(Ordering::Relaxed)
    }

    pub fn set_track_transaction_producers(&self, track: bool) {
        self.track_transaction_producers.store(track, Ordering::Relaxed);
    }

    pub fn max_cache_size(&self) -> u64 {
        self.max_cache_size.load(Ordering::Relaxed)
    }

    pub fn set_max_cache_size(&self, size: u64) {
        self.max_cache_size.store(size, Ordering::Relaxed);
    }

    pub fn reconnect_supported(&self) -> bool {
        self.reconnect_supported.load(Ordering::Relaxed)
    }

    pub fn set_reconnect_supported(&self, supported: bool) {
        self.reconnect_supported.store(supported, Ordering::Relaxed);
    }

    pub fn update_uris_supported(&self) -> bool {
        self.update_uris_supported.load(Ordering::Relaxed)
    }

    pub fn set_update_uris_supported(&self, supported: bool) {
        self.update_uris_supported.store(supported, Ordering::Relaxed);
    }

    pub fn rebalance_update_uris(&self) -> bool {
        self.rebalance_update_uris.load(Ordering::Relaxed)
    }

    pub fn set_rebalance_update_uris(&self, rebalance: bool) {
        self.rebalance_update_uris.store(rebalance, Ordering::Relaxed);
    }

    pub fn priority_backup(&self) -> bool {
        self.priority_backup.load(Ordering::Relaxed)
    }

    pub fn set_priority_backup(&self, priority_backup: bool) {
        self.priority_backup.store(priority_backup, Ordering::Relaxed);
    }

    pub fn backup(&self) -> bool {
        self.backup.load(Ordering::Relaxed)
    }

    pub fn set_backup(&self, enabled: bool) {
        self.backup.store(enabled, Ordering::Relaxed);
    }

    pub fn backup_pool_size(&self) -> u64 {
        self.backup_pool_size.load(Ordering::Relaxed)
    }

    pub fn set_backup_pool_size(&self, size: u64) -> Result<(), FailoverError> {
        if size == 0 {
            return Err(FailoverError::configuration(
                "backup-pool-size",
                "must be at least 1",
            ));
        }
        self.backup_pool_size.store(size, Ordering::Relaxed);
        Ok(())
    }
}
