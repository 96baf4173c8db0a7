//! Error kinds for the failover transport core.
//!
//! Grounded on `cache/tiered.rs`'s `CacheError` (a `thiserror` enum with one
//! variant per externally observable failure mode, `#[error("...")]`
//! messages, no `anyhow` in the public surface).

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error kinds surfaced by the failover core.
#[derive(Debug, Clone, Error)]
pub enum FailoverError {
    /// The core is closed; any further operation fails immediately.
    #[error("transport disposed")]
    TransportDisposed,

    /// `oneway` blocked waiting for a connected transport past `timeout`.
    #[error("failover timeout of {0:?} reached")]
    FailoverTimeout(Duration),

    /// The reconnect attempt cap was reached; sticky until `close()`.
    #[error("connection failed permanently: {0}")]
    ConnectionFailure(Arc<FailoverError>),

    /// No factory is registered for the endpoint's scheme.
    #[error("no transport factory registered for scheme {0:?}")]
    InvalidEndpoint(String),

    /// Propagated from an underlying transport's `oneway`/`start`.
    #[error("transport io error: {0}")]
    TransportIo(String),

    /// Misuse: `oneway` before `start`, or an unsupported operation.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A configuration value failed validation; the prior value is kept.
    #[error("invalid configuration for {key}: {message}")]
    Configuration { key: &'static str, message: String },
}

impl FailoverError {
    pub fn transport_io(message: impl Into<String>) -> Self {
        FailoverError::TransportIo(message.into())
    }

    pub fn configuration(key: &'static str, message: impl Into<String>) -> Self {
        FailoverError::Configuration {
            key,
            message: message.into(),
        }
    }
}
