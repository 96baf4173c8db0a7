//! The underlying transport seam and its factory registry.
//!
//! The failover core never speaks a wire protocol itself; it drives
//! whatever `UnderlyingTransport` a registered `TransportFactory` hands
//! back for a given endpoint's scheme. This mirrors the way
//! `conductor/admin_client.rs` treats a conductor connection as an opaque
//! request/response channel, and the way `registry.rs` keys its `DashMap`
//! by a string identifier rather than a typed enum — here the key is the
//! endpoint scheme (`tcp`, `ssl`, `ws`, ...).

use crate::command::Command;
use crate::endpoint::Endpoint;
use crate::error::FailoverError;
use crate::listener::TransportListener;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// A single physical connection to one broker endpoint.
///
/// Implementations own the socket/codec and report failures by invoking
/// the listener installed with `set_listener` — the core never polls a
/// transport for liveness, it only reacts to callbacks.
#[async_trait]
pub trait UnderlyingTransport: Send + Sync {
    /// Begin connecting. Must not block past what the implementation's own
    /// connect timeout allows; a hung connect attempt is the implementation's
    /// responsibility to bound.
    async fn start(&self) -> Result<(), FailoverError>;

    /// Tear the connection down. Idempotent.
    async fn close(&self) -> Result<(), FailoverError>;

    /// Send a command without waiting for a reply. A transport-level
    /// failure here is what triggers the core's reconnect path.
    async fn oneway(&self, command: Command) -> Result<(), FailoverError>;

    /// Install the listener that receives inbound commands and failure
    /// notifications for this transport.
    fn set_listener(&self, listener: Arc<dyn TransportListener>);

    /// The negotiated remote address, once connected.
    fn remote_address(&self) -> Option<String>;

    /// Whether this is a fault-tolerant transport in its own right (e.g. a
    /// nested failover transport used as a backup candidate).
    fn is_fault_tolerant(&self) -> bool {
        false
    }
}

/// Builds an `UnderlyingTransport` for one endpoint.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Construct (but do not start) a transport bound to `endpoint`.
    async fn create_transport(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Arc<dyn UnderlyingTransport>, FailoverError>;
}

/// Scheme → factory lookup table.
///
/// A `DashMap` keyed by scheme string, the same shape `registry.rs` uses
/// to key conductor handles by app id — reads never block writers and
/// vice versa, which matters here since registration can race the
/// reconnect worker's first `take()`.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: DashMap<String, Arc<dyn TransportFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// Register (or replace) the factory for a scheme.
    pub fn register(&self, scheme: impl Into<String>, factory: Arc<dyn TransportFactory>) {
        self.factories.insert(scheme.into(), factory);
    }

    pub fn unregister(&self, scheme: &str) {
        self.factories.remove(scheme);
    }

    /// Build a transport for `endpoint` via the factory registered for its
    /// scheme, or `InvalidEndpoint` if none is registered.
    pub async fn create(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Arc<dyn UnderlyingTransport>, FailoverError> {
        let factory = self
            .factories
            .get(endpoint.scheme())
            .ok_or_else(|| FailoverError::InvalidEndpoint(endpoint.scheme().to_string()))?
            .clone();
        factory.create_transport(endpoint).await
    }

    pub fn has_scheme(&self, scheme: &str) -> bool {
        self.factories.contains_key(scheme)
    }
}
