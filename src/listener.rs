//! Listener seams between an `UnderlyingTransport`, the failover core, and
//! whatever sits above the core (a connection, a protocol session).
//!
//! `heartbeat.rs`'s `Arc<AtomicI32>` counters plus a `RwLock<bool>` running
//! flag are the template for keeping a listener's state cheap to read from
//! many call sites without a lock around the whole struct — here, the
//! `disposed` flag that lets a retiring transport's late callbacks be
//! dropped instead of acted on.

use crate::command::Command;
use crate::core::Inner;
use crate::error::FailoverError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What sits above the failover core: receives inbound commands and is
/// told about connection lifecycle events.
#[async_trait]
pub trait TransportListener: Send + Sync {
    /// An inbound command arrived on the current connection.
    async fn on_command(&self, command: Command);

    /// The current connection was lost; a reconnect is now in progress.
    /// Fired at most once per connection loss, before the reconnect loop
    /// starts iterating candidates.
    async fn on_connection_interrupted(&self);

    /// A new connection was established after an interruption (not fired
    /// for the very first successful connect).
    async fn on_connection_restored(&self, remote_address: String);

    /// The core gave up permanently: the reconnect attempt cap was reached,
    /// or `close()` was called. No further callbacks follow.
    async fn on_failure(&self, error: FailoverError);
}

/// Installed on every `UnderlyingTransport` the reconnect worker creates.
/// Routes responses into the Request Map, server-directed control
/// commands into endpoint-pool mutation, transport failures into
/// reconnect, and everything else straight through to the upper listener.
///
/// `dispose` is called the moment a transport is retired (failure, close,
/// or losing a race against a faster reconnect candidate) so a callback
/// already in flight from that transport's own thread/task is dropped
/// rather than acted on twice.
pub struct InnerListener {
    inner: Arc<Inner>,
    disposed: AtomicBool,
}

impl InnerListener {
    pub fn new(inner: Arc<Inner>) -> Self {
        Self {
            inner,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportListener for InnerListener {
    async fn on_command(&self, command: Command) {
        if self.is_disposed() {
            return;
        }

        self.inner.mark_initialized().await;

        if command.is_response() {
            if let Some(id) = command.correlation_id {
                self.inner.process_response(id).await;
            }
        } else if command.is_connection_control() {
            if let Some(control) = command.control.clone() {
                self.inner.handle_connection_control(control).await;
            }
            return;
        }

        self.inner.upper_listener().await.on_command(command).await;
    }

    async fn on_connection_interrupted(&self) {
        if !self.is_disposed() {
            self.inner.upper_listener().await.on_connection_interrupted().await;
        }
    }

    async fn on_connection_restored(&self, remote_address: String) {
        if !self.is_disposed() {
            self.inner
                .upper_listener()
                .await
                .on_connection_restored(remote_address)
                .await;
        }
    }

    async fn on_failure(&self, error: FailoverError) {
        if self.is_disposed() {
            return;
        }
        self.inner.handle_transport_failure(error).await;
    }
}

/// A listener that drops every callback. Installed on backup-pool
/// transports that are never promoted, and as the core's default before
/// `set_listener` is first called.
pub struct DisposedListener;

#[async_trait]
impl TransportListener for DisposedListener {
    async fn on_command(&self, _command: Command) {}
    async fn on_connection_interrupted(&self) {}
    async fn on_connection_restored(&self, _remote_address: String) {}
    async fn on_failure(&self, _error: FailoverError) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disposed_listener_swallows_everything() {
        let listener = DisposedListener;
        listener
            .on_command(Command::new(crate::command::CommandKind::Other, bytes::Bytes::new()))
            .await;
        listener.on_connection_interrupted().await;
        listener.on_connection_restored("x".to_string()).await;
        listener.on_failure(FailoverError::TransportDisposed).await;
    }
}
