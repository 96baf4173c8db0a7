//! The failover core façade: the public transport clients actually hold.
//!
//! State lives in three independently lockable pieces, with a strict lock
//! order of *listener* < *reconnect* < *request-map* to prevent deadlock
//! across the façade, the reconnect worker, and the inner listener.
//! `heartbeat.rs`'s split between
//! atomics for hot flags and an `RwLock` for the rarer listener-swap is the
//! direct template for the split here between `AtomicBool`s on `Inner`
//! and the `tokio::sync::RwLock` around the upper listener.

use crate::backup_pool::BackupPool;
use crate::close_worker::CloseTransportsWorker;
use crate::command::Command;
use crate::config::FailoverConfig;
use crate::endpoint::Endpoint;
use crate::error::FailoverError;
use crate::listener::{DisposedListener, InnerListener, TransportListener};
use crate::reconnect_worker;
use crate::request_map::RequestMap;
use crate::state_tracker::{NullStateTracker, StateTracker, Tracked};
use crate::transport::{FactoryRegistry, UnderlyingTransport};
use crate::uri_pool::UriPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

/// Mutable core state, guarded by the *reconnect* lock. Held only across
/// synchronous state inspection/mutation, never across an `.await` on an
/// underlying transport call.
pub(crate) struct ReconnectState {
    pub connected: bool,
    pub initialized: bool,
    pub first_connection: bool,
    pub connect_failures: u32,
    pub reconnect_delay: Duration,
    pub connection_failure: Option<FailoverError>,
    pub connected_transport: Option<Arc<dyn UnderlyingTransport>>,
    pub connected_endpoint: Option<Endpoint>,
    pub connected_listener: Option<Arc<InnerListener>>,
    pub rebalance_requested: bool,
}

impl ReconnectState {
    fn new(initial_delay: Duration) -> Self {
        Self {
            connected: false,
            initialized: false,
            first_connection: true,
            connect_failures: 0,
            reconnect_delay: initial_delay,
            connection_failure: None,
            connected_transport: None,
            connected_endpoint: None,
            connected_listener: None,
            rebalance_requested: false,
        }
    }
}

pub(crate) struct Inner {
    pub config: FailoverConfig,
    pub uri_pool: UriPool,
    pub registry: FactoryRegistry,
    pub backup_pool: BackupPool,
    pub request_map: RequestMap,
    pub state_tracker: Arc<dyn StateTracker>,
    pub close_worker: Arc<CloseTransportsWorker>,

    pub listener: RwLock<Arc<dyn TransportListener>>,
    pub reconnect_state: Mutex<ReconnectState>,

    /// Signals the reconnect worker: new endpoint, rebalance request,
    /// transport failure, or close.
    pub reconnect_notify: Notify,
    /// Signals `oneway` waiters that connection state may have changed.
    pub connect_notify: Notify,
    /// Interrupts an in-progress backoff sleep.
    pub sleep_notify: Notify,

    pub closed: AtomicBool,
    pub started: AtomicBool,

    /// The most recent broker-supplied connected-endpoints list, used to
    /// diff against the next server-directed update.
    pub last_broker_update: Mutex<Vec<Endpoint>>,

    /// Sent first on every freshly restored transport, before state
    /// tracker replay. `None` skips self-identification.
    pub identify_command: Option<Command>,
}

impl Inner {
    fn new(config: FailoverConfig, registry: FactoryRegistry, state_tracker: Arc<dyn StateTracker>) -> Arc<Self> {
        let initial_delay = config.initial_reconnect_delay();
        Arc::new(Self {
            config,
            uri_pool: UriPool::new(),
            registry,
            backup_pool: BackupPool::new(),
            request_map: RequestMap::new(),
            state_tracker,
            close_worker: CloseTransportsWorker::start(),
            listener: RwLock::new(Arc::new(DisposedListener)),
            reconnect_state: Mutex::new(ReconnectState::new(initial_delay)),
            reconnect_notify: Notify::new(),
            connect_notify: Notify::new(),
            sleep_notify: Notify::new(),
            closed: AtomicBool::new(false),
            started: AtomicBool::new(false),
            last_broker_update: Mutex::new(Vec::new()),
            identify_command: None,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn upper_listener(&self) -> Arc<dyn TransportListener> {
        self.listener.read().await.clone()
    }

    /// Swap out the active transport, detach its listener, hand it to the
    /// close worker, return its endpoint, and wake the reconnect worker.
    /// Shared by the send path (on an IO failure) and the inner listener
    /// (on an `on_exception` callback from the active transport).
    pub(crate) async fn handle_transport_failure(self: &Arc<Self>, error: FailoverError) {
        let retired = {
            let mut state = self.reconnect_state.lock().await;
            let transport = state.connected_transport.take();
            let endpoint = state.connected_endpoint.take();
            let listener = state.connected_listener.take();
            state.connected = false;
            state.initialized = false;
            (transport, endpoint, listener)
        };

        if let Some(listener) = retired.2 {
            listener.dispose();
        }
        if let Some(transport) = retired.0 {
            transport.set_listener(Arc::new(DisposedListener));
            self.close_worker.enqueue(transport);
        }
        if let Some(endpoint) = retired.1 {
            self.uri_pool.return_all(vec![endpoint]);
        }

        self.state_tracker.clear();
        self.upper_listener().await.on_connection_interrupted().await;
        tracing::debug!(error = %error, "transport failure; reconnect worker woken");

        if self.started.load(Ordering::SeqCst) {
            self.reconnect_notify.notify_one();
        }
    }

    /// Called by the inner listener when a response command arrives on
    /// the active transport.
    pub(crate) async fn process_response(&self, correlation_id: u64) {
        self.request_map.remove(correlation_id);
    }

    /// Marks the core initialized the first time any command arrives on a
    /// connected transport, per the original's `initialized` flag.
    pub(crate) async fn mark_initialized(&self) {
        let mut state = self.reconnect_state.lock().await;
        state.initialized = true;
    }

    /// If `rebalance`, retire the current transport so the worker selects
    /// anew; always wakes the worker.
    pub(crate) async fn reconnect(self: &Arc<Self>, rebalance: bool) {
        if rebalance {
            let retired = {
                let mut state = self.reconnect_state.lock().await;
                if state.connected_transport.is_none() {
                    state.rebalance_requested = true;
                    None
                } else {
                    state.rebalance_requested = true;
                    let transport = state.connected_transport.take();
                    let endpoint = state.connected_endpoint.take();
                    let listener = state.connected_listener.take();
                    state.connected = false;
                    Some((transport, endpoint, listener))
                }
            };
            if let Some((transport, endpoint, listener)) = retired {
                if let Some(listener) = listener {
                    listener.dispose();
                }
                if let Some(transport) = transport {
                    transport.set_listener(Arc::new(DisposedListener));
                    self.close_worker.enqueue(transport);
                }
                if let Some(endpoint) = endpoint {
                    self.uri_pool.return_all(vec![endpoint]);
                }
                self.upper_listener().await.on_connection_interrupted().await;
            }
        }
        self.reconnect_notify.notify_one();
    }

    pub(crate) async fn reconnect_to(self: &Arc<Self>, endpoint: Endpoint) {
        self.uri_pool.add(endpoint);
        self.reconnect(true).await;
    }

    /// Server-directed control handling.
    pub(crate) async fn handle_connection_control(
        self: &Arc<Self>,
        control: crate::command::ConnectionControl,
    ) {
        if let Some(target) = control.reconnect_to {
            if self.config.reconnect_supported() {
                self.reconnect_to(target).await;
                return;
            }
        }

        if let Some(connected_brokers) = control.connected_brokers {
            if self.config.update_uris_supported() {
                let mut last = self.last_broker_update.lock().await;
                let added: Vec<Endpoint> = connected_brokers
                    .iter()
                    .filter(|e| !last.contains(e))
                    .cloned()
                    .collect();
                let removed: Vec<Endpoint> = last
                    .iter()
                    .filter(|e| !connected_brokers.contains(e))
                    .cloned()
                    .collect();
                *last = connected_brokers;
                drop(last);

                for e in &removed {
                    self.uri_pool.remove(e);
                }
                for e in added {
                    self.uri_pool.add(e);
                }

                let should_rebalance = control.rebalance && self.config.rebalance_update_uris();
                if should_rebalance {
                    self.reconnect(true).await;
                } else if !removed.is_empty() {
                    self.reconnect_notify.notify_one();
                }
            }
        }
    }
}

/// The public transport façade: start/close, send, listener wiring,
/// endpoint mutation, and reconnect control.
pub struct FailoverTransport {
    pub(crate) inner: Arc<Inner>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl FailoverTransport {
    pub fn new(
        config: FailoverConfig,
        registry: FactoryRegistry,
        state_tracker: Arc<dyn StateTracker>,
    ) -> Self {
        Self {
            inner: Inner::new(config, registry, state_tracker),
            worker_handle: Mutex::new(None),
        }
    }

    /// Convenience constructor with no protocol-state replay.
    pub fn with_defaults(config: FailoverConfig, registry: FactoryRegistry) -> Self {
        Self::new(config, registry, Arc::new(NullStateTracker))
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.inner.config
    }

    pub fn uri_pool(&self) -> &UriPool {
        &self.inner.uri_pool
    }

    /// Forwards `track-messages` to both the config and the configured
    /// `StateTracker`, per the original's constructor-time passthrough.
    pub fn set_track_messages(&self, track: bool) {
        self.inner.config.set_track_messages(track);
        self.inner.state_tracker.set_track_messages(track);
    }

    /// Forwards `track-transaction-producers` to both the config and the
    /// configured `StateTracker`.
    pub fn set_track_transaction_producers(&self, track: bool) {
        self.inner.config.set_track_transaction_producers(track);
        self.inner.state_tracker.set_track_transaction_producers(track);
    }

    /// Forwards `max-cache-size` to both the config and the configured
    /// `StateTracker`.
    pub fn set_max_cache_size(&self, size: u64) {
        self.inner.config.set_max_cache_size(size);
        self.inner.state_tracker.set_max_cache_size(size as usize);
    }

    /// Enables or disables the Backup Pool, draining it immediately when
    /// disabled.
    pub async fn set_backup(&self, enabled: bool) {
        self.inner.config.set_backup(enabled);
        self.inner.backup_pool.set_enabled(enabled);
        if !enabled {
            for spare in self.inner.backup_pool.drain().await {
                self.inner.close_worker.enqueue(spare.transport);
                self.inner.uri_pool.return_all(vec![spare.endpoint]);
            }
        } else {
            self.inner.reconnect_notify.notify_one();
        }
    }

    /// Forwards `randomize` to both the config and the URI Pool, which is
    /// what `take()` actually consults.
    pub fn set_randomize(&self, randomize: bool) {
        self.inner.config.set_randomize(randomize);
        self.inner.uri_pool.set_randomize(randomize);
    }

    pub fn set_priority_backup(&self, priority_backup: bool) {
        self.inner.config.set_priority_backup(priority_backup);
        self.inner.backup_pool.set_priority_backup(priority_backup);
    }

    pub fn set_backup_pool_size(&self, size: u64) -> Result<(), FailoverError> {
        self.inner.config.set_backup_pool_size(size)?;
        self.inner.backup_pool.set_size(size as usize);
        Ok(())
    }

    /// Synchronous request/response is not supported at this layer; upper
    /// layers must supply their own correlation over `oneway`/`set_listener`.
    pub async fn request(&self, _command: Command) -> Result<Command, FailoverError> {
        Err(FailoverError::IllegalState(
            "synchronous request/response is not supported by the failover core".into(),
        ))
    }

    /// Idempotent. Starts the reconnect worker and (if enabled) primes the
    /// backup pool, then kicks off an initial connection attempt.
    pub async fn start(&self) -> Result<(), FailoverError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(FailoverError::TransportDisposed);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.uri_pool.set_randomize(self.inner.config.randomize());
        self.inner.backup_pool.set_enabled(self.inner.config.backup());
        self.inner.backup_pool.set_size(self.inner.config.backup_pool_size() as usize);
        self.inner.backup_pool.set_priority_backup(self.inner.config.priority_backup());
        self.inner.state_tracker.set_track_messages(self.inner.config.track_messages());
        self.inner
            .state_tracker
            .set_track_transaction_producers(self.inner.config.track_transaction_producers());
        self.inner
            .state_tracker
            .set_max_cache_size(self.inner.config.max_cache_size() as usize);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            reconnect_worker::run(inner).await;
        });
        *self.worker_handle.lock().await = Some(handle);

        self.inner.reconnect_notify.notify_one();
        Ok(())
    }

    /// Idempotent. Tears everything down; safe to call more than once.
    pub async fn close(&self) -> Result<(), FailoverError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.backup_pool.set_enabled(false);
        for spare in self.inner.backup_pool.drain().await {
            self.inner.close_worker.enqueue(spare.transport);
            self.inner.uri_pool.return_all(vec![spare.endpoint]);
        }

        let (current, listener) = {
            let mut state = self.inner.reconnect_state.lock().await;
            state.connected = false;
            state.connected_endpoint = None;
            state.connection_failure = Some(FailoverError::TransportDisposed);
            (state.connected_transport.take(), state.connected_listener.take())
        };
        if let Some(listener) = listener {
            listener.dispose();
        }
        if let Some(transport) = current {
            transport.set_listener(Arc::new(DisposedListener));
            self.inner.close_worker.enqueue(transport);
        }

        self.inner.request_map.clear();
        self.inner.state_tracker.clear();

        self.inner.reconnect_notify.notify_waiters();
        self.inner.sleep_notify.notify_waiters();
        self.inner.connect_notify.notify_waiters();

        if let Some(handle) = self.worker_handle.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        self.inner.close_worker.shutdown().await;
        Ok(())
    }

    pub async fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        *self.inner.listener.write().await = listener;
    }

    pub async fn get_listener(&self) -> Arc<dyn TransportListener> {
        self.inner.upper_listener().await
    }

    pub fn add_endpoint(&self, endpoint: Endpoint) {
        self.inner.uri_pool.add(endpoint);
        self.inner.reconnect_notify.notify_one();
    }

    pub async fn add_endpoints(&self, endpoints: Vec<Endpoint>, rebalance: bool) {
        for e in endpoints {
            self.inner.uri_pool.add(e);
        }
        if rebalance {
            self.reconnect(true).await;
        } else {
            self.inner.reconnect_notify.notify_one();
        }
    }

    /// Holds the reconnect lock across removal so an in-flight reconnect
    /// cannot re-select an endpoint being removed out from under it.
    pub async fn remove_endpoints(&self, endpoints: &[Endpoint], rebalance: bool) {
        {
            let _state = self.inner.reconnect_state.lock().await;
            for e in endpoints {
                self.inner.uri_pool.remove(e);
            }
        }
        if rebalance {
            self.reconnect(true).await;
        }
    }

    /// If `rebalance`, retire the current transport so the worker selects
    /// anew; always wakes the worker.
    pub async fn reconnect(&self, rebalance: bool) {
        self.inner.reconnect(rebalance).await;
    }

    pub async fn reconnect_to(&self, endpoint: Endpoint) {
        self.inner.reconnect_to(endpoint).await;
    }

    /// True iff started, not closed, not connected, and the attempt cap
    /// has not been exhausted.
    pub async fn is_pending(&self) -> bool {
        if self.inner.is_closed() || !self.inner.started.load(Ordering::SeqCst) {
            return false;
        }
        let state = self.inner.reconnect_state.lock().await;
        !state.connected && state.connection_failure.is_none()
    }

    pub async fn remote_address(&self) -> Option<String> {
        let state = self.inner.reconnect_state.lock().await;
        match &state.connected_transport {
            Some(t) => t.remote_address(),
            None => None,
        }
    }

    /// The single send primitive. See the dispatch rules this implements
    /// in the module-level notes below.
    pub async fn oneway(&self, command: Command) -> Result<(), FailoverError> {
        if self.inner.is_closed() {
            return Err(FailoverError::TransportDisposed);
        }
        if !self.inner.started.load(Ordering::SeqCst) {
            return Err(FailoverError::IllegalState(
                "oneway called before start()".into(),
            ));
        }

        if command.is_shutdown() {
            let connected = self.inner.reconnect_state.lock().await.connected;
            if !connected {
                return Ok(());
            }
        }

        if command.is_stale_on_reconnect() {
            let connected = self.inner.reconnect_state.lock().await.connected;
            if !connected {
                self.inner.state_tracker.track(&command);
                if command.response_required {
                    if let Some(correlation_id) = command.correlation_id {
                        let response = Command::synthetic_success_response(correlation_id);
                        self.inner.upper_listener().await.on_command(response).await;
                    }
                }
                return Ok(());
            }
        }

        let deadline = self.inner.config.timeout().map(|t| Instant::now() + t);

        loop {
            let transport = self.wait_for_connected_transport(deadline).await?;

            let tracked = self.inner.state_tracker.track(&command);
            let correlation_id = command.correlation_id;
            if tracked == Tracked::Yes {
                if let Some(id) = correlation_id {
                    self.inner.request_map.insert(id, command.clone());
                }
            } else if command.response_required {
                if let Some(id) = correlation_id {
                    self.inner.request_map.insert(id, command.clone());
                }
            }

            match transport.oneway(command.clone()).await {
                Ok(()) => {
                    self.inner.state_tracker.track_response(&command);
                    return Ok(());
                }
                Err(err) => {
                    if tracked == Tracked::Yes {
                        self.handle_transport_failure(err).await;
                        // retry loop
                    } else {
                        if let Some(id) = correlation_id {
                            self.inner.request_map.remove(id);
                        }
                        self.handle_transport_failure(err.clone()).await;
                        // The untracked path still rejoins the retry loop:
                        // the caller observes a result only via timeout or
                        // a terminal sticky failure, never a raw IO error.
                    }
                }
            }
        }
    }

    async fn wait_for_connected_transport(
        &self,
        deadline: Option<Instant>,
    ) -> Result<Arc<dyn UnderlyingTransport>, FailoverError> {
        loop {
            // `notify_waiters` (used by every signaller of `connect_notify`)
            // only wakes waiters already registered at the time it's
            // called; a `Notified` future registers on first poll, not on
            // construction. `enable()` registers it immediately so a
            // wakeup that lands between releasing the lock below and
            // awaiting the future is not lost.
            let notified = self.inner.connect_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.inner.reconnect_state.lock().await;
                if let Some(err) = &state.connection_failure {
                    return Err(err.clone());
                }
                if self.inner.is_closed() {
                    return Err(FailoverError::TransportDisposed);
                }
                if let Some(transport) = &state.connected_transport {
                    if state.connected {
                        return Ok(transport.clone());
                    }
                }
            }

            match deadline {
                None => notified.as_mut().await,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(FailoverError::FailoverTimeout(
                            self.inner.config.timeout().unwrap_or_default(),
                        ));
                    }
                    if tokio::time::timeout(deadline - now, notified.as_mut()).await.is_err() {
                        return Err(FailoverError::FailoverTimeout(
                            self.inner.config.timeout().unwrap_or_default(),
                        ));
                    }
                }
            }
        }
    }

    /// Swap out the active transport, detach its listener, hand it to the
    /// close worker, return its endpoint, and wake the reconnect worker.
    pub(crate) async fn handle_transport_failure(&self, error: FailoverError) {
        self.inner.handle_transport_failure(error).await;
    }
}
