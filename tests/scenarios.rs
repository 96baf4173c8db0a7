//! End-to-end scenarios driven against a scripted mock transport/factory,
//! the same shape as the facade-level suites under `kimberlite-client`'s
//! `tests/` directory rather than a `#[cfg(test)]` module, since the mock
//! here is large enough to warrant its own file.

use async_trait::async_trait;
use bytes::Bytes;
use failover_transport::{
    Command, CommandKind, ConnectionControl, Endpoint, FailoverConfig, FailoverError,
    FailoverTransport, FactoryRegistry, StateTracker, Tracked, TransportFactory,
    TransportListener, UnderlyingTransport,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a scripted transport's `start()` behaves across repeated attempts.
#[derive(Clone, Copy, PartialEq, Eq)]
enum StartBehavior {
    AlwaysSucceed,
    AlwaysFail,
    /// Succeeds the first time it is started, fails on every later attempt
    /// (simulates an endpoint that accepted one connection and then went
    /// down for good).
    FailAfterFirstStart,
}

struct ScriptedTransport {
    name: String,
    start_behavior: StartBehavior,
    start_calls: AtomicUsize,
    fail_oneway_once: AtomicBool,
    sent: Mutex<Vec<Command>>,
    listener: Mutex<Option<Arc<dyn TransportListener>>>,
}

impl ScriptedTransport {
    fn new(name: &str, start_behavior: StartBehavior, fail_oneway_once: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            start_behavior,
            start_calls: AtomicUsize::new(0),
            fail_oneway_once: AtomicBool::new(fail_oneway_once),
            sent: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
        })
    }

    fn sent_commands(&self) -> Vec<Command> {
        self.sent.lock().unwrap().clone()
    }

    /// Simulate the peer pushing a command down this transport into
    /// whatever listener the core installed.
    async fn deliver(&self, command: Command) {
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener.on_command(command).await;
        }
    }
}

#[async_trait]
impl UnderlyingTransport for ScriptedTransport {
    async fn start(&self) -> Result<(), FailoverError> {
        let calls = self.start_calls.fetch_add(1, Ordering::SeqCst);
        match self.start_behavior {
            StartBehavior::AlwaysSucceed => Ok(()),
            StartBehavior::AlwaysFail => {
                Err(FailoverError::transport_io(format!("{} refused connection", self.name)))
            }
            StartBehavior::FailAfterFirstStart => {
                if calls == 0 {
                    Ok(())
                } else {
                    Err(FailoverError::transport_io(format!("{} went down", self.name)))
                }
            }
        }
    }

    async fn close(&self) -> Result<(), FailoverError> {
        Ok(())
    }

    async fn oneway(&self, command: Command) -> Result<(), FailoverError> {
        if self.fail_oneway_once.swap(false, Ordering::SeqCst) {
            return Err(FailoverError::transport_io(format!("{} write failed", self.name)));
        }
        self.sent.lock().unwrap().push(command);
        Ok(())
    }

    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    fn remote_address(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

/// Hands out pre-registered transports by endpoint URI, all sharing one
/// scheme.
#[derive(Default)]
struct ScriptedFactory {
    transports: Mutex<std::collections::HashMap<String, Arc<ScriptedTransport>>>,
}

impl ScriptedFactory {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, uri: &str, transport: Arc<ScriptedTransport>) {
        self.transports.lock().unwrap().insert(uri.to_string(), transport);
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn create_transport(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Arc<dyn UnderlyingTransport>, FailoverError> {
        let found = self.transports.lock().unwrap().get(endpoint.as_str()).cloned();
        match found {
            Some(t) => Ok(t),
            None => Err(FailoverError::InvalidEndpoint(endpoint.as_str().to_string())),
        }
    }
}

/// A `StateTracker` that tracks every plain command (`CommandKind::Other`)
/// and nothing else, so scenario 2 can exercise Request Map replay without
/// pulling in session/consumer bookkeeping the scenario doesn't need.
#[derive(Default)]
struct TrackOtherCommands;

#[async_trait]
impl StateTracker for TrackOtherCommands {
    fn track(&self, command: &Command) -> Tracked {
        if command.kind == CommandKind::Other {
            Tracked::Yes
        } else {
            Tracked::No
        }
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

/// Captures every callback the core delivers to the upper listener.
#[derive(Default)]
struct CapturingListener {
    commands: Mutex<Vec<Command>>,
    interrupted: AtomicUsize,
    resumed: AtomicUsize,
    failures: Mutex<Vec<FailoverError>>,
}

impl CapturingListener {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl TransportListener for CapturingListener {
    async fn on_command(&self, command: Command) {
        self.commands.lock().unwrap().push(command);
    }

    async fn on_connection_interrupted(&self) {
        self.interrupted.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_connection_restored(&self, _remote_address: String) {
        self.resumed.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_failure(&self, error: FailoverError) {
        self.failures.lock().unwrap().push(error);
    }
}

fn endpoint(uri: &str) -> Endpoint {
    Endpoint::parse(uri).unwrap()
}

/// Polls `f` until it returns true or `timeout` elapses, panicking on
/// timeout. Avoids racing on exact task-scheduling order in the reconnect
/// worker, which runs concurrently with the test body.
async fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if f() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn straight_through_send() {
    let registry = FactoryRegistry::new();
    let factory = ScriptedFactory::new();
    let transport_a = ScriptedTransport::new("a", StartBehavior::AlwaysSucceed, false);
    factory.register("mock://a", transport_a.clone());
    registry.register("mock", factory);

    let core = FailoverTransport::with_defaults(FailoverConfig::new(), registry);
    core.add_endpoint(endpoint("mock://a"));
    core.start().await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while core.is_pending().await {
        if tokio::time::Instant::now() >= deadline {
            panic!("never connected");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let c1 = Command::new(CommandKind::Other, Bytes::from_static(b"one")).with_correlation_id(1);
    let c2 = Command::new(CommandKind::Other, Bytes::from_static(b"two")).with_correlation_id(2);
    core.oneway(c1).await.unwrap();
    core.oneway(c2).await.unwrap();

    let sent = transport_a.sent_commands();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].correlation_id, Some(1));
    assert_eq!(sent[1].correlation_id, Some(2));
    assert!(!core.is_pending().await);

    core.close().await.unwrap();
}

#[tokio::test]
async fn blocking_send_survives_a_reconnect() {
    let registry = FactoryRegistry::new();
    let factory = ScriptedFactory::new();
    let transport_a = ScriptedTransport::new("a", StartBehavior::FailAfterFirstStart, true);
    let transport_b = ScriptedTransport::new("b", StartBehavior::AlwaysSucceed, false);
    factory.register("mock://a", transport_a.clone());
    factory.register("mock://b", transport_b.clone());
    registry.register("mock", factory);

    let config = FailoverConfig::new();
    config.set_timeout(Some(Duration::from_millis(5000)));

    let core = FailoverTransport::new(config, registry, Arc::new(TrackOtherCommands));
    core.set_randomize(false);
    core.add_endpoints(vec![endpoint("mock://a"), endpoint("mock://b")], false)
        .await;
    core.start().await.unwrap();

    let mut connected_to = None;
    for _ in 0..400 {
        if let Some(addr) = core.remote_address().await {
            connected_to = Some(addr);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(connected_to, Some("a".to_string()));

    let c1 = Command::new(CommandKind::Other, Bytes::from_static(b"tracked")).with_correlation_id(1);
    core.oneway(c1).await.expect("oneway survives the reconnect");

    assert_eq!(core.remote_address().await, Some("b".to_string()));
    assert!(
        transport_b.sent_commands().iter().any(|c| c.correlation_id == Some(1)),
        "c1 must have reached the surviving transport, possibly more than once"
    );

    core.close().await.unwrap();
}

#[tokio::test]
async fn oneway_times_out_while_unreachable() {
    let registry = FactoryRegistry::new();
    let factory = ScriptedFactory::new();
    let transport_x = ScriptedTransport::new("x", StartBehavior::AlwaysFail, false);
    factory.register("mock://x", transport_x.clone());
    registry.register("mock", factory);

    let config = FailoverConfig::new();
    config.set_timeout(Some(Duration::from_millis(500)));
    config.set_initial_reconnect_delay(Duration::from_millis(1000)).unwrap();

    let core = FailoverTransport::with_defaults(config, registry);
    core.add_endpoint(endpoint("mock://x"));
    core.start().await.unwrap();

    let started = tokio::time::Instant::now();
    let cmd = Command::new(CommandKind::Other, Bytes::from_static(b"x")).with_correlation_id(1);
    let result = core.oneway(cmd).await;
    let elapsed = started.elapsed();

    match result {
        Err(FailoverError::FailoverTimeout(d)) => assert_eq!(d, Duration::from_millis(500)),
        other => panic!("expected FailoverTimeout, got {other:?}"),
    }
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(1000), "should not wait for the reconnect delay");
    assert!(core.is_pending().await, "the worker keeps retrying past one timed-out send");

    core.close().await.unwrap();
}

#[tokio::test]
async fn attempt_cap_makes_connection_failure_sticky() {
    let registry = FactoryRegistry::new();
    let factory = ScriptedFactory::new();
    let transport_x = ScriptedTransport::new("x", StartBehavior::AlwaysFail, false);
    factory.register("mock://x", transport_x.clone());
    registry.register("mock", factory);

    let config = FailoverConfig::new();
    config.set_max_reconnect_attempts(2);
    config.set_use_exponential_backoff(false);
    config.set_initial_reconnect_delay(Duration::from_millis(10)).unwrap();

    let core = FailoverTransport::with_defaults(config, registry);
    let listener = CapturingListener::new();
    core.set_listener(listener.clone()).await;
    core.add_endpoint(endpoint("mock://x"));
    core.start().await.unwrap();

    wait_until(Duration::from_secs(2), || !listener.failures.lock().unwrap().is_empty()).await;

    assert_eq!(listener.failures.lock().unwrap().len(), 1);
    assert!(!core.is_pending().await);

    let cmd = Command::new(CommandKind::Other, Bytes::from_static(b"x")).with_correlation_id(7);
    match core.oneway(cmd).await {
        Err(FailoverError::ConnectionFailure(_)) => {}
        other => panic!("expected sticky ConnectionFailure, got {other:?}"),
    }

    core.close().await.unwrap();
}

#[tokio::test]
async fn stale_ack_short_circuits_while_disconnected() {
    let registry = FactoryRegistry::new();
    // No endpoints and no factories registered: the core never connects.
    let core = FailoverTransport::with_defaults(FailoverConfig::new(), registry);
    let listener = CapturingListener::new();
    core.set_listener(listener.clone()).await;
    core.start().await.unwrap();

    let ack = Command::new(CommandKind::MessageAck, Bytes::new())
        .with_correlation_id(42)
        .requiring_response();

    let result = tokio::time::timeout(Duration::from_millis(200), core.oneway(ack)).await;
    assert!(result.is_ok(), "stale-ack short-circuit must not block");
    result.unwrap().unwrap();

    let commands = listener.commands.lock().unwrap();
    assert_eq!(commands.len(), 1);
    assert!(commands[0].is_response());
    assert_eq!(commands[0].correlation_id, Some(42));

    core.close().await.unwrap();
}

#[tokio::test]
async fn server_directed_rebalance_adds_endpoints_and_reconnects() {
    let registry = FactoryRegistry::new();
    let factory = ScriptedFactory::new();
    let transport_a = ScriptedTransport::new("a", StartBehavior::AlwaysSucceed, false);
    let transport_b = ScriptedTransport::new("b", StartBehavior::AlwaysSucceed, false);
    let transport_c = ScriptedTransport::new("c", StartBehavior::AlwaysSucceed, false);
    factory.register("mock://a", transport_a.clone());
    factory.register("mock://b", transport_b.clone());
    factory.register("mock://c", transport_c.clone());
    registry.register("mock", factory);

    let config = FailoverConfig::new();
    // Defaults already have update-uris-supported and rebalance-update-uris
    // set; spelled out here so the scenario reads standalone.
    config.set_update_uris_supported(true);
    config.set_rebalance_update_uris(true);

    let core = FailoverTransport::with_defaults(config, registry);
    let listener = CapturingListener::new();
    core.set_listener(listener.clone()).await;
    core.add_endpoint(endpoint("mock://a"));
    core.start().await.unwrap();

    let mut connected = false;
    for _ in 0..400 {
        if core.remote_address().await.as_deref() == Some("a") {
            connected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(connected, "must connect to the only configured endpoint first");

    let control = Command {
        correlation_id: None,
        response_required: false,
        kind: CommandKind::ConnectionControl,
        payload: Bytes::new(),
        control: Some(ConnectionControl {
            reconnect_to: None,
            connected_brokers: Some(vec![
                endpoint("mock://a"),
                endpoint("mock://b"),
                endpoint("mock://c"),
            ]),
            rebalance: true,
        }),
    };
    transport_a.deliver(control).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if !core.is_pending().await && listener.resumed.load(Ordering::SeqCst) >= 1 {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("never rebalanced back to a connected state");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(listener.interrupted.load(Ordering::SeqCst), 1);
    assert_eq!(listener.resumed.load(Ordering::SeqCst), 1);
    assert!(core.uri_pool().contains(&endpoint("mock://b")));
    assert!(core.uri_pool().contains(&endpoint("mock://c")));

    let addr = core.remote_address().await;
    assert!(
        matches!(addr.as_deref(), Some("a") | Some("b") | Some("c")),
        "core must be connected to one of the three known brokers, got {addr:?}"
    );

    core.close().await.unwrap();
}
