//! The Reconnect Worker — a single cooperative task that owns every
//! transport creation and state-restoration attempt.
//!
//! Shaped after `worker/pool.rs`'s `worker_task` reconnect loop: the same
//! `backoff_with_jitter`-style growth, the same single-task-per-resource
//! discipline (never run two `iterate`-equivalents concurrently against
//! one `Inner`), but driven by `tokio::sync::Notify` instead of polling —
//! the 100 ms polling loop the failover design this crate generalizes
//! used is the one thing deliberately not carried over; `Notify` avoids
//! missed wakeups by only ever being awaited after re-checking state
//! under the lock, never before.

use crate::backup_pool::BackupTransport;
use crate::core::Inner;
use crate::endpoint::Endpoint;
use crate::error::FailoverError;
use crate::listener::{DisposedListener, InnerListener, TransportListener};
use crate::transport::UnderlyingTransport;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Drives `iterate` until the core is closed.
///
/// `Notify::notify_one` buffers a single permit when nothing is currently
/// waiting, so a wakeup that lands between `iterate` returning and this
/// loop reaching `.notified().await` is not lost — no need to construct
/// the `notified()` future before `iterate` runs.
pub(crate) async fn run(inner: Arc<Inner>) {
    loop {
        if inner.is_closed() {
            break;
        }

        let should_continue_immediately = iterate(&inner).await;

        if inner.is_closed() {
            break;
        }

        if !should_continue_immediately {
            inner.reconnect_notify.notified().await;
        }
    }
}

/// One attempt cycle. Returns whether the worker should immediately loop
/// again (a backoff sleep already elapsed inside this call) rather than
/// wait for an external wakeup.
async fn iterate(inner: &Arc<Inner>) -> bool {
    {
        let state = inner.reconnect_state.lock().await;
        if inner.is_closed() || state.connection_failure.is_some() {
            inner.connect_notify.notify_waiters();
            return false;
        }
        if state.connected {
            drop(state);
            // Nothing to reconnect; use the idle tick to top up the backup
            // pool and check whether a priority endpoint just became warm
            // enough to preempt the current non-priority connection.
            fill_backup_pool(inner).await;
            maybe_preempt_for_priority(inner).await;
            return false;
        }
    }

    let mut transport: Option<(Endpoint, Arc<dyn UnderlyingTransport>, Arc<InnerListener>)> = None;
    let mut last_failure: Option<FailoverError> = None;
    let mut returned_endpoints: Vec<Endpoint> = Vec::new();

    if inner.backup_pool.is_enabled() {
        if let Some(spare) = inner.backup_pool.take().await {
            match promote_backup(inner, spare).await {
                Ok(promoted) => transport = Some(promoted),
                Err((endpoint, e)) => {
                    returned_endpoints.push(endpoint);
                    last_failure = Some(e);
                }
            }
        }
    }

    while transport.is_none() && !inner.is_closed() {
        let endpoint = match inner.uri_pool.take() {
            Some(e) => e,
            None => break,
        };

        match connect_and_restore(inner, &endpoint).await {
            Ok((t, listener)) => {
                transport = Some((endpoint, t, listener));
            }
            Err(e) => {
                returned_endpoints.push(endpoint);
                last_failure = Some(e);
            }
        }
    }

    if !returned_endpoints.is_empty() {
        inner.uri_pool.return_all(returned_endpoints);
    }

    if let Some((endpoint, t, listener)) = transport {
        let mut state = inner.reconnect_state.lock().await;
        state.connected_transport = Some(t.clone());
        state.connected_endpoint = Some(endpoint);
        state.connected_listener = Some(listener);
        state.reconnect_delay = inner.config.initial_reconnect_delay();
        state.connect_failures = 0;
        state.connected = true;
        let was_first = state.first_connection;
        state.first_connection = false;
        drop(state);

        inner.connect_notify.notify_waiters();
        let remote = t.remote_address().unwrap_or_default();
        if !was_first {
            inner.upper_listener().await.on_connection_restored(remote).await;
        }
        return false;
    }

    // Failed attempt: apply the attempt cap, then either go terminal or
    // back off and retry.
    let mut state = inner.reconnect_state.lock().await;
    let startup_cap = inner.config.startup_max_reconnect_attempts();
    let cap = if state.first_connection && startup_cap > 0 {
        startup_cap
    } else {
        inner.config.max_reconnect_attempts()
    };

    state.connect_failures += 1;
    if cap > 0 && state.connect_failures >= cap {
        let failure = last_failure.unwrap_or(FailoverError::TransportIo("unknown".into()));
        let sticky = FailoverError::ConnectionFailure(Arc::new(failure));
        state.connection_failure = Some(sticky.clone());
        drop(state);

        inner.connect_notify.notify_waiters();
        inner.upper_listener().await.on_failure(sticky).await;
        return false;
    }

    let delay = state.reconnect_delay;
    drop(state);

    sleep_interruptibly(inner, delay).await;

    let mut state = inner.reconnect_state.lock().await;
    if inner.config.use_exponential_backoff() {
        let next = delay.mul_f64(inner.config.backoff_multiplier());
        state.reconnect_delay = next.min(inner.config.max_reconnect_delay());
    }
    true
}

/// Interruptible backoff sleep: races the delay against `sleep_notify`, the
/// dedicated signal `close()`/`reconnect()` use to cut a wait short.
async fn sleep_interruptibly(inner: &Arc<Inner>, delay: Duration) {
    let notified = inner.sleep_notify.notified();
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = notified => {}
    }
}

/// Build a transport for `endpoint`, start it, attach the inner listener,
/// and replay state. A failure anywhere in this sequence disposes the
/// transport and surfaces as a per-attempt error (endpoint returned by
/// the caller).
async fn connect_and_restore(
    inner: &Arc<Inner>,
    endpoint: &Endpoint,
) -> Result<(Arc<dyn UnderlyingTransport>, Arc<InnerListener>), FailoverError> {
    let transport = inner.registry.create(endpoint).await?;
    let listener = Arc::new(InnerListener::new(inner.clone()));
    transport.set_listener(listener.clone() as Arc<dyn TransportListener>);

    match transport.start().await {
        Ok(()) => {}
        Err(e) => {
            listener.dispose();
            transport.set_listener(Arc::new(DisposedListener));
            inner.close_worker.enqueue(transport);
            return Err(e);
        }
    }

    if let Err(e) = restore_transport(inner, &transport).await {
        listener.dispose();
        transport.set_listener(Arc::new(DisposedListener));
        inner.close_worker.enqueue(transport);
        return Err(e);
    }

    Ok((transport, listener))
}

/// Promote a warm backup transport to the active connection: attach the
/// real inner listener in place of the disposed one it was built with, and
/// replay the same self-identification / state-tracker / Request Map
/// sequence a freshly created transport goes through.
async fn promote_backup(
    inner: &Arc<Inner>,
    spare: BackupTransport,
) -> Result<(Endpoint, Arc<dyn UnderlyingTransport>, Arc<InnerListener>), (Endpoint, FailoverError)> {
    let BackupTransport { endpoint, transport } = spare;

    let listener = Arc::new(InnerListener::new(inner.clone()));
    transport.set_listener(listener.clone() as Arc<dyn TransportListener>);

    if let Err(e) = restore_transport(inner, &transport).await {
        listener.dispose();
        transport.set_listener(Arc::new(DisposedListener));
        inner.close_worker.enqueue(transport);
        return Err((endpoint, e));
    }

    Ok((endpoint, transport, listener))
}

/// Tops up the Backup Pool to its configured size, one endpoint at a time,
/// never blocking the worker past a single attempt per idle tick. Invoked
/// only when the worker has nothing more urgent to do (already connected).
async fn fill_backup_pool(inner: &Arc<Inner>) {
    if !inner.backup_pool.is_enabled() {
        return;
    }

    while inner.backup_pool.deficit().await > 0 {
        let endpoint = match inner.uri_pool.take() {
            Some(e) => e,
            None => break,
        };

        match inner.registry.create(&endpoint).await {
            Ok(transport) => {
                transport.set_listener(Arc::new(DisposedListener));
                match transport.start().await {
                    Ok(()) => {
                        let evicted = inner
                            .backup_pool
                            .push(BackupTransport {
                                endpoint,
                                transport,
                            })
                            .await;
                        for spare in evicted {
                            inner.close_worker.enqueue(spare.transport);
                            inner.uri_pool.return_all(vec![spare.endpoint]);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(endpoint = %endpoint, error = %e, "backup pool start failed");
                        inner.close_worker.enqueue(transport);
                        inner.uri_pool.return_all(vec![endpoint]);
                        break;
                    }
                }
            }
            Err(e) => {
                tracing::debug!(endpoint = %endpoint, error = %e, "backup pool connect failed");
                inner.uri_pool.return_all(vec![endpoint]);
                break;
            }
        }
    }
}

/// If priority-backup is enabled and a priority endpoint has come up warm
/// in the Backup Pool while the active connection is non-priority,
/// schedule a rebalance so the next `iterate` promotes the priority spare.
async fn maybe_preempt_for_priority(inner: &Arc<Inner>) {
    if !inner.config.priority_backup() || !inner.backup_pool.is_enabled() {
        return;
    }

    let current_is_priority = {
        let state = inner.reconnect_state.lock().await;
        if !state.connected {
            return;
        }
        state
            .connected_endpoint
            .as_ref()
            .map(|e| inner.uri_pool.is_priority(e))
            .unwrap_or(false)
    };
    if current_is_priority {
        return;
    }

    let has_priority_spare = inner
        .backup_pool
        .held_endpoints()
        .await
        .iter()
        .any(|e| inner.uri_pool.is_priority(e));

    if has_priority_spare {
        tracing::debug!("priority backup available; scheduling rebalance");
        inner.reconnect(true).await;
    }
}

/// Replays everything a newly connected transport needs before it is
/// handed to callers: self-identification, state-tracker restoration, and
/// the Request Map.
async fn restore_transport(
    inner: &Arc<Inner>,
    transport: &Arc<dyn UnderlyingTransport>,
) -> Result<(), FailoverError> {
    if let Some(identify) = &inner.identify_command {
        transport.oneway(identify.clone()).await?;
    }

    for command in inner.state_tracker.restore().await? {
        transport.oneway(command).await?;
    }

    for command in inner.request_map.snapshot() {
        transport.oneway(command).await?;
    }

    Ok(())
}
