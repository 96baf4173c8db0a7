//! The Close-Transports Worker — disposes of abandoned transports off the
//! reconnect/send hot paths.
//!
//! `close()` on a real transport can block on socket teardown; tearing one
//! down inline from the reconnect loop would stall the next connect
//! attempt. Instead a disposed transport is handed to an unbounded
//! `mpsc` channel and closed by a single background task, the same
//! producer/consumer split `worker/pool.rs` uses for its bounded request
//! queue (unbounded here since failed transports are rare and must never
//! block the caller that abandons one).

use crate::transport::UnderlyingTransport;
use std::sync::{Arc, Mutex as SyncMutex};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub struct CloseTransportsWorker {
    /// `None` once `shutdown` has run; dropping the sender is what closes
    /// the channel and lets the background task's `recv` loop end.
    sender: SyncMutex<Option<mpsc::UnboundedSender<Arc<dyn UnderlyingTransport>>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CloseTransportsWorker {
    /// Spawn the background closer task.
    pub fn start() -> Arc<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Arc<dyn UnderlyingTransport>>();

        let handle = tokio::spawn(async move {
            while let Some(transport) = receiver.recv().await {
                if let Err(err) = transport.close().await {
                    tracing::warn!(error = %err, "failed to close abandoned transport");
                }
            }
        });

        Arc::new(Self {
            sender: SyncMutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Hand off a transport for asynchronous disposal. Never blocks. A
    /// no-op once `shutdown` has already run.
    pub fn enqueue(&self, transport: Arc<dyn UnderlyingTransport>) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.send(transport);
        }
    }

    /// Stop accepting new work and wait for the queue to drain: dropping
    /// the sender closes the channel, letting the background task's `recv`
    /// loop finish the backlog and return, then this joins that task.
    pub async fn shutdown(&self) {
        self.sender.lock().unwrap().take();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}
