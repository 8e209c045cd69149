//! Transport worker: one per connection slot, two per application.
//!
//! Outer loop reconnects with backoff; inner loop races the shared send
//! queue, the gateway's closure signal, and the shutdown broadcast. The two
//! workers of one application compete for the same queue, so whichever one
//! is currently connected keeps submissions flowing while its sibling
//! recovers.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::time::sleep;
use tracing::debug;

use crate::backoff::Backoff;
use crate::cache::RetryCache;
use crate::config::GatewayConfig;
use crate::diag::DiagSender;
use crate::gateway::{ClosureSignal, GatewayConnector, GatewayLink};
use crate::types::Notification;

pub(crate) struct TransportWorker {
    pub(crate) socket_id: u8,
    pub(crate) connector: Arc<dyn GatewayConnector>,
    pub(crate) config: GatewayConfig,
    /// Shared with the sibling worker; locked only for the duration of one
    /// dequeue attempt.
    pub(crate) queue_rx: Arc<AsyncMutex<mpsc::Receiver<Notification>>>,
    /// Replay path: presumed-lost items go back through the normal
    /// submission queue, available to either worker.
    pub(crate) queue_tx: mpsc::Sender<Notification>,
    pub(crate) cache: Arc<Mutex<RetryCache>>,
    pub(crate) backoff: Backoff,
    pub(crate) shutdown: broadcast::Receiver<()>,
    pub(crate) diag: DiagSender,
}

enum Exit {
    Shutdown,
    Reconnect,
}

enum Event {
    Item(Option<Notification>),
    Closed(Option<ClosureSignal>),
    Shutdown,
}

enum SendOutcome {
    Sent,
    Stalled,
    LinkGone,
    Closed(Option<ClosureSignal>),
    Shutdown,
}

impl TransportWorker {
    pub(crate) async fn run(mut self) {
        // An item dequeued but not yet accepted by any link. Survives
        // reconnects so a stalled send is never lost.
        let mut pending: Option<Notification> = None;

        loop {
            self.diag.emit(|| "establishing connection".to_string()).await;
            match self.connector.connect(&self.config).await {
                Ok(link) => {
                    self.diag.emit(|| "connection established".to_string()).await;
                    match self.drive(link, &mut pending).await {
                        Exit::Shutdown => break,
                        Exit::Reconnect => continue,
                    }
                }
                Err(err) => {
                    debug!(socket = self.socket_id, error = %err, "gateway connect failed");
                    self.diag.emit(|| format!("connect error: {err}")).await;
                    let delay = self.backoff.delay();
                    self.backoff.on_failure();
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = self.shutdown.recv() => break,
                    }
                }
            }
        }
        self.diag.emit(|| "shutting down".to_string()).await;
    }

    async fn drive(&mut self, mut link: GatewayLink, pending: &mut Option<Notification>) -> Exit {
        loop {
            if pending.is_none() {
                let queue = Arc::clone(&self.queue_rx);
                let event = tokio::select! {
                    maybe = async move { queue.lock().await.recv().await } => Event::Item(maybe),
                    sig = &mut link.closed => Event::Closed(sig.ok()),
                    _ = self.shutdown.recv() => Event::Shutdown,
                };
                match event {
                    Event::Item(Some(item)) => *pending = Some(item),
                    // Queue gone means the owning manager is gone.
                    Event::Item(None) | Event::Shutdown => {
                        link.disconnect();
                        return Exit::Shutdown;
                    }
                    Event::Closed(sig) => return self.on_closure(sig).await,
                }
            }

            let Some(item) = pending.take() else {
                continue;
            };
            // The current backoff quantum doubles as the send timeout: a
            // send that cannot complete inside it is abandoned for this
            // iteration instead of blocking the worker.
            let window = self.backoff.delay();
            let outcome = tokio::select! {
                res = link.sender.send_timeout(item.clone(), window) => match res {
                    Ok(()) => SendOutcome::Sent,
                    Err(SendTimeoutError::Timeout(_)) => SendOutcome::Stalled,
                    Err(SendTimeoutError::Closed(_)) => SendOutcome::LinkGone,
                },
                sig = &mut link.closed => SendOutcome::Closed(sig.ok()),
                _ = self.shutdown.recv() => SendOutcome::Shutdown,
            };
            match outcome {
                SendOutcome::Sent => {
                    self.diag
                        .emit(|| format!("push to device {} {}", item.device_token, item.alert))
                        .await;
                    self.cache.lock().record(item);
                    self.backoff.on_success();
                }
                SendOutcome::Stalled => {
                    // Nothing was consumed; retry the same item next pass.
                    *pending = Some(item);
                }
                SendOutcome::LinkGone => {
                    *pending = Some(item);
                    let event = tokio::select! {
                        sig = &mut link.closed => Event::Closed(sig.ok()),
                        _ = self.shutdown.recv() => Event::Shutdown,
                    };
                    match event {
                        Event::Closed(sig) => return self.on_closure(sig).await,
                        _ => {
                            link.disconnect();
                            return Exit::Shutdown;
                        }
                    }
                }
                SendOutcome::Closed(sig) => {
                    *pending = Some(item);
                    return self.on_closure(sig).await;
                }
                SendOutcome::Shutdown => {
                    link.disconnect();
                    return Exit::Shutdown;
                }
            }
        }
    }

    /// The gateway tore the stream down. Throttle, identify the suspect
    /// window, and push it back through the submission path as one
    /// contiguous block before reconnecting.
    async fn on_closure(&mut self, signal: Option<ClosureSignal>) -> Exit {
        self.backoff.on_failure();

        let Some(signal) = signal else {
            self.diag
                .emit(|| "connection closed without a signal".to_string())
                .await;
            return Exit::Reconnect;
        };

        self.diag
            .emit(|| {
                format!(
                    "connection closed: {} unsent, reason {}",
                    signal.unsent_count,
                    signal.reason.as_deref().unwrap_or("none")
                )
            })
            .await;

        // The triggering item is logged in full for out-of-band remediation
        // and is not resubmitted unless it falls inside the unsent window.
        if let Some(item) = &signal.error_item {
            let rendered = serde_json::to_string(item).unwrap_or_else(|_| item.alert.clone());
            self.diag.emit(|| format!("rejected item: {rendered}")).await;
        }

        if signal.unsent_count > 0 {
            let replay = self.cache.lock().read_back(signal.unsent_count);
            debug!(
                socket = self.socket_id,
                count = replay.len(),
                "re-enqueueing presumed-lost items"
            );
            for item in replay {
                if self.queue_tx.send(item).await.is_err() {
                    break;
                }
            }
        }
        Exit::Reconnect
    }
}
