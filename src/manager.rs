//! Per-application connection manager: owns the toggling worker pair, the
//! shared send queue, the retry cache, and the diagnostics relay.

use std::sync::Arc;
use std::time::UNIX_EPOCH;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::cache::RetryCache;
use crate::config::{DispatchConfig, GatewayConfig};
use crate::diag::{DiagTag, Diagnostics, SinkProvider};
use crate::gateway::{FeedbackService, GatewayConnector, GatewayError};
use crate::types::{AppCredential, GatewayEndpoints, Notification};
use crate::worker::TransportWorker;

/// Lifecycle of one manager. Transitions are monotonic except for the
/// `Active -> CertsFound` demotion on close; a closed manager may be
/// relaunched any number of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Unknown,
    /// No credential was supplied; launch is a permanent no-op.
    NoCerts,
    /// Credential present, not currently connected.
    CertsFound,
    /// Both transport workers are running.
    Active,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("diagnostics sink unavailable: {0}")]
    Sink(#[from] std::io::Error),
    #[error("feedback poll failed: {0}")]
    Feedback(#[from] GatewayError),
}

struct ManagerInner {
    status: Status,
    queue_tx: Option<mpsc::Sender<Notification>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

pub struct ConnectionManager {
    app_id: u32,
    bundle_id: String,
    credential: Option<AppCredential>,
    endpoints: GatewayEndpoints,
    config: DispatchConfig,
    connector: Arc<dyn GatewayConnector>,
    feedback: Arc<dyn FeedbackService>,
    sinks: Arc<dyn SinkProvider>,
    inner: Mutex<ManagerInner>,
}

impl ConnectionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        app_id: u32,
        bundle_id: impl Into<String>,
        credential: Option<AppCredential>,
        endpoints: GatewayEndpoints,
        config: DispatchConfig,
        connector: Arc<dyn GatewayConnector>,
        feedback: Arc<dyn FeedbackService>,
        sinks: Arc<dyn SinkProvider>,
    ) -> Self {
        let status = if credential.is_some() {
            Status::CertsFound
        } else {
            Status::NoCerts
        };
        Self {
            app_id,
            bundle_id: bundle_id.into(),
            credential,
            endpoints,
            config,
            connector,
            feedback,
            sinks,
            inner: Mutex::new(ManagerInner {
                status,
                queue_tx: None,
                shutdown_tx: None,
            }),
        }
    }

    pub fn status(&self) -> Status {
        self.inner.lock().status
    }

    pub fn app_id(&self) -> u32 {
        self.app_id
    }

    pub fn bundle_id(&self) -> &str {
        &self.bundle_id
    }

    /// Bring the worker pair up. No-op when already `Active` or when no
    /// credential was ever supplied. On error nothing is spawned and the
    /// status is unchanged; the caller may retry later.
    pub async fn launch(&self, logging: bool) -> Result<(), LaunchError> {
        debug!(
            app_id = self.app_id,
            bundle = %self.bundle_id,
            status = ?self.status(),
            "launch requested"
        );
        match self.status() {
            Status::Active | Status::NoCerts => return Ok(()),
            Status::Unknown | Status::CertsFound => {}
        }
        let Some(credential) = &self.credential else {
            return Ok(());
        };

        let sink = self.sinks.open(&self.bundle_id).map_err(|err| {
            warn!(bundle = %self.bundle_id, error = %err, "diagnostics sink open failed");
            LaunchError::Sink(err)
        })?;

        let feedback_config = GatewayConfig::feedback(credential, &self.endpoints);
        let entries = self.feedback.poll(&feedback_config).await.map_err(|err| {
            warn!(bundle = %self.bundle_id, error = %err, "feedback poll failed");
            LaunchError::Feedback(err)
        })?;

        let (diag, _relay) = Diagnostics::spawn(sink, self.config.diag_capacity, logging);
        let feedback_diag = diag.sender(DiagTag::Feedback);
        feedback_diag
            .emit(|| format!("feedback reported {} stale tokens", entries.len()))
            .await;
        for entry in &entries {
            let epoch = entry
                .timestamp
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            feedback_diag
                .emit(|| format!("stale token {} reported at {epoch}", entry.device_token))
                .await;
        }
        drop(feedback_diag);

        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity);
        let queue_rx = Arc::new(AsyncMutex::new(queue_rx));
        let cache = Arc::new(Mutex::new(RetryCache::new(self.config.cache_capacity)));
        let (shutdown_tx, _) = broadcast::channel(1);
        let push_config = GatewayConfig::push(credential, &self.endpoints);

        {
            let mut inner = self.inner.lock();
            if inner.status == Status::Active {
                // Lost a launch race; the earlier generation stands.
                return Ok(());
            }
            for socket_id in 1..=2u8 {
                let worker = TransportWorker {
                    socket_id,
                    connector: Arc::clone(&self.connector),
                    config: push_config.clone(),
                    queue_rx: Arc::clone(&queue_rx),
                    queue_tx: queue_tx.clone(),
                    cache: Arc::clone(&cache),
                    backoff: Backoff::new(self.config.backoff_floor, self.config.backoff_ceiling),
                    shutdown: shutdown_tx.subscribe(),
                    diag: diag.sender(DiagTag::Socket(socket_id)),
                };
                tokio::spawn(worker.run());
            }
            inner.queue_tx = Some(queue_tx);
            inner.shutdown_tx = Some(shutdown_tx);
            inner.status = Status::Active;
        }
        // `diag` drops here; the relay keeps running until both workers
        // release their senders, then drains and exits.
        Ok(())
    }

    /// Enqueue one notification. Accepted only while `Active`; otherwise
    /// silently dropped, which is the documented best-effort contract for
    /// callers that fire submissions without awaiting launch state. Blocks
    /// only while the bounded queue is full.
    pub async fn submit(&self, item: Notification) {
        let queue_tx = {
            let inner = self.inner.lock();
            if inner.status != Status::Active {
                return;
            }
            inner.queue_tx.clone()
        };
        if let Some(queue_tx) = queue_tx {
            let _ = queue_tx.send(item).await;
        }
    }

    /// Signal both workers to shut down and demote to `CertsFound`.
    /// Idempotent; a no-op unless `Active`.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.status != Status::Active {
            return;
        }
        if let Some(shutdown_tx) = inner.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        inner.queue_tx = None;
        inner.status = Status::CertsFound;
        debug!(app_id = self.app_id, bundle = %self.bundle_id, "manager closed");
    }
}
