//! Boundary traits for the streaming gateway and its feedback service.
//!
//! The real wire framing and TLS handshake live behind these traits; the
//! dispatcher only sees the shape that matters to it: an acknowledgement-
//! less send channel and a closure signal that names the last-good item.

use std::time::SystemTime;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::GatewayConfig;
use crate::types::Notification;

pub mod mock;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway connect failed: {0}")]
    Connect(String),
    #[error("feedback poll failed: {0}")]
    Feedback(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// The gateway's sole failure notification: the connection is gone, this
/// many trailing items are presumed lost, and optionally the item that
/// triggered the teardown.
#[derive(Debug)]
pub struct ClosureSignal {
    /// How many items past the last-good one the gateway never processed.
    pub unsent_count: usize,
    /// The item the gateway rejected, when it named one.
    pub error_item: Option<Notification>,
    pub reason: Option<String>,
}

/// One live streaming connection.
///
/// `sender` accepts items without acknowledgement and exerts backpressure
/// when the transport stalls; `closed` yields exactly once, after which the
/// link is dead. Dropping the link tears the transport down.
pub struct GatewayLink {
    pub sender: mpsc::Sender<Notification>,
    pub closed: oneshot::Receiver<ClosureSignal>,
    disconnect: Option<oneshot::Sender<()>>,
}

impl GatewayLink {
    pub fn new(
        sender: mpsc::Sender<Notification>,
        closed: oneshot::Receiver<ClosureSignal>,
        disconnect: oneshot::Sender<()>,
    ) -> Self {
        Self {
            sender,
            closed,
            disconnect: Some(disconnect),
        }
    }

    /// Ask the transport to tear down cleanly.
    pub fn disconnect(&mut self) {
        if let Some(tx) = self.disconnect.take() {
            let _ = tx.send(());
        }
    }
}

/// Opens streaming connections to the push gateway.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    async fn connect(&self, config: &GatewayConfig) -> GatewayResult<GatewayLink>;
}

/// A device token the gateway reported as stale, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackEntry {
    pub timestamp: SystemTime,
    pub device_token: String,
}

/// The feedback service, queried once per launch. Entries are logged for
/// out-of-band remediation; reconciling them with a device registry is not
/// this crate's concern.
#[async_trait]
pub trait FeedbackService: Send + Sync {
    async fn poll(&self, config: &GatewayConfig) -> GatewayResult<Vec<FeedbackEntry>>;
}
