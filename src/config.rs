use std::time::Duration;

use bytes::Bytes;

use crate::types::{AppCredential, GatewayEndpoints};

/// Tunables for one connection manager. `Default` mirrors the constants the
/// service has always run with; tests shrink them.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Bounded send-queue depth shared by the two transport workers.
    pub queue_capacity: usize,
    /// Ring-buffer slots retained for replay after an unacknowledged closure.
    /// Sized well above the realistic in-flight count.
    pub cache_capacity: usize,
    /// Bounded diagnostics-relay queue depth.
    pub diag_capacity: usize,
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            cache_capacity: 32,
            diag_capacity: 100,
            backoff_floor: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(128),
        }
    }
}

/// Everything a gateway or feedback connection needs: a hostname plus the
/// app's certificate material.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub certificate: Bytes,
    pub private_key: Bytes,
}

impl GatewayConfig {
    pub(crate) fn push(credential: &AppCredential, endpoints: &GatewayEndpoints) -> Self {
        Self {
            host: endpoints.push_host.clone(),
            certificate: credential.certificate.clone(),
            private_key: credential.private_key.clone(),
        }
    }

    pub(crate) fn feedback(credential: &AppCredential, endpoints: &GatewayEndpoints) -> Self {
        Self {
            host: endpoints.feedback_host.clone(),
            certificate: credential.certificate.clone(),
            private_key: credential.private_key.clone(),
        }
    }
}
