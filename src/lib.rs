//! Resilient dispatcher for the APNS binary streaming push protocol.
//!
//! The gateway never acknowledges individual items; its only failure signal
//! is tearing the transport down while naming the last-good item. Each
//! application gets a pair of toggling transport workers sharing one
//! bounded send queue and one retry cache, so a worker recovering from a
//! closure never stalls submissions and the presumed-lost window is resent
//! without unbounded duplication.

pub mod backoff;
pub mod cache;
pub mod config;
pub mod diag;
pub mod gateway;
pub mod manager;
pub mod registry;
pub mod types;
mod worker;

pub use config::{DispatchConfig, GatewayConfig};
pub use manager::{ConnectionManager, LaunchError, Status};
pub use registry::Registry;
pub use types::{AppCredential, Environment, GatewayEndpoints, Notification};
