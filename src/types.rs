use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One outbound push notification. Cached by value after a successful send
/// so replay is immune to later mutation of the caller's copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Destination device token, hex-encoded.
    pub device_token: String,
    /// Alert text shown to the user.
    pub alert: String,
    /// Free-form metadata forwarded alongside the alert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Notification {
    pub fn new(device_token: impl Into<String>, alert: impl Into<String>) -> Self {
        Self {
            device_token: device_token.into(),
            alert: alert.into(),
            extra: None,
            priority: None,
            category: None,
        }
    }
}

/// Certificate material for one client application. Immutable once supplied;
/// owned by the connection manager it configures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppCredential {
    pub app_id: u32,
    pub bundle_id: String,
    /// True when the certificate is only valid against the sandbox gateway.
    pub sandbox: bool,
    pub certificate: Bytes,
    pub private_key: Bytes,
}

/// Which pair of Apple gateways a process talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Sandbox,
}

/// Push and feedback hostnames for one environment. Owned by the registry
/// rather than living in module-level statics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoints {
    pub push_host: String,
    pub feedback_host: String,
}

impl GatewayEndpoints {
    pub fn for_environment(env: Environment) -> Self {
        match env {
            Environment::Production => Self {
                push_host: "gateway.push.apple.com".to_string(),
                feedback_host: "feedback.push.apple.com".to_string(),
            },
            Environment::Sandbox => Self {
                push_host: "gateway.sandbox.push.apple.com".to_string(),
                feedback_host: "feedback.sandbox.push.apple.com".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_select_sandbox_hosts() {
        let eps = GatewayEndpoints::for_environment(Environment::Sandbox);
        assert_eq!(eps.push_host, "gateway.sandbox.push.apple.com");
        assert_eq!(eps.feedback_host, "feedback.sandbox.push.apple.com");

        let eps = GatewayEndpoints::for_environment(Environment::Production);
        assert_eq!(eps.push_host, "gateway.push.apple.com");
        assert_eq!(eps.feedback_host, "feedback.push.apple.com");
    }

    #[test]
    fn notification_serializes_without_empty_fields() {
        let note = Notification::new("ab12", "hello");
        let json = serde_json::to_value(&note).expect("serialize");
        assert!(json.get("extra").is_none());
        assert!(json.get("priority").is_none());
        assert!(json.get("category").is_none());
    }
}
