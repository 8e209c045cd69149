//! Process-wide directory of connection managers, one per application.
//!
//! Owned by the hosting process instead of living in module state, so its
//! lifecycle (`new`, `launch`, `close_all`) is explicit.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::DispatchConfig;
use crate::diag::SinkProvider;
use crate::gateway::{FeedbackService, GatewayConnector};
use crate::manager::{ConnectionManager, LaunchError, Status};
use crate::types::{AppCredential, Environment, GatewayEndpoints, Notification};

pub struct Registry {
    endpoints: GatewayEndpoints,
    config: DispatchConfig,
    connector: Arc<dyn GatewayConnector>,
    feedback: Arc<dyn FeedbackService>,
    sinks: Arc<dyn SinkProvider>,
    managers: RwLock<HashMap<u32, Arc<ConnectionManager>>>,
}

impl Registry {
    pub fn new(
        environment: Environment,
        connector: Arc<dyn GatewayConnector>,
        feedback: Arc<dyn FeedbackService>,
        sinks: Arc<dyn SinkProvider>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            endpoints: GatewayEndpoints::for_environment(environment),
            config,
            connector,
            feedback,
            sinks,
            managers: RwLock::new(HashMap::new()),
        }
    }

    /// Create (or reuse) the manager for one application and bring it up.
    /// A no-op when push is disabled for the app. The manager is registered
    /// only once launch succeeds; a failed launch may be retried later.
    pub async fn launch(
        &self,
        app_id: u32,
        bundle_id: &str,
        push_enabled: bool,
        credential: Option<AppCredential>,
        logging: bool,
    ) -> Result<(), LaunchError> {
        if !push_enabled {
            debug!(app_id, bundle = bundle_id, "push disabled, skipping launch");
            return Ok(());
        }

        // Reuse the registered manager when it is already running or when
        // the caller brought no new credential; otherwise build a fresh one
        // so a later launch can supply (or rotate) certificate material for
        // an app that previously had none.
        let manager = match self.lookup(app_id) {
            Some(existing) if existing.status() == Status::Active || credential.is_none() => {
                existing
            }
            _ => Arc::new(ConnectionManager::new(
                app_id,
                bundle_id,
                credential,
                self.endpoints.clone(),
                self.config.clone(),
                Arc::clone(&self.connector),
                Arc::clone(&self.feedback),
                Arc::clone(&self.sinks),
            )),
        };

        manager.launch(logging).await?;
        info!(app_id, bundle = bundle_id, status = ?manager.status(), "connection launched");
        self.register(app_id, manager);
        Ok(())
    }

    pub fn register(&self, app_id: u32, manager: Arc<ConnectionManager>) {
        self.managers.write().insert(app_id, manager);
    }

    pub fn lookup(&self, app_id: u32) -> Option<Arc<ConnectionManager>> {
        self.managers.read().get(&app_id).cloned()
    }

    /// Forward one notification to the application's manager. Unknown apps
    /// and inactive managers drop the item, matching the detached,
    /// fire-and-forget submission contract.
    pub async fn submit(&self, app_id: u32, item: Notification) {
        if let Some(manager) = self.lookup(app_id) {
            manager.submit(item).await;
        }
    }

    pub fn close(&self, app_id: u32) {
        if let Some(manager) = self.lookup(app_id) {
            manager.close();
        }
    }

    /// Close every live manager; called at process shutdown.
    pub fn close_all(&self) {
        for manager in self.managers.read().values() {
            manager.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::MemorySink;
    use crate::gateway::mock::MockGateway;
    use crate::manager::Status;
    use bytes::Bytes;

    fn credential(app_id: u32) -> AppCredential {
        AppCredential {
            app_id,
            bundle_id: format!("app-{app_id}"),
            sandbox: true,
            certificate: Bytes::from_static(b"cert"),
            private_key: Bytes::from_static(b"key"),
        }
    }

    fn registry(gateway: &MockGateway) -> Registry {
        Registry::new(
            Environment::Sandbox,
            Arc::new(gateway.clone()),
            Arc::new(gateway.clone()),
            Arc::new(MemorySink::new()),
            DispatchConfig::default(),
        )
    }

    #[tokio::test]
    async fn lookup_of_unknown_app_is_none() {
        let gateway = MockGateway::new(false);
        let registry = registry(&gateway);
        assert!(registry.lookup(7).is_none());
    }

    #[tokio::test]
    async fn push_disabled_registers_nothing() {
        let gateway = MockGateway::new(false);
        let registry = registry(&gateway);
        registry
            .launch(1, "app-1", false, Some(credential(1)), false)
            .await
            .expect("launch ok");
        assert!(registry.lookup(1).is_none());
        assert_eq!(gateway.connects(), 0);
    }

    #[tokio::test]
    async fn missing_credential_registers_a_no_certs_manager() {
        let gateway = MockGateway::new(false);
        let registry = registry(&gateway);
        registry
            .launch(2, "app-2", true, None, false)
            .await
            .expect("launch ok");
        let manager = registry.lookup(2).expect("registered");
        assert_eq!(manager.status(), Status::NoCerts);
        assert_eq!(gateway.connects(), 0);
    }

    #[tokio::test]
    async fn later_credential_replaces_a_no_certs_manager() {
        let gateway = MockGateway::new(false);
        let registry = registry(&gateway);
        registry
            .launch(3, "app-3", true, None, false)
            .await
            .expect("launch without certs");
        assert_eq!(registry.lookup(3).expect("registered").status(), Status::NoCerts);

        registry
            .launch(3, "app-3", true, Some(credential(3)), false)
            .await
            .expect("relaunch with certs");
        let manager = registry.lookup(3).expect("registered");
        assert_eq!(manager.status(), Status::Active);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while gateway.connects() < 2 {
            assert!(
                std::time::Instant::now() < deadline,
                "workers never connected"
            );
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        manager.close();
    }

    #[tokio::test]
    async fn relaunch_without_credential_reuses_the_manager() {
        let gateway = MockGateway::new(false);
        let registry = registry(&gateway);
        registry
            .launch(4, "app-4", true, Some(credential(4)), false)
            .await
            .expect("launch");
        let first = registry.lookup(4).expect("registered");
        first.close();

        registry
            .launch(4, "app-4", true, None, false)
            .await
            .expect("relaunch");
        let second = registry.lookup(4).expect("registered");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.status(), Status::Active);
        second.close();
    }

    #[tokio::test]
    async fn close_all_demotes_every_active_manager() {
        let gateway = MockGateway::new(false);
        let registry = registry(&gateway);
        for app_id in [1u32, 2] {
            registry
                .launch(app_id, &format!("app-{app_id}"), true, Some(credential(app_id)), false)
                .await
                .expect("launch ok");
        }
        registry.close_all();
        for app_id in [1u32, 2] {
            let manager = registry.lookup(app_id).expect("registered");
            assert_eq!(manager.status(), Status::CertsFound);
        }
    }
}
