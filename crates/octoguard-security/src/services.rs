use octoguard_storage::{BackendKind, DynStore, KvStore};

use crate::audit::AuditTrail;
use crate::config::SecurityConfig;
use crate::csrf::CsrfTokenManager;
use crate::create_store;
use crate::ip_guard::IpGuard;

/// The three services wired to one shared store.
///
/// Cloning is cheap; every clone shares the same store handle.
#[derive(Clone)]
pub struct SecurityServices {
    pub store: DynStore,
    pub csrf: CsrfTokenManager,
    pub ip_guard: IpGuard,
    pub audit: AuditTrail,
}

impl SecurityServices {
    /// Picks a store with [`create_store`] and builds the services on it.
    pub async fn from_config(config: &SecurityConfig) -> Self {
        let store = create_store(&config.redis).await;
        Self::with_store(store, config)
    }

    /// Builds the services on an existing store.
    pub fn with_store(store: DynStore, config: &SecurityConfig) -> Self {
        let audit = AuditTrail::new(store.clone(), &config.audit);
        let csrf = CsrfTokenManager::new(store.clone(), &config.csrf).with_audit(audit.clone());
        let ip_guard = IpGuard::new(store.clone(), &config.ip_guard).with_audit(audit.clone());

        tracing::info!(backend = %store.backend(), "security services ready");

        Self {
            store,
            csrf,
            ip_guard,
            audit,
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.store.backend()
    }

    /// Closes the shared store. Safe to call more than once.
    pub async fn shutdown(&self) {
        if let Err(e) = self.store.close().await {
            tracing::warn!(error = %e, "failed to close security store");
        } else {
            tracing::info!("security store closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octoguard_storage::StoreError;

    #[tokio::test]
    async fn test_from_default_config_is_fallback() {
        let services = SecurityServices::from_config(&SecurityConfig::default()).await;
        assert_eq!(services.backend(), BackendKind::Fallback);
    }

    #[tokio::test]
    async fn test_shutdown_closes_store() {
        let services = SecurityServices::from_config(&SecurityConfig::default()).await;
        services.shutdown().await;
        services.shutdown().await;

        assert!(matches!(
            services.store.get("anything").await,
            Err(StoreError::Closed)
        ));
    }
}
