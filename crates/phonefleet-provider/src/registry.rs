//! Provider registry
//!
//! Maps each [`ProviderType`] to at most one adapter. Built once at startup
//! and shared (`Arc`) with the reconciliation services.

use crate::error::{ProviderError, Result};
use crate::provider::DeviceProvider;
use crate::types::ProviderType;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<ProviderType, Arc<dyn DeviceProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own provider type
    ///
    /// A second registration for the same type replaces the first.
    pub fn register(&self, provider: Arc<dyn DeviceProvider>) {
        let provider_type = provider.provider_type();
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if providers.insert(provider_type, provider).is_some() {
            tracing::warn!(provider = %provider_type, "Provider already registered, replacing");
        } else {
            tracing::info!(provider = %provider_type, "Provider registered");
        }
    }

    pub fn get(&self, provider_type: ProviderType) -> Result<Arc<dyn DeviceProvider>> {
        self.read()
            .get(&provider_type)
            .cloned()
            .ok_or(ProviderError::NotRegistered(provider_type))
    }

    pub fn is_available(&self, provider_type: ProviderType) -> bool {
        self.read().contains_key(&provider_type)
    }

    /// Registered adapters, ordered by provider type
    pub fn list(&self) -> Vec<Arc<dyn DeviceProvider>> {
        let providers = self.read();
        sorted_types(&providers)
            .into_iter()
            .filter_map(|t| providers.get(&t).cloned())
            .collect()
    }

    /// Registered provider types, in declaration order
    pub fn types(&self) -> Vec<ProviderType> {
        sorted_types(&self.read())
    }

    /// Registered providers whose state is owned by a cloud vendor
    pub fn cloud_types(&self) -> Vec<ProviderType> {
        self.types().into_iter().filter(|t| t.is_cloud()).collect()
    }

    fn read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<ProviderType, Arc<dyn DeviceProvider>>> {
        self.providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn sorted_types(providers: &HashMap<ProviderType, Arc<dyn DeviceProvider>>) -> Vec<ProviderType> {
    let mut types: Vec<_> = providers.keys().copied().collect();
    types.sort();
    types
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ConnectionInfo, DeviceCapabilities, DeviceCreateConfig, DeviceStatus, ProviderDevice,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tracing_subscriber::fmt::MakeWriter;

    struct Stub {
        provider_type: ProviderType,
        tag: &'static str,
        caps: DeviceCapabilities,
    }

    impl Stub {
        fn new(provider_type: ProviderType, tag: &'static str) -> Arc<dyn DeviceProvider> {
            Arc::new(Self {
                provider_type,
                tag,
                caps: DeviceCapabilities::default(),
            })
        }
    }

    #[async_trait]
    impl DeviceProvider for Stub {
        fn provider_type(&self) -> ProviderType {
            self.provider_type
        }

        async fn create(&self, _config: &DeviceCreateConfig) -> Result<ProviderDevice> {
            Err(ProviderError::terminal("Stub", self.tag))
        }

        async fn start(&self, _device_id: &str) -> Result<()> {
            Ok(())
        }

        async fn stop(&self, _device_id: &str) -> Result<()> {
            Ok(())
        }

        async fn destroy(&self, _device_id: &str) -> Result<()> {
            Ok(())
        }

        async fn get_status(&self, _device_id: &str) -> Result<DeviceStatus> {
            Ok(DeviceStatus::Running)
        }

        async fn get_connection_info(&self, _device_id: &str) -> Result<ConnectionInfo> {
            Err(ProviderError::terminal("Stub", self.tag))
        }

        fn capabilities(&self) -> &DeviceCapabilities {
            &self.caps
        }
    }

    #[test]
    fn test_unregistered_type() {
        let registry = ProviderRegistry::new();
        assert!(!registry.is_available(ProviderType::Redroid));
        assert_eq!(
            registry.get(ProviderType::Redroid).err(),
            Some(ProviderError::NotRegistered(ProviderType::Redroid))
        );
    }

    /// Collects formatted log output in memory
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn lines(&self) -> Vec<String> {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf).lines().map(str::to_string).collect()
        }
    }

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration_replaces_and_warns() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();

        let registry = ProviderRegistry::new();
        tracing::subscriber::with_default(subscriber, || {
            registry.register(Stub::new(ProviderType::HuaweiCph, "first"));
            registry.register(Stub::new(ProviderType::HuaweiCph, "second"));
        });

        let warnings: Vec<_> = captured
            .lines()
            .into_iter()
            .filter(|l| l.contains("WARN"))
            .collect();
        assert_eq!(warnings.len(), 1, "{:?}", warnings);
        assert!(warnings[0].contains("Provider already registered"));
        assert!(warnings[0].contains("huawei_cph"));

        assert_eq!(registry.types(), vec![ProviderType::HuaweiCph]);
        assert_eq!(registry.list().len(), 1);
        let provider = registry.get(ProviderType::HuaweiCph).unwrap();
        let err = provider
            .create(&DeviceCreateConfig::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::terminal("Stub", "second"));
    }

    #[test]
    fn test_cloud_types_filters_local_backends() {
        let registry = ProviderRegistry::new();
        registry.register(Stub::new(ProviderType::Physical, "p"));
        registry.register(Stub::new(ProviderType::AliyunEcp, "a"));
        registry.register(Stub::new(ProviderType::Redroid, "r"));
        registry.register(Stub::new(ProviderType::HuaweiCph, "h"));

        assert_eq!(registry.types().len(), 4);
        let adapters: Vec<_> = registry
            .list()
            .iter()
            .map(|p| p.provider_type())
            .collect();
        assert_eq!(
            adapters,
            vec![
                ProviderType::Redroid,
                ProviderType::HuaweiCph,
                ProviderType::AliyunEcp,
                ProviderType::Physical
            ]
        );
        assert_eq!(
            registry.cloud_types(),
            vec![ProviderType::HuaweiCph, ProviderType::AliyunEcp]
        );
    }
}
