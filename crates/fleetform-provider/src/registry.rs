//! Provider registry
//!
//! Maps provider packages to factories and keeps one configured instance per
//! (package, configuration). Resources that share a configuration share the
//! instance; each call through it is still independent.

use crate::error::{ProviderError, Result};
use crate::handle::ProviderHandle;
use crate::host::Host;
use crate::provider::Provider;
use crate::types::{CheckRequest, ConfigureRequest, DiffRequest};
use fleetform_resource::{PropertyMap, Urn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

type ProviderFactory = Arc<dyn Fn(Arc<dyn Host>) -> Arc<dyn Provider> + Send + Sync>;

/// Identity of a provider instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderKey {
    pub package: String,

    /// Canonical JSON of the configuration
    pub fingerprint: String,
}

impl ProviderKey {
    pub fn new(package: impl Into<String>, config: &PropertyMap) -> Self {
        Self {
            package: package.into(),
            fingerprint: config.to_json().to_string(),
        }
    }
}

pub struct ProviderRegistry {
    host: Arc<dyn Host>,
    factories: HashMap<String, ProviderFactory>,
    instances: Mutex<HashMap<ProviderKey, ProviderHandle>>,
}

impl ProviderRegistry {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            factories: HashMap::new(),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Register a factory for a provider package
    pub fn register<F>(&mut self, package: impl Into<String>, factory: F)
    where
        F: Fn(Arc<dyn Host>) -> Arc<dyn Provider> + Send + Sync + 'static,
    {
        self.factories.insert(package.into(), Arc::new(factory));
    }

    pub fn has_package(&self, package: &str) -> bool {
        self.factories.contains_key(package)
    }

    /// Resolve the instance for `package` + `config`, configuring it on first use
    ///
    /// CheckConfig, then DiffConfig (when `prior_config` is known), then
    /// Configure all complete before the handle is returned, so they
    /// happen-before any resource-scoped call routed to the instance.
    pub async fn get_or_configure(
        &self,
        package: &str,
        config: &PropertyMap,
        prior_config: Option<&PropertyMap>,
    ) -> Result<ProviderHandle> {
        let key = ProviderKey::new(package, config);
        let mut instances = self.instances.lock().await;
        if let Some(handle) = instances.get(&key) {
            return Ok(handle.clone());
        }

        let factory = self
            .factories
            .get(package)
            .ok_or_else(|| ProviderError::UnknownPackage(package.to_string()))?;
        let handle = ProviderHandle::new(key.clone(), factory(self.host.clone()));
        let urn = provider_urn(package);

        let checked = handle
            .check_config(CheckRequest {
                urn: urn.clone(),
                type_token: package.to_string(),
                name: "default".to_string(),
                olds: prior_config.cloned().unwrap_or_default(),
                news: config.clone(),
                random_seed: Vec::new(),
            })
            .await?;
        if !checked.is_ok() {
            return Err(ProviderError::InvalidConfig {
                package: package.to_string(),
                failures: checked.failures,
            });
        }

        if let Some(prior) = prior_config {
            let diff = handle
                .diff_config(DiffRequest {
                    id: String::new(),
                    urn,
                    type_token: package.to_string(),
                    name: "default".to_string(),
                    olds: prior.clone(),
                    news: checked.inputs.clone(),
                    ignore_changes: Vec::new(),
                })
                .await?;
            tracing::debug!(
                "Provider {} configuration change: {}",
                package,
                diff.classification
            );
        }

        handle
            .configure(ConfigureRequest {
                variables: checked.inputs,
            })
            .await?;
        tracing::info!("Configured provider {} {}", handle.name(), handle.version());

        instances.insert(key, handle.clone());
        Ok(handle)
    }

    /// Every instance configured so far
    pub async fn handles(&self) -> Vec<ProviderHandle> {
        let instances = self.instances.lock().await;
        let mut handles: Vec<_> = instances.values().cloned().collect();
        handles.sort_by(|a, b| a.key().cmp(b.key()));
        handles
    }

    /// Plugin name → version of every configured instance
    pub async fn plugin_versions(&self) -> BTreeMap<String, String> {
        self.handles()
            .await
            .iter()
            .map(|h| (h.name().to_string(), h.version().to_string()))
            .collect()
    }
}

fn provider_urn(package: &str) -> Urn {
    Urn::new(
        "fleetform",
        "providers",
        None,
        &format!("fleetform:providers:{}", package),
        "default",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::TracingHost;
    use crate::types::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Records the order of provider-scoped calls
    #[derive(Default)]
    struct RecordingProvider {
        calls: StdMutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl Provider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        fn version(&self) -> &str {
            "1.2.3"
        }

        async fn check_config(&self, request: CheckRequest) -> Result<CheckResponse> {
            self.calls.lock().unwrap().push("check_config");
            if request.news.get("region").is_none() {
                return Ok(CheckResponse {
                    inputs: request.news,
                    failures: vec![CheckFailure::new("region", "region is required")],
                });
            }
            Ok(CheckResponse::ok(request.news))
        }

        async fn diff_config(&self, _request: DiffRequest) -> Result<DiffResponse> {
            self.calls.lock().unwrap().push("diff_config");
            Ok(DiffResponse::no_change())
        }

        async fn configure(&self, _request: ConfigureRequest) -> Result<()> {
            self.calls.lock().unwrap().push("configure");
            Ok(())
        }

        async fn check(&self, request: CheckRequest) -> Result<CheckResponse> {
            Ok(CheckResponse::ok(request.news))
        }

        async fn diff(&self, _request: DiffRequest) -> Result<DiffResponse> {
            Ok(DiffResponse::no_change())
        }

        async fn create(&self, request: CreateRequest) -> Result<CreateResponse> {
            Ok(CreateResponse {
                id: Some("id".to_string()),
                properties: request.properties,
            })
        }

        async fn read(&self, _request: ReadRequest) -> Result<ReadResponse> {
            Ok(ReadResponse::gone())
        }

        async fn update(&self, request: UpdateRequest) -> Result<UpdateResponse> {
            Ok(UpdateResponse {
                properties: request.news,
            })
        }

        async fn delete(&self, _request: DeleteRequest) -> Result<()> {
            Ok(())
        }
    }

    fn registry(provider: Arc<RecordingProvider>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new(Arc::new(TracingHost));
        registry.register("recording", move |_host| provider.clone() as Arc<dyn Provider>);
        registry
    }

    #[tokio::test]
    async fn test_instances_are_shared_per_configuration() {
        let provider = Arc::new(RecordingProvider::default());
        let registry = registry(provider.clone());
        let config = PropertyMap::new().with("region", "tk1a");

        let a = registry.get_or_configure("recording", &config, None).await.unwrap();
        let b = registry.get_or_configure("recording", &config, None).await.unwrap();
        assert_eq!(a.key(), b.key());
        assert!(a.is_configured());
        assert_eq!(*provider.calls.lock().unwrap(), vec!["check_config", "configure"]);

        let other = PropertyMap::new().with("region", "is1a");
        registry.get_or_configure("recording", &other, None).await.unwrap();
        assert_eq!(registry.handles().await.len(), 2);
        assert_eq!(
            registry.plugin_versions().await.get("recording"),
            Some(&"1.2.3".to_string())
        );
    }

    #[tokio::test]
    async fn test_diff_config_runs_between_check_and_configure() {
        let provider = Arc::new(RecordingProvider::default());
        let registry = registry(provider.clone());
        let prior = PropertyMap::new().with("region", "tk1a");
        let config = PropertyMap::new().with("region", "is1a");

        registry
            .get_or_configure("recording", &config, Some(&prior))
            .await
            .unwrap();
        assert_eq!(
            *provider.calls.lock().unwrap(),
            vec!["check_config", "diff_config", "configure"]
        );
    }

    #[tokio::test]
    async fn test_invalid_config_is_never_configured() {
        let provider = Arc::new(RecordingProvider::default());
        let registry = registry(provider.clone());

        let result = registry
            .get_or_configure("recording", &PropertyMap::new(), None)
            .await;
        assert!(matches!(result, Err(ProviderError::InvalidConfig { .. })));
        assert_eq!(*provider.calls.lock().unwrap(), vec!["check_config"]);
        assert!(registry.handles().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_package() {
        let registry = ProviderRegistry::new(Arc::new(TracingHost));
        let result = registry
            .get_or_configure("missing", &PropertyMap::new(), None)
            .await;
        assert!(matches!(result, Err(ProviderError::UnknownPackage(_))));
    }
}
