//! Provider name to adapter mapping.

use castline_config::{ProviderConfig, ProviderMode};
use castline_core::{Provider, ProviderAdapter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::{DryRunAdapter, ProviderError, RelayAdapter};

/// Adapters for each configured provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every supported provider backed by the dry-run adapter.
    pub fn dry_run() -> Self {
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(DryRunAdapter::new());
        let mut registry = Self::new();
        for provider in Provider::ALL {
            registry.register(provider, adapter.clone());
        }
        registry
    }

    /// Build adapters from `provider` config blocks.
    pub fn from_config(configs: &[ProviderConfig]) -> Result<Self, ProviderError> {
        let mut registry = Self::new();
        for config in configs {
            let provider: Provider = config
                .name
                .parse()
                .map_err(|_| ProviderError::UnknownProvider(config.name.clone()))?;
            let adapter: Arc<dyn ProviderAdapter> = match &config.mode {
                ProviderMode::DryRun => Arc::new(DryRunAdapter::new()),
                ProviderMode::Relay {
                    endpoint,
                    token,
                    timeout,
                } => Arc::new(RelayAdapter::new(endpoint.clone(), token.clone(), *timeout)?),
            };
            info!(provider = %provider, adapter = adapter.name(), "Registered provider adapter");
            registry.register(provider, adapter);
        }
        Ok(registry)
    }

    pub fn register(&mut self, provider: Provider, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(provider, adapter);
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<&str> = self.adapters.keys().map(|p| p.as_str()).collect();
        providers.sort_unstable();
        f.debug_struct("ProviderRegistry")
            .field("providers", &providers)
            .finish()
    }
}
