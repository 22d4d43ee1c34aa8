use std::{collections::HashMap, sync::Arc};

use bank_providers::{BankProvider, ProviderKind};

use crate::lifecycle::LifecycleError;

/// The configured providers, keyed by kind.
pub struct ProviderRegistry<P> {
    providers: HashMap<ProviderKind, Arc<P>>,
}

impl<P> Clone for ProviderRegistry<P> {
    fn clone(&self) -> Self {
        Self { providers: self.providers.clone() }
    }
}

impl<P> Default for ProviderRegistry<P> {
    fn default() -> Self {
        Self { providers: HashMap::new() }
    }
}

impl<P: BankProvider> ProviderRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the provider under its own kind, replacing any provider of the same kind.
    pub fn with_provider(mut self, provider: P) -> Self {
        self.providers.insert(provider.kind(), Arc::new(provider));
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<&P, LifecycleError> {
        self.providers.get(&kind).map(|p| p.as_ref()).ok_or(LifecycleError::ProviderNotConfigured(kind))
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds = self.providers.keys().copied().collect::<Vec<_>>();
        kinds.sort();
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
