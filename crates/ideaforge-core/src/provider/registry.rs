//! Provider registry for runtime adapter lookup.

use std::collections::BTreeMap;

use ideaforge_types::provider::ProviderKind;

use super::box_adapter::BoxProviderAdapter;

/// Registry of available provider adapters, keyed by [`ProviderKind`].
///
/// The set of providers is fixed once the router is built.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    adapters: BTreeMap<ProviderKind, BoxProviderAdapter>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own kind, replacing any previous one.
    pub fn register(&mut self, adapter: BoxProviderAdapter) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&BoxProviderAdapter> {
        self.adapters.get(&kind)
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    /// Registered kinds in `ProviderKind` order.
    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.adapters.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProviderKind, &BoxProviderAdapter)> {
        self.adapters.iter().map(|(kind, adapter)| (*kind, adapter))
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
