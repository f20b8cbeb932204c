//! Name-keyed set of service adapters.

use crate::adapter::{AdapterInfo, ServiceAdapter};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Adapters by service name.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn ServiceAdapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.adapters.keys()).finish()
    }
}

impl AdapterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under its `info().service_name`.
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn register(&mut self, adapter: Arc<dyn ServiceAdapter>) {
        let name = adapter.info().service_name;
        self.adapters.insert(name, adapter);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn ServiceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Looks up an adapter.
    #[must_use]
    pub fn get(&self, service_name: &str) -> Option<Arc<dyn ServiceAdapter>> {
        self.adapters.get(service_name).cloned()
    }

    /// Capability descriptors of all adapters, ordered by service name.
    #[must_use]
    pub fn infos(&self) -> Vec<AdapterInfo> {
        self.adapters.values().map(|a| a.info()).collect()
    }

    /// Registered service names, ordered.
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedAdapter;

    #[test]
    fn lookup_by_service_name() {
        let registry = AdapterRegistry::new()
            .with(Arc::new(ScriptedAdapter::new("reddit")))
            .with(Arc::new(ScriptedAdapter::new("gmail")));

        assert!(registry.get("reddit").is_some());
        assert!(registry.get("slack").is_none());
        assert_eq!(registry.service_names().collect::<Vec<_>>(), vec!["gmail", "reddit"]);
        assert_eq!(registry.infos().len(), 2);
    }
}
