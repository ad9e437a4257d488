//! Site adapter registry.
//!
//! The table is built once at startup and never mutated afterwards; the
//! engine only ever resolves from it.

pub mod json_ld;
pub mod selector;

pub use selector::{DetailSelectors, ListingSelectors, SelectorAdapter, SelectorSpec};

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ScanError;
use crate::traits::SiteAdapter;
use crate::types::SiteId;

pub struct SiteRegistry {
    adapters: HashMap<SiteId, Arc<dyn SiteAdapter>>,
}

impl SiteRegistry {
    pub fn builder() -> SiteRegistryBuilder {
        SiteRegistryBuilder::default()
    }

    /// Registry with the built-in presets for every supported board.
    pub fn with_defaults() -> Result<Self, ScanError> {
        Ok(Self::builder().with_defaults()?.build())
    }

    pub fn resolve(&self, site: &SiteId) -> Result<Arc<dyn SiteAdapter>, ScanError> {
        self.adapters
            .get(site)
            .cloned()
            .ok_or_else(|| ScanError::UnknownSite { site: site.clone() })
    }

    pub fn contains(&self, site: &SiteId) -> bool {
        self.adapters.contains_key(site)
    }

    /// Registered site ids, sorted.
    pub fn sites(&self) -> Vec<SiteId> {
        let mut sites: Vec<SiteId> = self.adapters.keys().cloned().collect();
        sites.sort();
        sites
    }
}

#[derive(Default)]
pub struct SiteRegistryBuilder {
    adapters: HashMap<SiteId, Arc<dyn SiteAdapter>>,
}

impl SiteRegistryBuilder {
    /// Register an adapter under its own site id. Replaces any previous one.
    pub fn register(mut self, adapter: impl SiteAdapter + 'static) -> Self {
        self.adapters
            .insert(adapter.site().clone(), Arc::new(adapter));
        self
    }

    pub fn register_arc(mut self, adapter: Arc<dyn SiteAdapter>) -> Self {
        self.adapters.insert(adapter.site().clone(), adapter);
        self
    }

    pub fn selector(self, site: impl Into<SiteId>, spec: SelectorSpec) -> Result<Self, ScanError> {
        Ok(self.register(SelectorAdapter::new(site, spec)?))
    }

    pub fn with_defaults(self) -> Result<Self, ScanError> {
        self.selector("linkedin", SelectorSpec::linkedin())?
            .selector("indeed", SelectorSpec::indeed())?
            .selector("remoteok", SelectorSpec::remoteok())?
            .selector("weworkremotely", SelectorSpec::weworkremotely())
    }

    pub fn build(self) -> SiteRegistry {
        SiteRegistry {
            adapters: self.adapters,
        }
    }
}
