//! Plugin catalog
//!
//! A static table of plugin factories, keyed by plugin id. The manager walks
//! it in order at startup; nothing is discovered at runtime.

use std::sync::Arc;

use anyhow::Result;

use crate::fault::guarded_sync;
use crate::sdk::Plugin;

pub type PluginFactory = Arc<dyn Fn() -> Result<Arc<dyn Plugin>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: Vec<(String, PluginFactory)>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory. A later registration under the same id replaces the
    /// earlier one in place.
    pub fn register<P, F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        P: Plugin + 'static,
        F: Fn() -> Result<P> + Send + Sync + 'static,
    {
        let id = id.into();
        let factory: PluginFactory = Arc::new(move || Ok(Arc::new(factory()?) as Arc<dyn Plugin>));
        match self.factories.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = factory,
            None => self.factories.push((id, factory)),
        }
        self
    }

    pub fn ids(&self) -> Vec<&str> {
        self.factories.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build every plugin in catalog order. A factory that fails or panics
    /// yields an `Err` for its id without affecting the others.
    pub fn instantiate(&self) -> Vec<(String, Result<Arc<dyn Plugin>, String>)> {
        self.factories
            .iter()
            .map(|(id, factory)| {
                let built = guarded_sync(|| factory()).map_err(|cause| cause.message());
                (id.clone(), built)
            })
            .collect()
    }
}
