//! Store-type factory registry: an explicit registry
//! object passed at construction rather than a process-wide singleton, so
//! embedding applications can register their own store subtypes without
//! touching global state.

use std::collections::HashMap;

use crate::error::{Result, StoreError};
use crate::store::{KvStore, EventLogStore, StoreHandle, StoreOptions};

/// A constructor for one store subtype, keyed by its type string (`"kv"`,
/// `"eventlog"`, ...).
pub type StoreFactory = Box<dyn Fn(StoreOptions) -> Result<StoreHandle> + Send + Sync>;

#[derive(Default)]
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    pub fn new() -> StoreRegistry {
        StoreRegistry::default()
    }

    /// A registry pre-populated with the built-in `kv` and `eventlog`
    /// subtypes.
    pub fn with_defaults() -> StoreRegistry {
        let mut registry = StoreRegistry::new();
        registry.register("kv", |opts| Ok(StoreHandle::Kv(KvStore::new(opts)?)));
        registry.register("eventlog", |opts| Ok(StoreHandle::EventLog(EventLogStore::new(opts)?)));
        registry
    }

    pub fn register<F>(&mut self, store_type: impl Into<String>, factory: F)
    where
        F: Fn(StoreOptions) -> Result<StoreHandle> + Send + Sync + 'static,
    {
        self.factories.insert(store_type.into(), Box::new(factory));
    }

    pub fn create(&self, store_type: &str, opts: StoreOptions) -> Result<StoreHandle> {
        let factory = self
            .factories
            .get(store_type)
            .ok_or_else(|| StoreError::LogInit(format!("unknown store type \"{}\"", store_type)))?;
        factory(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::SimpleAccessController;
    use crate::block::MemBlockStore;
    use crate::cache::MemCache;
    use crate::file::MemFileLayer;
    use crate::identity::Secp256k1IdentityProvider;
    use std::sync::Arc;

    #[test]
    fn creates_registered_store_types() {
        let provider = Secp256k1IdentityProvider::generate();
        let identity = provider.create_identity("userA").unwrap();
        let registry = StoreRegistry::with_defaults();

        let opts = StoreOptions::new(
            identity.clone(),
            Arc::new(provider),
            Arc::new(MemCache::new()),
            Arc::new(MemBlockStore::new()),
            Arc::new(MemFileLayer::new()),
            Arc::new(SimpleAccessController::owner_only(identity.pub_key())),
        );

        assert!(registry.create("kv", opts).is_ok());
        assert!(registry.create("nope", StoreOptions::minimal()).is_err());
    }
}
