//! `KvStore`: a key/value database — `Put`/`Delete`/`Get`/`All` built on
//! `BaseStore<KvIndex>`, matching go-orbit-db's `orbitDBKeyValue`.

use cid::Cid;

use crate::error::Result;
use crate::index::KvIndex;
use crate::operation::Operation;

use super::{BaseStore, Event, StoreOptions};

pub const STORE_TYPE: &str = "keyvalue";

/// A convergent key/value map replicated over an operation log. `Put` and
/// `Delete` append `PUT`/`DEL` operations; later entries (by the log's
/// canonical order) win on conflicting keys.
#[derive(Clone)]
pub struct KvStore {
    base: BaseStore<KvIndex>,
}

impl KvStore {
    pub fn new(opts: StoreOptions) -> Result<KvStore> {
        let base = BaseStore::init(opts, STORE_TYPE, KvIndex::new())?;
        Ok(KvStore { base })
    }

    pub fn id(&self) -> &str {
        self.base.id()
    }

    pub async fn put(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Result<Cid> {
        self.base.add_operation(&Operation::put(key, value)).await
    }

    pub async fn delete(&self, key: impl Into<String>) -> Result<Cid> {
        self.base.add_operation(&Operation::del(key)).await
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.base.with_index(|index| index.get(key).map(|v| v.to_vec())).await
    }

    pub async fn all(&self) -> std::collections::HashMap<String, Vec<u8>> {
        self.base.with_index(|index| index.all().clone()).await
    }

    pub async fn load(&self, amount: Option<i64>) -> Result<()> {
        self.base.load(amount).await
    }

    pub async fn sync(&self, heads: Vec<crate::entry::LogEntry>) -> Result<()> {
        self.base.sync(heads).await
    }

    pub async fn save_snapshot(&self) -> Result<String> {
        self.base.save_snapshot().await
    }

    pub async fn load_from_snapshot(&self) -> Result<()> {
        self.base.load_from_snapshot().await
    }

    pub async fn close(&self) -> Result<()> {
        self.base.close().await
    }

    pub async fn drop_store(&self) -> Result<()> {
        self.base.drop_store().await
    }

    pub async fn subscribe(&self) -> (super::SubscriberId, tokio::sync::mpsc::Receiver<Event>) {
        self.base.subscribe().await
    }

    pub async fn unsubscribe(&self, id: super::SubscriberId) {
        self.base.unsubscribe(id).await
    }

    pub async fn replication_status(&self) -> super::ReplicationInfo {
        self.base.replication_status().await
    }

    pub async fn stats(&self) -> super::StoreStats {
        self.base.stats().await
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

    fn fixture() -> KvStore {
        let provider = Secp256k1IdentityProvider::generate();
        let identity = provider.create_identity("userA").unwrap();
        let access = Arc::new(SimpleAccessController::owner_only(identity.pub_key()));
        let opts = StoreOptions::new(identity, Arc::new(provider), Arc::new(MemCache::new()), Arc::new(MemBlockStore::new()), Arc::new(MemFileLayer::new()), access);
        KvStore::new(opts).unwrap()
    }

    #[tokio::test]
    async fn put_then_overwrite_then_delete() {
        let store = fixture();
        store.put("a", b"1".to_vec()).await.unwrap();
        store.put("b", b"2".to_vec()).await.unwrap();
        store.put("a", b"3".to_vec()).await.unwrap();
        store.delete("b").await.unwrap();

        assert_eq!(store.get("a").await, Some(b"3".to_vec()));
        assert_eq!(store.get("b").await, None);
        assert_eq!(store.all().await.len(), 1);
    }
}
