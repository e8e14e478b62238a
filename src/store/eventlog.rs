//! `EventLogStore`: an append-only, ordered sequence of `ADD`ed values —
//! the index *is* the log's canonical order, with `gt`/`gte`/`lt`/`lte`
//! range queries over it.

use cid::Cid;

use crate::error::Result;
use crate::index::{Bound, EventLogIndex};
use crate::operation::Operation;

use super::{BaseStore, Event, StoreOptions};

pub const STORE_TYPE: &str = "eventlog";

/// An append-only event log replicated over an operation log. `Add`
/// appends an `ADD` operation; `iterator` ranges over the canonically
/// ordered entries it produces.
#[derive(Clone)]
pub struct EventLogStore {
    base: BaseStore<EventLogIndex>,
}

impl EventLogStore {
    pub fn new(opts: StoreOptions) -> Result<EventLogStore> {
        let base = BaseStore::init(opts, STORE_TYPE, EventLogIndex::new())?;
        Ok(EventLogStore { base })
    }

    pub fn id(&self) -> &str {
        self.base.id()
    }

    pub async fn add(&self, value: impl Into<Vec<u8>>) -> Result<Cid> {
        self.base.add_operation(&Operation::add(value)).await
    }

    pub async fn get(&self, hash: &Cid) -> Option<Vec<u8>> {
        self.base.with_index(|index| index.get(hash).map(|v| v.to_vec())).await
    }

    pub async fn len(&self) -> usize {
        self.base.with_index(|index| index.len()).await
    }

    pub async fn is_empty(&self) -> bool {
        self.base.with_index(|index| index.is_empty()).await
    }

    /// Range query over the ordered entry list: `amount`
    /// negative means "all matching entries", non-negative caps the
    /// result (default `1`).
    pub async fn iterator(&self, bound: Bound<'_>, amount: Option<i64>) -> Vec<(Cid, Vec<u8>)> {
        self.base
            .with_index(|index| index.range(bound, amount).into_iter().map(|(h, v)| (*h, v.clone())).collect())
            .await
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

    fn fixture() -> EventLogStore {
        let provider = Secp256k1IdentityProvider::generate();
        let identity = provider.create_identity("userA").unwrap();
        let access = Arc::new(SimpleAccessController::owner_only(identity.pub_key()));
        let opts = StoreOptions::new(identity, Arc::new(provider), Arc::new(MemCache::new()), Arc::new(MemBlockStore::new()), Arc::new(MemFileLayer::new()), access);
        EventLogStore::new(opts).unwrap()
    }

    #[tokio::test]
    async fn range_queries_cover_all_bound_kinds() {
        let store = fixture();
        let mut hashes = Vec::new();
        for i in 0..5 {
            hashes.push(store.add(format!("e{}", i).into_bytes()).await.unwrap());
        }

        assert_eq!(store.iterator(Bound::GreaterThanOrEqual(&hashes[4]), None).await.len(), 1);
        assert_eq!(store.iterator(Bound::GreaterThan(&hashes[4]), None).await.len(), 0);
        assert_eq!(store.iterator(Bound::GreaterThanOrEqual(&hashes[3]), None).await.len(), 2);
        assert_eq!(store.iterator(Bound::GreaterThanOrEqual(&hashes[0]), None).await.len(), 5);
        assert_eq!(store.iterator(Bound::GreaterThan(&hashes[0]), None).await.len(), 4);

        assert_eq!(store.iterator(Bound::LessThan(&hashes[4]), None).await.len(), 1);
        assert_eq!(store.iterator(Bound::LessThan(&hashes[4]), Some(-1)).await.len(), 4);
        assert_eq!(store.iterator(Bound::LessThan(&hashes[4]), Some(3)).await.len(), 3);

        assert_eq!(store.iterator(Bound::LessThanOrEqual(&hashes[0]), None).await.len(), 1);
        assert_eq!(store.iterator(Bound::LessThanOrEqual(&hashes[4]), Some(-1)).await.len(), 5);
        assert_eq!(store.iterator(Bound::LessThanOrEqual(&hashes[4]), Some(3)).await.len(), 3);
    }
}
