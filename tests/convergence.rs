//! Two independently constructed stores, sharing only a block service and
//! an access policy, converge to the same state after exchanging heads
//! through `sync` — the scenario `BaseStore::load`/`sync`/the replicator
//! event loop exist to serve.

use std::sync::Arc;
use std::time::Duration;

use oplog_store::access::SimpleAccessController;
use oplog_store::block::MemBlockStore;
use oplog_store::cache::MemCache;
use oplog_store::file::MemFileLayer;
use oplog_store::identity::Secp256k1IdentityProvider;
use oplog_store::store::{Event, KvStore, StoreOptions};

const STORE_ID: &str = "shared-counter";

fn peer(blocks: Arc<MemBlockStore>, access: Arc<SimpleAccessController>) -> KvStore {
    let provider = Secp256k1IdentityProvider::generate();
    let identity = provider.create_identity("peer").unwrap();
    let opts = StoreOptions::new(identity, Arc::new(provider), Arc::new(MemCache::new()), blocks, Arc::new(MemFileLayer::new()), access).set_id(STORE_ID);
    KvStore::new(opts).unwrap()
}

async fn next_write(rx: &mut tokio::sync::mpsc::Receiver<Event>) -> oplog_store::LogEntry {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.expect("timed out waiting for a Write event") {
            Some(Event::Write(entry, _)) => return entry,
            Some(_) => continue,
            None => panic!("subscriber channel closed before a Write event arrived"),
        }
    }
}

async fn wait_for_ready(rx: &mut tokio::sync::mpsc::Receiver<Event>) {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.expect("timed out waiting for a Ready event") {
            Some(Event::Ready(_)) => return,
            Some(_) => continue,
            None => panic!("subscriber channel closed before a Ready event arrived"),
        }
    }
}

#[tokio::test]
async fn two_peers_converge_after_exchanging_heads() {
    let blocks = Arc::new(MemBlockStore::new());

    let a = peer(blocks.clone(), Arc::new(SimpleAccessController::new(["*".to_owned()])));
    let b = peer(blocks.clone(), Arc::new(SimpleAccessController::new(["*".to_owned()])));

    let (_a_sub, mut a_events) = a.subscribe().await;
    let (_b_sub, mut b_events) = b.subscribe().await;

    a.put("a", b"from-a".to_vec()).await.unwrap();
    let a_entry = next_write(&mut a_events).await;

    b.put("b", b"from-b".to_vec()).await.unwrap();
    let b_entry = next_write(&mut b_events).await;

    // exchange heads both ways
    b.sync(vec![a_entry]).await.unwrap();
    wait_for_ready(&mut b_events).await;

    a.sync(vec![b_entry]).await.unwrap();
    wait_for_ready(&mut a_events).await;

    let a_view = a.all().await;
    let b_view = b.all().await;

    assert_eq!(a_view.get("a"), Some(&b"from-a".to_vec()));
    assert_eq!(a_view.get("b"), Some(&b"from-b".to_vec()));
    assert_eq!(b_view.get("a"), Some(&b"from-a".to_vec()));
    assert_eq!(b_view.get("b"), Some(&b"from-b".to_vec()));
    assert_eq!(a_view.len(), b_view.len());
}

#[tokio::test]
async fn snapshot_restores_store_state_into_a_fresh_instance() {
    let blocks = Arc::new(MemBlockStore::new());
    let access = Arc::new(SimpleAccessController::new(["*".to_owned()]));
    let cache = Arc::new(MemCache::new());
    let files = Arc::new(MemFileLayer::new());

    let provider = Secp256k1IdentityProvider::generate();
    let identity = provider.create_identity("owner").unwrap();

    let original = KvStore::new(
        StoreOptions::new(identity, Arc::new(provider), cache.clone(), blocks.clone(), files.clone(), access.clone()).set_id(STORE_ID),
    )
    .unwrap();
    original.put("x", b"1".to_vec()).await.unwrap();
    original.put("y", b"2".to_vec()).await.unwrap();
    original.save_snapshot().await.unwrap();

    let provider = Secp256k1IdentityProvider::generate();
    let identity = provider.create_identity("owner").unwrap();
    let restored = KvStore::new(StoreOptions::new(identity, Arc::new(provider), cache, blocks, files, access).set_id(STORE_ID)).unwrap();
    assert!(restored.all().await.is_empty());

    restored.load_from_snapshot().await.unwrap();

    let view = restored.all().await;
    assert_eq!(view.get("x"), Some(&b"1".to_vec()));
    assert_eq!(view.get("y"), Some(&b"2".to_vec()));
    assert!(restored.stats().await.snapshot_bytes_loaded > 0);
}
