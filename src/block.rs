//! The block/DAG service: an out-of-scope collaborator this crate
//! only ever calls through `put`/`get`. Entries are stored as dag-cbor
//! blocks; the concrete CID version/codec is the service's choice, not
//! this crate's.

use async_trait::async_trait;
use cid::Cid;

use crate::error::Result;

#[async_trait]
pub trait BlockStore: Send + Sync {
	async fn put(&self, bytes: Vec<u8>) -> Result<Cid>;
	async fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>>;
}

/// An in-process block store backed by a `DashMap`, useful for tests and
/// for embedding this crate without a real IPFS node.
#[derive(Default)]
pub struct MemBlockStore {
	blocks: dashmap::DashMap<Cid, Vec<u8>>,
}

impl MemBlockStore {
	pub fn new() -> MemBlockStore {
		MemBlockStore::default()
	}
}

#[async_trait]
impl BlockStore for MemBlockStore {
	async fn put(&self, bytes: Vec<u8>) -> Result<Cid> {
		let cid = crate::entry::content_address(&bytes);
		self.blocks.insert(cid, bytes);
		Ok(cid)
	}

	async fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>> {
		Ok(self.blocks.get(cid).map(|entry| entry.value().clone()))
	}
}
