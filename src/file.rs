//! The UnixFS-like file layer: an out-of-scope collaborator used only
//! by `BaseStore::save_snapshot`/`load_from_snapshot` to store and retrieve
//! the single binary blob a snapshot is serialized into.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait FileLayer: Send + Sync {
	/// Adds `bytes` as a file, returning its content address as a string
	/// (an opaque path from this crate's point of view).
	async fn add(&self, bytes: Vec<u8>) -> Result<String>;

	/// Reads back a file previously returned by `add`.
	async fn get(&self, path: &str) -> Result<Vec<u8>>;
}

/// An in-process file layer backed by a `DashMap`, keyed by the same
/// dag-cbor content address scheme [`crate::block::MemBlockStore`] uses.
#[derive(Default)]
pub struct MemFileLayer {
	files: dashmap::DashMap<String, Vec<u8>>,
}

impl MemFileLayer {
	pub fn new() -> MemFileLayer {
		MemFileLayer::default()
	}
}

#[async_trait]
impl FileLayer for MemFileLayer {
	async fn add(&self, bytes: Vec<u8>) -> Result<String> {
		let cid = crate::entry::content_address(&bytes);
		let path = cid.to_string();
		self.files.insert(path.clone(), bytes);
		Ok(path)
	}

	async fn get(&self, path: &str) -> Result<Vec<u8>> {
		self.files
			.get(path)
			.map(|entry| entry.value().clone())
			.ok_or(crate::error::StoreError::NotFound)
	}
}
