//! Binary snapshot serialization/restoration: a store's full state
//! — heads, entries, and the replicator's unfinished queue — streamed
//! through the file layer as one big-endian length-prefixed blob.
//!
//! Wire format: `u16-BE(header_len) || header_json || (u16-BE(entry_len) ||
//! entry_json){size} || 0x00`. `header_json` carries `{id, heads, size,
//! type}`, mirroring go-orbit-db's `storeSnapshot` struct.

use std::collections::HashMap;
use std::sync::Arc;

use cid::Cid;
use serde::{Deserialize, Serialize};

use crate::access::AccessController;
use crate::cache::Cache;
use crate::entry::LogEntry;
use crate::error::{Result, StoreError};
use crate::file::FileLayer;
use crate::identity::{Identity, IdentityProvider};
use crate::index::Index;
use crate::log::{Log, LogOptions};
use crate::replicator::Replicator;

use super::Inner;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotHeader {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    heads: Vec<Cid>,
    size: usize,
    #[serde(rename = "type")]
    store_type: String,
}

/// Serializes `log`'s full value set into the snapshot wire format, adds it to
/// `files`, and persists `snapshot`/`queue` into `cache`.
pub(super) async fn save(
    files: &dyn FileLayer,
    cache: &dyn Cache,
    id: &str,
    store_type: &str,
    log: &Log,
    queue: Vec<Cid>,
) -> Result<String> {
    let header = SnapshotHeader {
        id: Some(id.to_owned()),
        heads: log.heads().to_vec(),
        size: log.len(),
        store_type: store_type.to_owned(),
    };
    let header_bytes = serde_json::to_vec(&header)?;
    if header_bytes.len() > u16::MAX as usize {
        return Err(StoreError::Decode("snapshot header too large".to_owned()));
    }

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(header_bytes.len() as u16).to_be_bytes());
    bytes.extend_from_slice(&header_bytes);

    for entry in log.values() {
        let entry_bytes = entry.to_json()?;
        if entry_bytes.len() > u16::MAX as usize {
            return Err(StoreError::Decode("snapshot entry too large".to_owned()));
        }
        bytes.extend_from_slice(&(entry_bytes.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&entry_bytes);
    }
    bytes.push(0u8);

    let path = files.add(bytes).await?;

    cache.put("snapshot", path.as_bytes())?;
    let queue_cids: Vec<String> = queue.iter().map(|c| c.to_string()).collect();
    cache.put("queue", &serde_json::to_vec(&queue_cids)?)?;

    Ok(path)
}

/// Reads back a snapshot written by [`save`]: parses the header and every
/// inlined entry, and returns a fresh [`Log`] seeded with them plus the
/// restored replicator queue, the maximum observed clock time, and the
/// raw byte count read from the file layer (folded into
/// [`super::StoreStats::snapshot_bytes_loaded`]).
pub(super) async fn load(files: &dyn FileLayer, cache: &dyn Cache, identity: Identity, reference_count: usize) -> Result<(Log, Vec<Cid>, u64, usize)> {
    let Some(path_bytes) = cache.get("snapshot")? else {
        return Err(StoreError::NotFound);
    };
    let path = String::from_utf8(path_bytes).map_err(|e| StoreError::Decode(e.to_string()))?;

    let queue: Vec<Cid> = match cache.get("queue")? {
        Some(bytes) => {
            let strings: Vec<String> = serde_json::from_slice(&bytes)?;
            strings
                .iter()
                .map(|s| s.parse().map_err(|e: cid::Error| StoreError::Decode(e.to_string())))
                .collect::<Result<_>>()?
        }
        None => Vec::new(),
    };

    let bytes = files.get(&path).await?;
    let mut cursor = 0usize;

    let header_len = read_u16(&bytes, &mut cursor)?;
    let header: SnapshotHeader = serde_json::from_slice(read_n(&bytes, &mut cursor, header_len)?)?;

    let mut entries: HashMap<Cid, LogEntry> = HashMap::new();
    let mut max_clock = 0u64;
    for _ in 0..header.size {
        let entry_len = read_u16(&bytes, &mut cursor)?;
        let entry = LogEntry::from_json(read_n(&bytes, &mut cursor, entry_len)?)?;
        max_clock = max_clock.max(entry.clock().time());
        entries.insert(entry.hash().to_owned(), entry);
    }

    let bytes_loaded = bytes.len();
    let log = Log::new(
        identity,
        LogOptions::new()
            .set_id(header.id.unwrap_or_default())
            .set_entries(entries.into_values().collect())
            .set_reference_count(reference_count),
    );

    Ok((log, queue, max_clock, bytes_loaded))
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> Result<usize> {
    let slice = read_n(bytes, cursor, 2)?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]) as usize)
}

fn read_n<'a>(bytes: &'a [u8], cursor: &mut usize, n: usize) -> Result<&'a [u8]> {
    let end = cursor.checked_add(n).ok_or_else(|| StoreError::Decode("snapshot length overflow".to_owned()))?;
    let slice = bytes.get(*cursor..end).ok_or_else(|| StoreError::Decode("snapshot truncated".to_owned()))?;
    *cursor = end;
    Ok(slice)
}

/// Joins a restored snapshot into the live oplog and rebuilds the index,
/// then re-dispatches the restored queue through the replicator: the original
/// store reads `queue` from cache but never re-enqueues it — this crate
/// does.
pub(super) async fn join_and_requeue<IDX: Index + Send + Sync>(
    inner: &Arc<Inner<IDX>>,
    restored: Log,
    queue: Vec<Cid>,
    max_clock: u64,
    provider: &dyn IdentityProvider,
    access: &dyn AccessController,
    replicator: &Replicator,
) -> Result<()> {
    {
        let mut core = inner.core.write().await;
        let entries_len = core.oplog.len();
        core.replication.recalculate_max(entries_len, max_clock as usize);
        core.oplog.join(&restored, provider, access, None)?;
        core.index.update(&core.oplog);
    }

    if !queue.is_empty() {
        replicator.load(queue).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::SimpleAccessController;
    use crate::block::MemBlockStore;
    use crate::cache::MemCache;
    use crate::file::MemFileLayer;
    use crate::identity::Secp256k1IdentityProvider;

    #[tokio::test]
    async fn snapshot_round_trips_entries_and_heads() {
        let provider = Secp256k1IdentityProvider::generate();
        let identity = provider.create_identity("userA").unwrap();
        let access = SimpleAccessController::owner_only(identity.pub_key());
        let mut log = Log::new(identity.clone(), LogOptions::new().set_id("log1"));
        for i in 0..5 {
            log.append(&provider, &access, format!("e{}", i).as_bytes()).unwrap();
        }

        let files = MemFileLayer::new();
        let cache = MemCache::new();
        let _blocks = MemBlockStore::new();

        save(&files, &cache, "log1", "eventlog", &log, vec![]).await.unwrap();

        let (restored, queue, max_clock, bytes_loaded) = load(&files, &cache, identity, 64).await.unwrap();

        assert!(queue.is_empty());
        assert!(bytes_loaded > 0);
        assert_eq!(max_clock, log.values().last().unwrap().clock().time());
        let before: std::collections::BTreeSet<_> = log.values().into_iter().map(|e| e.hash().to_owned()).collect();
        let after: std::collections::BTreeSet<_> = restored.values().into_iter().map(|e| e.hash().to_owned()).collect();
        assert_eq!(before, after);
        assert_eq!(log.heads(), restored.heads());
    }

    #[tokio::test]
    async fn missing_snapshot_is_not_found() {
        let files = MemFileLayer::new();
        let cache = MemCache::new();
        let provider = Secp256k1IdentityProvider::generate();
        let identity = provider.create_identity("userA").unwrap();
        assert!(matches!(load(&files, &cache, identity, 64).await, Err(StoreError::NotFound)));
    }
}
