//! `BaseStore`: orchestrates a [`crate::log::Log`], [`crate::index::Index`],
//! [`crate::replicator::Replicator`] and [`crate::cache::Cache`] behind one
//! lifecycle, and is the thing store subtypes (`kv`, `eventlog`) wrap.

mod eventlog;
mod kv;
mod snapshot;

pub use eventlog::EventLogStore;
pub use kv::KvStore;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use cid::Cid;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::access::AccessController;
use crate::block::BlockStore;
use crate::cache::Cache;
use crate::entry::LogEntry;
use crate::error::{Result, StoreError};
use crate::file::FileLayer;
use crate::identity::{Identity, IdentityProvider};
use crate::index::Index;
use crate::log::{Log, LogOptions};
use crate::operation::Operation;
use crate::replicator::{Replicator, ReplicatorEvent};

const DEFAULT_REFERENCE_COUNT: usize = 64;
const DEFAULT_REPLICATION_CONCURRENCY: usize = 32;
const DEFAULT_DIRECTORY: &str = "./orbitdb";
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;
const SUBSCRIBER_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Events produced on the store's subscriber bus.
#[derive(Debug, Clone)]
pub enum Event {
    Load(Option<Vec<LogEntry>>),
    Ready(Vec<Cid>),
    Write(LogEntry, Vec<Cid>),
    Replicate(LogEntry),
    Replicated(usize),
    Closed,
}

/// Monotonic non-decreasing replication counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplicationInfo {
    pub buffered: usize,
    pub queued: usize,
    pub progress: usize,
    pub max: usize,
}

impl ReplicationInfo {
    fn recalculate_max(&mut self, entries_len: usize, external: usize) {
        if self.max < entries_len {
            self.max = entries_len;
        }
        if self.max < external {
            self.max = external;
        }
    }

    fn recalculate_progress(&mut self, entries_len: usize, external: usize) {
        self.progress = self.progress.max(entries_len).max(external);
        self.recalculate_max(entries_len, self.progress);
    }

    fn reset(&mut self) {
        *self = ReplicationInfo::default();
    }
}

/// A subscriber handle returned by [`BaseStore::subscribe`], used to target
/// [`BaseStore::unsubscribe`].
pub type SubscriberId = u64;

/// Configuration accepted by a store subtype's constructor.
pub struct StoreOptions {
    pub id: String,
    pub identity: Identity,
    pub provider: Arc<dyn IdentityProvider>,
    pub cache: Arc<dyn Cache>,
    pub blocks: Arc<dyn BlockStore>,
    pub files: Arc<dyn FileLayer>,
    pub access: Arc<dyn AccessController>,
    pub replication_concurrency: Option<usize>,
    pub reference_count: Option<usize>,
    pub directory: Option<String>,
    pub replicate: bool,
    pub max_history: Option<i64>,
    pub on_close: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl StoreOptions {
    pub fn new(
        identity: Identity,
        provider: Arc<dyn IdentityProvider>,
        cache: Arc<dyn Cache>,
        blocks: Arc<dyn BlockStore>,
        files: Arc<dyn FileLayer>,
        access: Arc<dyn AccessController>,
    ) -> StoreOptions {
        let id = identity.pub_key().to_owned();
        StoreOptions {
            id,
            identity,
            provider,
            cache,
            blocks,
            files,
            access,
            replication_concurrency: None,
            reference_count: None,
            directory: None,
            replicate: true,
            max_history: None,
            on_close: None,
        }
    }

    pub fn set_id(mut self, id: impl Into<String>) -> StoreOptions {
        self.id = id.into();
        self
    }

    pub fn set_directory(mut self, directory: impl Into<String>) -> StoreOptions {
        self.directory = Some(directory.into());
        self
    }

    pub fn set_max_history(mut self, max_history: i64) -> StoreOptions {
        self.max_history = Some(max_history);
        self
    }

    pub fn set_on_close(mut self, on_close: impl Fn(&str) + Send + Sync + 'static) -> StoreOptions {
        self.on_close = Some(Box::new(on_close));
        self
    }

    /// An in-process configuration with a freshly generated identity and
    /// in-memory cache/block/file collaborators — convenient for tests and
    /// for embedding this crate without a real node.
    pub fn minimal() -> StoreOptions {
        let provider = crate::identity::Secp256k1IdentityProvider::generate();
        let identity = provider.create_identity("default").expect("in-memory identity creation cannot fail");
        let access = Arc::new(crate::access::SimpleAccessController::owner_only(identity.pub_key()));
        StoreOptions::new(
            identity,
            Arc::new(provider),
            Arc::new(crate::cache::MemCache::new()),
            Arc::new(crate::block::MemBlockStore::new()),
            Arc::new(crate::file::MemFileLayer::new()),
            access,
        )
    }
}

/// Read-only counters supplementing [`ReplicationInfo`]:
/// go-orbit-db's `BaseStore.stats` tracks `syncRequestsReceived` and
/// `snapshot.bytesLoaded` alongside the replication progress fields; this
/// mirrors both, reset on [`BaseStore::close`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StoreStats {
    pub sync_requests_received: u64,
    pub snapshot_bytes_loaded: u64,
    pub dropped_events: u64,
}

struct Core<IDX> {
    oplog: Log,
    index: IDX,
    replication: ReplicationInfo,
    subscribers: Vec<(SubscriberId, mpsc::Sender<Event>)>,
    closed: bool,
    stats: StoreStats,
}

struct Inner<IDX> {
    id: String,
    identity: Identity,
    provider: Arc<dyn IdentityProvider>,
    cache: Arc<dyn Cache>,
    blocks: Arc<dyn BlockStore>,
    files: Arc<dyn FileLayer>,
    access: Arc<dyn AccessController>,
    store_type: &'static str,
    directory: String,
    reference_count: usize,
    max_history: Option<i64>,
    on_close: Option<Box<dyn Fn(&str) + Send + Sync>>,
    core: RwLock<Core<IDX>>,
    replicator: Replicator,
    next_subscriber_id: AtomicU64,
    cancel: CancellationToken,
}

/// Orchestrates log, index, replicator, and cache behind one lifecycle.
/// Generic over the index a store subtype supplies (`KvIndex`,
/// `EventLogIndex`, ...).
pub struct BaseStore<IDX> {
    inner: Arc<Inner<IDX>>,
}

impl<IDX> Clone for BaseStore<IDX> {
    fn clone(&self) -> Self {
        BaseStore { inner: self.inner.clone() }
    }
}

impl<IDX: Index + Default + Send + Sync + 'static> BaseStore<IDX> {
    /// Initializes all subcomponents and spawns the replicator event loop.
    /// `index` is the subtype's fresh reducer state.
    pub fn init(opts: StoreOptions, store_type: &'static str, index: IDX) -> Result<BaseStore<IDX>> {
        let directory = opts.directory.unwrap_or_else(|| DEFAULT_DIRECTORY.to_owned());
        let reference_count = opts.reference_count.unwrap_or(DEFAULT_REFERENCE_COUNT);

        let oplog = Log::new(
            opts.identity.clone(),
            LogOptions::new().set_id(opts.id.clone()).set_reference_count(reference_count),
        );

        let cancel = CancellationToken::new();
        let (replicator, replicator_events) = Replicator::new(
            opts.identity.clone(),
            opts.blocks.clone(),
            opts.replication_concurrency.or(Some(DEFAULT_REPLICATION_CONCURRENCY)),
            reference_count,
            cancel.clone(),
        );

        let inner = Arc::new(Inner {
            id: opts.id,
            identity: opts.identity,
            provider: opts.provider,
            cache: opts.cache,
            blocks: opts.blocks,
            files: opts.files,
            access: opts.access,
            store_type,
            directory,
            reference_count,
            max_history: opts.max_history,
            on_close: opts.on_close,
            core: RwLock::new(Core {
                oplog,
                index,
                replication: ReplicationInfo::default(),
                subscribers: Vec::new(),
                closed: false,
                stats: StoreStats::default(),
            }),
            replicator,
            next_subscriber_id: AtomicU64::new(0),
            cancel,
        });

        spawn_replication_loop(inner.clone(), replicator_events);

        Ok(BaseStore { inner })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn store_type(&self) -> &'static str {
        self.inner.store_type
    }

    pub async fn replication_status(&self) -> ReplicationInfo {
        self.inner.core.read().await.replication
    }

    pub async fn stats(&self) -> StoreStats {
        self.inner.core.read().await.stats
    }

    /// Runs `f` over the current index state under a read lock.
    pub async fn with_index<R>(&self, f: impl FnOnce(&IDX) -> R) -> R {
        let core = self.inner.core.read().await;
        f(&core.index)
    }

    /// Adds `c` to the subscriber bus, returning its id for
    /// [`BaseStore::unsubscribe`].
    pub async fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = self.inner.next_subscriber_id.fetch_add(1, AtomicOrdering::Relaxed);
        let mut core = self.inner.core.write().await;
        core.subscribers.push((id, tx));
        (id, rx)
    }

    /// Removes a subscriber by id. Correct swap-remove: swap with the last
    /// element, then truncate by one — not index arithmetic over the
    /// channel itself.
    pub async fn unsubscribe(&self, id: SubscriberId) {
        let mut core = self.inner.core.write().await;
        if let Some(pos) = core.subscribers.iter().position(|(sid, _)| *sid == id) {
            let last = core.subscribers.len() - 1;
            core.subscribers.swap(pos, last);
            core.subscribers.truncate(last);
        }
    }

    /// Reloads from cached local+remote heads, fetching ancestors up to
    /// `amount` (`<= 0` falls back to `max_history`), then rebuilds the
    /// index and emits `Ready`.
    pub async fn load(&self, amount: Option<i64>) -> Result<()> {
        let amount = match amount {
            Some(a) if a > 0 => Some(a as usize),
            _ => self.inner.max_history.filter(|m| *m > 0).map(|m| m as usize),
        };

        let local_heads = self.read_cached_heads("_localHeads").await?;
        let remote_heads = self.read_cached_heads("_remoteHeads").await.unwrap_or_default();

        let mut heads = local_heads;
        heads.extend(remote_heads);

        if !heads.is_empty() {
            self.emit(Event::Load(Some(heads.clone()))).await;
        }

        for head in &heads {
            {
                let mut core = self.inner.core.write().await;
                let entries_len = core.oplog.len();
                core.replication.recalculate_max(entries_len, head.clock().time() as usize);
            }

            let exclude: Vec<Cid> = {
                let core = self.inner.core.read().await;
                core.oplog.values().into_iter().map(|e| e.hash().to_owned()).collect()
            };

            let fetched = Log::new_from_hash(
                self.inner.identity.clone(),
                self.inner.blocks.as_ref(),
                head.hash().to_owned(),
                amount,
                &exclude,
                Duration::from_secs(10),
                self.inner.reference_count,
            )
            .await?;

            let mut core = self.inner.core.write().await;
            core.oplog.join(&fetched, self.inner.provider.as_ref(), self.inner.access.as_ref(), amount)?;
        }

        if !heads.is_empty() {
            let mut core = self.inner.core.write().await;
            core.index.update(&core.oplog);
        }

        let final_heads = {
            let core = self.inner.core.read().await;
            core.oplog.heads().to_vec()
        };
        self.emit(Event::Ready(final_heads)).await;

        Ok(())
    }

    async fn read_cached_heads(&self, key: &str) -> Result<Vec<LogEntry>> {
        read_cached_heads(self.inner.cache.as_ref(), key)
    }

    async fn write_cached_heads(&self, key: &str, heads: &[LogEntry]) -> Result<()> {
        write_cached_heads(self.inner.cache.as_ref(), key, heads)
    }

    /// Verifies each remote head (access policy + recomputed content
    /// address), persists the verified block, then enqueues ancestor fetch
    /// via the replicator. A malformed head is logged and skipped, not
    /// fatal to the batch.
    pub async fn sync(&self, heads: Vec<LogEntry>) -> Result<()> {
        {
            let mut core = self.inner.core.write().await;
            core.stats.sync_requests_received += 1;
        }

        let mut verified = Vec::new();
        for head in heads {
            if let Err(e) = self.inner.access.can_append(&head, self.inner.provider.as_ref()) {
                tracing::warn!(error = %e, "sync: discarding entry with no write access");
                continue;
            }
            if let Err(e) = head.verify(self.inner.provider.as_ref()) {
                tracing::warn!(error = %e, "sync: discarding entry that failed verification");
                continue;
            }

            let bytes = head.to_cbor()?;
            let hash = self.inner.blocks.put(bytes).await?;
            if hash != *head.hash() {
                tracing::warn!(claimed = %head.hash(), recomputed = %hash, "sync: head hash did not match its contents");
                continue;
            }

            verified.push(head.hash().to_owned());
        }

        if !verified.is_empty() {
            self.inner.replicator.load(verified).await;
        }

        Ok(())
    }

    /// Delegates to the replicator.
    pub async fn load_more_from(&self, hashes: Vec<Cid>) {
        self.inner.replicator.load(hashes).await;
    }

    /// Appends `op` to the log, persists the new entry on the block
    /// service and as the new local head, updates the index, and emits
    /// `Write`. A failed append updates neither the cache nor the index.
    pub async fn add_operation(&self, op: &Operation) -> Result<Cid> {
        let payload = op.marshal()?;

        let (hash, entry, heads) = {
            let mut core = self.inner.core.write().await;
            let hash = core
                .oplog
                .append(self.inner.provider.as_ref(), self.inner.access.as_ref(), &payload)
                .map_err(|e| StoreError::Append(e.to_string()))?;
            let entry = core.oplog.get(&hash).expect("just-appended entry is present").clone();
            let entries_len = core.oplog.len();
            core.replication.recalculate_progress(entries_len, core.replication.progress + 1);
            core.index.update(&core.oplog);
            let heads = core.oplog.heads().to_vec();
            (hash, entry, heads)
        };

        self.inner.blocks.put(entry.to_cbor()?).await?;
        self.write_cached_heads("_localHeads", std::slice::from_ref(&entry)).await?;
        self.emit(Event::Write(entry, heads)).await;

        Ok(hash)
    }

    /// Stops the replicator, resets replication and sync statistics, emits
    /// `Closed`, and closes the cache. Must be called
    /// exactly once; later operations observe `Closed`.
    pub async fn close(&self) -> Result<()> {
        if let Some(on_close) = &self.inner.on_close {
            on_close(&self.inner.id);
        }

        self.inner.replicator.stop();
        self.inner.cancel.cancel();

        {
            let mut core = self.inner.core.write().await;
            if core.closed {
                return Err(StoreError::Closed);
            }
            core.closed = true;
            core.replication.reset();
            core.stats = StoreStats::default();
        }

        self.emit(Event::Closed).await;

        {
            let mut core = self.inner.core.write().await;
            core.subscribers.clear();
        }

        self.inner.cache.close()
    }

    /// Closes, destroys the cache, and recreates an empty oplog and index
    /// Propagates close errors.
    pub async fn drop_store(&self) -> Result<()> {
        self.close().await?;
        self.inner.cache.destroy()?;

        let mut core = self.inner.core.write().await;
        core.oplog = Log::new(
            self.inner.identity.clone(),
            LogOptions::new().set_id(self.inner.id.clone()).set_reference_count(self.inner.reference_count),
        );
        core.index = IDX::default();
        core.closed = false;
        Ok(())
    }

    async fn emit(&self, event: Event) {
        emit_event(&self.inner, event).await;
    }

    /// Serializes the current log and the replicator's unfinished queue
    /// into the file layer and records the resulting path in the cache
    /// into the cache.
    pub async fn save_snapshot(&self) -> Result<String> {
        let queue = self.inner.replicator.get_queue().await;
        let core = self.inner.core.read().await;
        snapshot::save(self.inner.files.as_ref(), self.inner.cache.as_ref(), &self.inner.id, self.inner.store_type, &core.oplog, queue).await
    }

    /// Restores a previously saved snapshot: reads it back from the file
    /// layer, joins it into the live log, rebuilds the index, and
    /// re-dispatches the restored queue through the replicator.
    pub async fn load_from_snapshot(&self) -> Result<()> {
        self.emit(Event::Load(None)).await;

        let (restored, queue, max_clock, bytes_loaded) = snapshot::load(self.inner.files.as_ref(), self.inner.cache.as_ref(), self.inner.identity.clone(), self.inner.reference_count).await?;

        snapshot::join_and_requeue(&self.inner, restored, queue, max_clock, self.inner.provider.as_ref(), self.inner.access.as_ref(), &self.inner.replicator).await?;

        {
            let mut core = self.inner.core.write().await;
            core.stats.snapshot_bytes_loaded += bytes_loaded as u64;
        }

        let heads = {
            let core = self.inner.core.read().await;
            core.oplog.heads().to_vec()
        };
        self.emit(Event::Ready(heads)).await;

        Ok(())
    }
}

/// Reads a `_localHeads`/`_remoteHeads`-shaped cache entry: a JSON array of
/// dag-cbor-encoded entries, each addressed by the content address of its
/// own bytes — the cache is this store's own prior write, so that address
/// is exactly the entry's `hash`.
fn read_cached_heads(cache: &dyn Cache, key: &str) -> Result<Vec<LogEntry>> {
    let Some(bytes) = cache.get(key)? else {
        return Ok(Vec::new());
    };
    let encoded: Vec<Vec<u8>> = serde_json::from_slice(&bytes)?;
    encoded
        .iter()
        .map(|e| LogEntry::from_cbor(e, crate::entry::content_address(e)))
        .collect()
}

fn write_cached_heads(cache: &dyn Cache, key: &str, heads: &[LogEntry]) -> Result<()> {
    let encoded: Vec<Vec<u8>> = heads.iter().map(|e| e.to_cbor()).collect::<Result<_>>()?;
    let bytes = serde_json::to_vec(&encoded)?;
    cache.put(key, &bytes)
}

/// The replicator event loop: fully implements what the original
/// store left as a stub, joining fetched batches into the oplog and
/// recalculating replication progress as each batch completes.
fn spawn_replication_loop<IDX: Index + Send + Sync + 'static>(
    inner: Arc<Inner<IDX>>,
    mut events: mpsc::Receiver<ReplicatorEvent>,
) {
    tokio::spawn(async move {
        let mut batch: HashMap<Cid, LogEntry> = HashMap::new();

        loop {
            tokio::select! {
                _ = inner.cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        ReplicatorEvent::LoadAdded(entry) => {
                            let hash = entry.hash().to_owned();
                            {
                                let mut core = inner.core.write().await;
                                core.replication.queued += 1;
                                let entries_len = core.oplog.len();
                                core.replication.recalculate_max(entries_len, entry.clock().time() as usize);
                            }
                            batch.insert(hash, (*entry).clone());
                            emit_event(&inner, Event::Replicate((*entry).clone())).await;
                        }
                        ReplicatorEvent::LoadEnd(_) => {
                            if batch.is_empty() {
                                continue;
                            }
                            let fetched_entries: Vec<LogEntry> = batch.drain().map(|(_, e)| e).collect();
                            let count = fetched_entries.len();
                            let fetched_log = Log::new(
                                inner.identity.clone(),
                                LogOptions::new().set_id(inner.id.clone()).set_entries(fetched_entries).set_reference_count(inner.reference_count),
                            );

                            let (heads, head_entries) = {
                                let mut core = inner.core.write().await;
                                if let Err(e) = core.oplog.join(&fetched_log, inner.provider.as_ref(), inner.access.as_ref(), inner.max_history.filter(|m| *m >= 0).map(|m| m as usize)) {
                                    tracing::warn!(error = %e, "replication loop: join failed");
                                }
                                core.index.update(&core.oplog);
                                let entries_len = core.oplog.len();
                                core.replication.recalculate_progress(entries_len, core.replication.progress + count);
                                let heads = core.oplog.heads().to_vec();
                                let head_entries: Vec<LogEntry> = heads.iter().filter_map(|h| core.oplog.get(h)).cloned().collect();
                                (heads, head_entries)
                            };

                            if let Err(e) = write_cached_heads(inner.cache.as_ref(), "_remoteHeads", &head_entries) {
                                tracing::warn!(error = %e, "replication loop: failed to persist _remoteHeads");
                            }

                            emit_event(&inner, Event::Replicated(count)).await;
                            emit_event(&inner, Event::Ready(heads)).await;
                        }
                    }
                }
            }
        }
    });
}

/// Sends `event` to every subscriber. The subscriber list is snapshotted out
/// from under the lock before sending, so one slow consumer's `send_timeout`
/// (up to a second) never blocks other tasks' reads or writes on `core` —
/// only the brief re-lock to drop timed-out subscribers does.
async fn emit_event<IDX>(inner: &Arc<Inner<IDX>>, event: Event) {
    let subscribers = {
        let core = inner.core.read().await;
        core.subscribers.clone()
    };

    let mut dropped = Vec::new();
    for (id, sender) in &subscribers {
        if sender.send_timeout(event.clone(), SUBSCRIBER_SEND_TIMEOUT).await.is_err() {
            dropped.push(*id);
        }
    }

    if !dropped.is_empty() {
        let mut core = inner.core.write().await;
        core.stats.dropped_events += dropped.len() as u64;
        core.subscribers.retain(|(id, _)| !dropped.contains(id));
    }
}

/// A type-erased handle to a constructed store subtype, returned by
/// [`crate::registry::StoreRegistry::create`].
pub enum StoreHandle {
    Kv(KvStore),
    EventLog(EventLogStore),
}
