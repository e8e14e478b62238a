//! Bounded-concurrency fetcher of missing log entries. Accepts
//! target hashes, resolves their transitive ancestors via
//! [`crate::log::Log::new_from_hash`], and emits events so `BaseStore` can
//! join completed batches into its own log.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use cid::Cid;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::block::BlockStore;
use crate::entry::LogEntry;
use crate::identity::Identity;
use crate::log::Log;

const DEFAULT_CONCURRENCY: usize = 32;
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Events emitted by the replicator as fetches complete.
#[derive(Debug, Clone)]
pub enum ReplicatorEvent {
    /// One new entry has been fetched and verified reachable from a
    /// requested head; emitted strictly before the entry is joined into
    /// `BaseStore`'s oplog.
    LoadAdded(Box<LogEntry>),
    /// A `load()` batch has finished fetching; `hashes` is the set of
    /// roots that completed in this batch.
    LoadEnd(Vec<Cid>),
}

struct ReplicatorState {
    queue: Vec<Cid>,
    in_flight: HashSet<Cid>,
    fetched: HashSet<Cid>,
}

/// Fetches transitive ancestors of requested hashes with bounded
/// concurrency, deduplicating in-flight and already-fetched hashes.
pub struct Replicator {
    identity: Identity,
    blocks: Arc<dyn BlockStore>,
    state: Mutex<ReplicatorState>,
    concurrency: usize,
    reference_count: usize,
    events: mpsc::Sender<ReplicatorEvent>,
    cancel: CancellationToken,
}

impl Replicator {
    pub fn new(
        identity: Identity,
        blocks: Arc<dyn BlockStore>,
        concurrency: Option<usize>,
        reference_count: usize,
        cancel: CancellationToken,
    ) -> (Replicator, mpsc::Receiver<ReplicatorEvent>) {
        let (tx, rx) = mpsc::channel(256);
        let replicator = Replicator {
            identity,
            blocks,
            state: Mutex::new(ReplicatorState {
                queue: Vec::new(),
                in_flight: HashSet::new(),
                fetched: HashSet::new(),
            }),
            concurrency: concurrency.unwrap_or(DEFAULT_CONCURRENCY),
            reference_count,
            events: tx,
            cancel,
        };
        (replicator, rx)
    }

    /// Enqueues `hashes` not already fetched or in flight, then dispatches
    /// fetch tasks concurrently up to `concurrency`, refilling from the
    /// queue as each in-flight fetch completes so the bound is held for the
    /// whole batch rather than just its first wave.
    pub async fn load(&self, hashes: Vec<Cid>) {
        if self.cancel.is_cancelled() {
            return;
        }

        {
            let mut state = self.state.lock().await;
            for hash in hashes {
                if !state.fetched.contains(&hash) && !state.in_flight.contains(&hash) && !state.queue.contains(&hash) {
                    state.queue.push(hash);
                }
            }
        }

        let mut dispatched = Vec::new();
        let mut in_flight = FuturesUnordered::new();

        loop {
            loop {
                let next = {
                    let mut state = self.state.lock().await;
                    if state.in_flight.len() >= self.concurrency {
                        None
                    } else if let Some(hash) = state.queue.pop() {
                        state.in_flight.insert(hash);
                        Some(hash)
                    } else {
                        None
                    }
                };
                let Some(hash) = next else { break };
                dispatched.push(hash);
                in_flight.push(self.fetch_one(hash));
            }

            if in_flight.is_empty() {
                break;
            }
            in_flight.next().await;
        }

        if !dispatched.is_empty() {
            let _ = self.events.send(ReplicatorEvent::LoadEnd(dispatched)).await;
        }
    }

    async fn fetch_one(&self, hash: Cid) {
        if self.cancel.is_cancelled() {
            return;
        }

        let result = tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = Log::new_from_hash(
                self.identity.clone(),
                self.blocks.as_ref(),
                hash,
                None,
                &[],
                FETCH_TIMEOUT,
                self.reference_count,
            ) => Some(result),
        };

        let mut state = self.state.lock().await;
        state.in_flight.remove(&hash);

        let Some(result) = result else { return };
        match result {
            Ok(fetched) => {
                state.fetched.insert(hash);
                drop(state);
                if self.cancel.is_cancelled() {
                    return;
                }
                for entry in fetched.values() {
                    let _ = self.events.send(ReplicatorEvent::LoadAdded(Box::new(entry.clone()))).await;
                }
            }
            Err(e) => {
                tracing::warn!(hash = %hash, error = %e, "replicator: fetch failed");
            }
        }
    }

    /// Pending hashes, used by the snapshotter to persist unfinished work
    /// by `BaseStore::save_snapshot`.
    pub async fn get_queue(&self) -> Vec<Cid> {
        self.state.lock().await.queue.clone()
    }

    /// Signals cancellation; outstanding fetches observe the token promptly
    /// and no further events are sent after it is set.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::SimpleAccessController;
    use crate::block::MemBlockStore;
    use crate::identity::Secp256k1IdentityProvider;
    use crate::log::LogOptions;

    #[tokio::test]
    async fn load_fetches_entry_and_its_ancestors() {
        let provider = Secp256k1IdentityProvider::generate();
        let identity = provider.create_identity("userA").unwrap();
        let access = SimpleAccessController::owner_only(identity.pub_key());
        let blocks = Arc::new(MemBlockStore::new());

        let mut log = Log::new(identity.clone(), LogOptions::new().set_id("log1"));
        log.append(&provider, &access, b"first").unwrap();
        let second = log.append(&provider, &access, b"second").unwrap();

        for entry in log.values() {
            blocks.put(entry.to_cbor().unwrap()).await.unwrap();
        }

        let (replicator, mut events) = Replicator::new(identity, blocks, Some(4), 64, CancellationToken::new());
        replicator.load(vec![second]).await;

        let mut added = 0;
        let mut ended = false;
        while let Ok(event) = tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            match event {
                Some(ReplicatorEvent::LoadAdded(_)) => added += 1,
                Some(ReplicatorEvent::LoadEnd(_)) => {
                    ended = true;
                    break;
                }
                None => break,
            }
        }

        assert_eq!(added, 2);
        assert!(ended);
    }

    #[tokio::test]
    async fn stop_prevents_further_events() {
        let provider = Secp256k1IdentityProvider::generate();
        let identity = provider.create_identity("userA").unwrap();
        let blocks = Arc::new(MemBlockStore::new());
        let cancel = CancellationToken::new();
        let (replicator, _events) = Replicator::new(identity, blocks, Some(4), 64, cancel);

        replicator.stop();
        replicator.load(vec![crate::entry::content_address(b"nope")]).await;
        assert!(replicator.get_queue().await.is_empty());
    }
}
