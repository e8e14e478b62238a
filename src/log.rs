//! An append-only, operation-based conflict-free replicated data type
//! ([CRDT]): a hash-linked DAG of [`LogEntry`] values, merged by taking the
//! union of entry sets and recomputing heads.
//!
//! [CRDT]: https://en.wikipedia.org/wiki/Conflict-free_replicated_data_type

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use cid::Cid;

use crate::access::AccessController;
use crate::block::BlockStore;
use crate::entry::LogEntry;
use crate::error::{Result, StoreError};
use crate::identity::{Identity, IdentityProvider};
use crate::lamport_clock::LamportClock;
use crate::util::{find_children, find_heads, find_tails, skip_list_refs};

/// Options accepted by [`Log::new`]; defaults mirror go-orbit-db's
/// `ipfs-log` constructor (`id` derived from the identity's public key, no
/// seed entries).
#[derive(Default)]
pub struct LogOptions {
    pub id: Option<String>,
    pub entries: Vec<LogEntry>,
    pub reference_count: Option<usize>,
}

impl LogOptions {
    pub fn new() -> LogOptions {
        LogOptions::default()
    }

    pub fn set_id(mut self, id: impl Into<String>) -> LogOptions {
        self.id = Some(id.into());
        self
    }

    pub fn set_entries(mut self, entries: Vec<LogEntry>) -> LogOptions {
        self.entries = entries;
        self
    }

    pub fn set_reference_count(mut self, reference_count: usize) -> LogOptions {
        self.reference_count = Some(reference_count);
        self
    }
}

const DEFAULT_REFERENCE_COUNT: usize = 64;

/// A named, identity-owned operation log: `id`, the set of known
/// [`LogEntry`] values keyed by hash, and the derived `heads`/`tails`.
pub struct Log {
    id: String,
    identity: Identity,
    entries: HashMap<Cid, LogEntry>,
    heads: Vec<Cid>,
    tails: Vec<Cid>,
    clock: LamportClock,
    max_time_by_id: HashMap<String, u64>,
    reference_count: usize,
}

impl fmt::Debug for Log {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Log")
            .field("id", &self.id)
            .field("entries", &self.entries.len())
            .field("heads", &self.heads.len())
            .finish()
    }
}

impl Log {
    /// Constructs a log owned by `identity`. `opts.entries`, if non-empty,
    /// seeds the log (e.g. when reconstructing from a snapshot or a fetched
    /// DAG range); heads/tails are (re)computed from them.
    pub fn new(identity: Identity, opts: LogOptions) -> Log {
        let id = opts.id.unwrap_or_else(|| identity.pub_key().to_owned());
        let reference_count = opts.reference_count.unwrap_or(DEFAULT_REFERENCE_COUNT);

        let mut entries = HashMap::new();
        let mut max_time_by_id: HashMap<String, u64> = HashMap::new();
        for entry in opts.entries {
            bump_clock(&mut max_time_by_id, &entry);
            entries.insert(entry.hash().to_owned(), entry);
        }

        let heads = find_heads(&entries);
        let tails = find_tails(&entries);
        let clock_time = max_time_by_id.values().max().copied().unwrap_or(0);
        let clock = LamportClock::new(identity.pub_key()).set_time(clock_time);

        Log {
            id,
            identity,
            entries,
            heads,
            tails,
            clock,
            max_time_by_id,
            reference_count,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn heads(&self) -> &[Cid] {
        &self.heads
    }

    pub fn tails(&self) -> &[Cid] {
        &self.tails
    }

    pub fn clock(&self) -> &LamportClock {
        &self.clock
    }

    pub fn get(&self, hash: &Cid) -> Option<&LogEntry> {
        self.entries.get(hash)
    }

    pub fn contains(&self, hash: &Cid) -> bool {
        self.entries.contains_key(hash)
    }

    /// Returns every known entry in the log's canonical total order: primary
    /// `clock.time` ascending, tie-break by `clock.id`, then `hash`.
    pub fn values(&self) -> Vec<&LogEntry> {
        let mut values: Vec<&LogEntry> = self.entries.values().collect();
        values.sort_by(|a, b| {
            a.clock()
                .cmp(b.clock())
                .then_with(|| a.hash().to_bytes().cmp(&b.hash().to_bytes()))
        });
        values
    }

    /// Appends `payload` as a new entry whose parents are the current
    /// heads. Rejects via `access` if the resulting entry is not
    /// writable by `identity`.
    pub fn append(
        &mut self,
        provider: &dyn IdentityProvider,
        access: &dyn AccessController,
        payload: &[u8],
    ) -> Result<Cid> {
        let next = self.heads.clone();
        let refs = skip_list_refs(&self.heads, &self.entries, self.reference_count);

        let parent_max = next
            .iter()
            .filter_map(|hash| self.entries.get(hash))
            .map(|entry| entry.clock().time())
            .max()
            .unwrap_or(0);
        let time = parent_max.max(self.clock.time()) + 1;
        let clock = LamportClock::new(self.identity.pub_key()).set_time(time);

        let entry = LogEntry::create(&self.identity, provider, &self.id, payload, next, refs, clock)?;

        access
            .can_append(&entry, provider)
            .map_err(|e| StoreError::Append(e.to_string()))?;

        let hash = entry.hash().to_owned();
        self.clock = LamportClock::new(self.identity.pub_key()).set_time(entry.clock().time());
        self.insert_entry(entry);
        self.heads = vec![hash];
        Ok(hash)
    }

    /// Merges `other`'s entries into `self`. Entries that fail
    /// signature/access verification are skipped with a warning, not fatal
    /// to the join. `size_limit` (if `Some`) trims the result to the most
    /// recent entries while preserving connectedness.
    pub fn join(
        &mut self,
        other: &Log,
        provider: &dyn IdentityProvider,
        access: &dyn AccessController,
        size_limit: Option<usize>,
    ) -> Result<()> {
        for entry in other.entries.values() {
            if self.entries.contains_key(entry.hash()) {
                continue;
            }
            if let Err(e) = entry.verify(provider) {
                tracing::warn!(hash = %entry.hash(), error = %e, "join: dropping entry with invalid signature/hash");
                continue;
            }
            if let Err(e) = access.can_append(entry, provider) {
                tracing::warn!(hash = %entry.hash(), error = %e, "join: dropping entry rejected by access controller");
                continue;
            }
            bump_clock(&mut self.max_time_by_id, entry);
            self.insert_entry(entry.clone());
        }

        self.heads = find_heads(&self.entries);
        self.tails = find_tails(&self.entries);

        if let Some(limit) = size_limit {
            self.trim(limit);
        }

        let max_time = self.max_time_by_id.values().max().copied().unwrap_or(0);
        if max_time > self.clock.time() {
            self.clock = LamportClock::new(self.clock.id().to_owned()).set_time(max_time);
        }

        Ok(())
    }

    /// Traverses the DAG from `hash` via `blocks`, stopping at `length`
    /// entries (or unbounded if `None`) or upon reaching a hash in
    /// `exclude`. Missing blocks after `fetch_timeout` leave the
    /// partial entry's parent recorded in `tails` rather than failing the
    /// whole traversal.
    pub async fn new_from_hash(
        identity: Identity,
        blocks: &dyn BlockStore,
        hash: Cid,
        length: Option<usize>,
        exclude: &[Cid],
        fetch_timeout: Duration,
        reference_count: usize,
    ) -> Result<Log> {
        let mut entries: HashMap<Cid, LogEntry> = HashMap::new();
        let mut frontier = vec![hash];
        let mut visited = std::collections::HashSet::new();

        while let Some(cursor) = frontier.pop() {
            if !visited.insert(cursor) || exclude.contains(&cursor) {
                continue;
            }
            if let Some(max_len) = length {
                if entries.len() >= max_len {
                    continue;
                }
            }

            let fetched = tokio::time::timeout(fetch_timeout, blocks.get(&cursor))
                .await
                .map_err(|_| StoreError::BlockFetchTimeout(cursor.to_string()))??;

            let Some(bytes) = fetched else {
                tracing::warn!(hash = %cursor, "new_from_hash: block unavailable, leaving as tail");
                continue;
            };

            let entry = LogEntry::from_cbor(&bytes, cursor)?;
            for parent in entry.next().iter().chain(entry.refs().iter()) {
                frontier.push(parent.to_owned());
            }
            entries.insert(cursor, entry);
        }

        let mut max_time_by_id: HashMap<String, u64> = HashMap::new();
        for entry in entries.values() {
            bump_clock(&mut max_time_by_id, entry);
        }
        let heads = find_heads(&entries);
        let tails = find_tails(&entries);
        let clock_time = max_time_by_id.values().max().copied().unwrap_or(0);
        let clock_id = identity.pub_key().to_owned();

        Ok(Log {
            id: identity.pub_key().to_owned(),
            identity,
            entries,
            heads,
            tails,
            clock: LamportClock::new(clock_id).set_time(clock_time),
            max_time_by_id,
            reference_count,
        })
    }

    fn insert_entry(&mut self, entry: LogEntry) {
        self.entries.insert(entry.hash().to_owned(), entry);
    }

    /// Keeps the most recent `limit` entries by canonical order, then
    /// pulls back in any ancestor (via `next`) still needed so no retained
    /// entry loses a parent it depends on.
    fn trim(&mut self, limit: usize) {
        if self.entries.len() <= limit {
            return;
        }

        let mut ordered: Vec<Cid> = self.values().into_iter().map(|e| e.hash().to_owned()).collect();
        ordered.reverse(); // most recent first

        let mut keep: std::collections::HashSet<Cid> = std::collections::HashSet::new();
        let mut frontier: Vec<Cid> = ordered.into_iter().take(limit).collect();
        for hash in &frontier {
            keep.insert(*hash);
        }
        while let Some(hash) = frontier.pop() {
            if let Some(entry) = self.entries.get(&hash) {
                for parent in entry.next() {
                    if self.entries.contains_key(parent) && keep.insert(*parent) {
                        frontier.push(*parent);
                    }
                }
            }
        }

        self.entries.retain(|hash, _| keep.contains(hash));
        self.heads = find_heads(&self.entries);
        self.tails = find_tails(&self.entries);
    }
}

fn bump_clock(max_time_by_id: &mut HashMap<String, u64>, entry: &LogEntry) {
    let id = entry.clock().id().to_owned();
    let time = entry.clock().time();
    max_time_by_id
        .entry(id)
        .and_modify(|t| *t = (*t).max(time))
        .or_insert(time);
}

impl fmt::Display for Log {
    /// Pretty-prints the log depth-first from its heads, indenting each
    /// entry by the number of entries that (transitively) reference it —
    /// useful for debugging small logs in tests.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for head in &self.heads {
            let Some(entry) = self.entries.get(head) else { continue };
            let depth = find_children(entry, &self.entries).len();
            writeln!(f, "{}{}", "  ".repeat(depth), String::from_utf8_lossy(entry.payload()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::SimpleAccessController;
    use crate::identity::Secp256k1IdentityProvider;

    fn fixture() -> (Identity, Secp256k1IdentityProvider, SimpleAccessController) {
        let provider = Secp256k1IdentityProvider::generate();
        let identity = provider.create_identity("userA").unwrap();
        let access = SimpleAccessController::owner_only(identity.pub_key());
        (identity, provider, access)
    }

    #[test]
    fn empty_log_has_no_heads() {
        let (identity, _provider, _access) = fixture();
        let log = Log::new(identity, LogOptions::new().set_id("log1"));
        assert!(log.is_empty());
        assert!(log.heads().is_empty());
    }

    #[test]
    fn append_advances_clock_and_heads() {
        let (identity, provider, access) = fixture();
        let mut log = Log::new(identity, LogOptions::new().set_id("log1"));

        log.append(&provider, &access, b"hello1").unwrap();
        log.append(&provider, &access, b"hello2").unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(log.heads().len(), 1);
        let values = log.values();
        assert_eq!(values[0].payload(), b"hello1");
        assert_eq!(values[1].payload(), b"hello2");
        assert!(values[1].clock().time() > values[0].clock().time());
    }

    #[test]
    fn join_is_commutative_on_entry_sets() {
        let (identity, provider, access) = fixture();

        let mut a = Log::new(identity.clone(), LogOptions::new().set_id("log1"));
        a.append(&provider, &access, b"a1").unwrap();

        let mut b = Log::new(identity.clone(), LogOptions::new().set_id("log1"));
        b.append(&provider, &access, b"b1").unwrap();

        let mut ab = Log::new(identity.clone(), LogOptions::new().set_id("log1"));
        ab.join(&a, &provider, &access, None).unwrap();
        ab.join(&b, &provider, &access, None).unwrap();

        let mut ba = Log::new(identity, LogOptions::new().set_id("log1"));
        ba.join(&b, &provider, &access, None).unwrap();
        ba.join(&a, &provider, &access, None).unwrap();

        let ab_hashes: std::collections::BTreeSet<_> = ab.entries.keys().collect();
        let ba_hashes: std::collections::BTreeSet<_> = ba.entries.keys().collect();
        assert_eq!(ab_hashes, ba_hashes);
    }

    #[test]
    fn join_is_idempotent() {
        let (identity, provider, access) = fixture();
        let mut a = Log::new(identity, LogOptions::new().set_id("log1"));
        a.append(&provider, &access, b"one").unwrap();

        let before: std::collections::BTreeSet<_> = a.entries.keys().cloned().collect();
        let snapshot = Log {
            id: a.id.clone(),
            identity: a.identity.clone(),
            entries: a.entries.clone(),
            heads: a.heads.clone(),
            tails: a.tails.clone(),
            clock: a.clock.clone(),
            max_time_by_id: a.max_time_by_id.clone(),
            reference_count: a.reference_count,
        };
        a.join(&snapshot, &provider, &access, None).unwrap();
        let after: std::collections::BTreeSet<_> = a.entries.keys().cloned().collect();
        assert_eq!(before, after);
    }
}
