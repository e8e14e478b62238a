//! Materialized views over an [`crate::log::Log`]: each store
//! subtype supplies a reducer that is always rebuilt from the full log on
//! update, trading incremental-update complexity for convergence safety.

use std::collections::HashMap;

use crate::log::Log;
use crate::operation::Operation;

/// A pluggable reducer over a log's canonical order.
pub trait Index: Send + Sync {
    /// Rebuilds the index from `log`'s full entry set.
    fn update(&mut self, log: &Log);
}

/// `key -> value` materialized state: `PUT` sets, `DEL` removes; later
/// entries (by the log's canonical order) overwrite earlier ones.
#[derive(Debug, Default)]
pub struct KvIndex {
    state: HashMap<String, Vec<u8>>,
}

impl KvIndex {
    pub fn new() -> KvIndex {
        KvIndex::default()
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.state.get(key).map(|v| v.as_slice())
    }

    pub fn all(&self) -> &HashMap<String, Vec<u8>> {
        &self.state
    }
}

impl Index for KvIndex {
    fn update(&mut self, log: &Log) {
        let mut state = HashMap::new();
        for entry in log.values() {
            let Ok(op) = Operation::parse(entry.payload()) else { continue };
            match op {
                Operation::Put { key, value } => {
                    state.insert(key, value);
                }
                Operation::Del { key } => {
                    state.remove(&key);
                }
                Operation::Add { .. } => {}
            }
        }
        self.state = state;
    }
}

/// An ordered log of `ADD`ed values; the index *is* `log.values()`, so
/// range queries operate directly on canonical order.
#[derive(Debug, Default)]
pub struct EventLogIndex {
    entries: Vec<(cid::Cid, Vec<u8>)>,
}

/// Bound applied to one side of a range query (`gt`/`gte`/`lt`/`lte`).
#[derive(Debug, Clone, Copy)]
pub enum Bound<'a> {
    GreaterThan(&'a cid::Cid),
    GreaterThanOrEqual(&'a cid::Cid),
    LessThan(&'a cid::Cid),
    LessThanOrEqual(&'a cid::Cid),
}

impl EventLogIndex {
    pub fn new() -> EventLogIndex {
        EventLogIndex::default()
    }

    pub fn get(&self, hash: &cid::Cid) -> Option<&[u8]> {
        self.entries.iter().find(|(h, _)| h == hash).map(|(_, v)| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Range query over the ordered entry list.
    ///
    /// `amount` follows go-orbit-db's iterator convention: negative
    /// means "all matching entries"; non-negative caps the result,
    /// defaulting to `1` when `None`. `gt`/`gte` scan forward from the
    /// bound (oldest-first); `lt`/`lte` scan backward from the bound
    /// (newest-first, i.e. the entries immediately preceding it).
    pub fn range(&self, bound: Bound<'_>, amount: Option<i64>) -> Vec<&(cid::Cid, Vec<u8>)> {
        let amount = amount.unwrap_or(1);
        match bound {
            Bound::GreaterThan(hash) | Bound::GreaterThanOrEqual(hash) => {
                let inclusive = matches!(bound, Bound::GreaterThanOrEqual(_));
                let start = self.entries.iter().position(|(h, _)| h == hash);
                let Some(start) = start else { return Vec::new() };
                let from = if inclusive { start } else { start + 1 };
                let slice = &self.entries[from.min(self.entries.len())..];
                if amount < 0 {
                    slice.iter().collect()
                } else {
                    slice.iter().take(amount as usize).collect()
                }
            }
            Bound::LessThan(hash) | Bound::LessThanOrEqual(hash) => {
                let inclusive = matches!(bound, Bound::LessThanOrEqual(_));
                let pos = self.entries.iter().position(|(h, _)| h == hash);
                let Some(pos) = pos else { return Vec::new() };
                let end = if inclusive { pos + 1 } else { pos };
                let slice = &self.entries[..end];
                if amount < 0 {
                    slice.iter().collect()
                } else {
                    let take_from = slice.len().saturating_sub(amount as usize);
                    slice[take_from..].iter().collect()
                }
            }
        }
    }
}

impl Index for EventLogIndex {
    fn update(&mut self, log: &Log) {
        self.entries = log
            .values()
            .into_iter()
            .map(|entry| (entry.hash().to_owned(), entry.payload().to_vec()))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::SimpleAccessController;
    use crate::identity::Secp256k1IdentityProvider;
    use crate::log::{Log, LogOptions};

    #[test]
    fn kv_index_put_then_delete() {
        let provider = Secp256k1IdentityProvider::generate();
        let identity = provider.create_identity("userA").unwrap();
        let access = SimpleAccessController::owner_only(identity.pub_key());
        let mut log = Log::new(identity, LogOptions::new().set_id("log1"));

        log.append(&provider, &access, &Operation::put("a", b"1".to_vec()).marshal().unwrap())
            .unwrap();
        log.append(&provider, &access, &Operation::put("b", b"2".to_vec()).marshal().unwrap())
            .unwrap();
        log.append(&provider, &access, &Operation::put("a", b"3".to_vec()).marshal().unwrap())
            .unwrap();
        log.append(&provider, &access, &Operation::del("b").marshal().unwrap())
            .unwrap();

        let mut index = KvIndex::new();
        index.update(&log);

        assert_eq!(index.get("a"), Some(b"3".as_slice()));
        assert_eq!(index.get("b"), None);
        assert_eq!(index.all().len(), 1);
    }

    #[test]
    fn eventlog_range_queries() {
        let provider = Secp256k1IdentityProvider::generate();
        let identity = provider.create_identity("userA").unwrap();
        let access = SimpleAccessController::owner_only(identity.pub_key());
        let mut log = Log::new(identity, LogOptions::new().set_id("log1"));

        let mut hashes = Vec::new();
        for i in 0..5 {
            let hash = log
                .append(&provider, &access, &Operation::add(format!("e{}", i).into_bytes()).marshal().unwrap())
                .unwrap();
            hashes.push(hash);
        }

        let mut index = EventLogIndex::new();
        index.update(&log);

        assert_eq!(index.range(Bound::GreaterThanOrEqual(&hashes[4]), None).len(), 1);
        assert_eq!(index.range(Bound::GreaterThan(&hashes[4]), None).len(), 0);
        assert_eq!(index.range(Bound::GreaterThanOrEqual(&hashes[3]), None).len(), 2);
        assert_eq!(index.range(Bound::GreaterThanOrEqual(&hashes[0]), None).len(), 5);
        assert_eq!(index.range(Bound::GreaterThan(&hashes[0]), None).len(), 4);

        assert_eq!(index.range(Bound::LessThan(&hashes[4]), None).len(), 1);
        assert_eq!(index.range(Bound::LessThan(&hashes[4]), Some(-1)).len(), 4);
        assert_eq!(index.range(Bound::LessThan(&hashes[4]), Some(3)).len(), 3);

        assert_eq!(index.range(Bound::LessThanOrEqual(&hashes[0]), None).len(), 1);
        assert_eq!(index.range(Bound::LessThanOrEqual(&hashes[4]), Some(-1)).len(), 5);
        assert_eq!(index.range(Bound::LessThanOrEqual(&hashes[4]), Some(3)).len(), 3);
    }
}
