//! DAG traversal helpers shared by [`crate::log::Log`]: heads/tails
//! discovery, skip-list back-reference selection, and the parent lookup
//! used when pretty-printing a log.

use std::collections::{HashMap, HashSet};

use cid::Cid;

use crate::entry::LogEntry;

/// Returns `true` if `hash` is a direct parent of `entry`.
pub fn is_parent(entry: &LogEntry, hash: &Cid) -> bool {
	entry.next().iter().any(|h| h == hash)
}

/// Returns the hashes of every entry in `entries` that (directly or
/// transitively) references `entry` as a parent — used to indent a log's
/// pretty printer by DAG depth.
pub fn find_children(entry: &LogEntry, entries: &HashMap<Cid, LogEntry>) -> Vec<Cid> {
	let mut stack = Vec::new();
	let mut seen = HashSet::new();
	let mut frontier: Vec<Cid> = entries
		.values()
		.filter(|candidate| is_parent(candidate, entry.hash()))
		.map(|candidate| candidate.hash().to_owned())
		.collect();

	while let Some(hash) = frontier.pop() {
		if !seen.insert(hash) {
			continue;
		}
		stack.push(hash);
		if let Some(child_entry) = entries.get(&hash) {
			for candidate in entries.values() {
				if is_parent(candidate, child_entry.hash()) {
					frontier.push(candidate.hash().to_owned());
				}
			}
		}
	}

	stack
}

/// Heads are entries in `entries` that no other entry in `entries`
/// references as a parent.
pub fn find_heads(entries: &HashMap<Cid, LogEntry>) -> Vec<Cid> {
	let mut referenced: HashSet<Cid> = HashSet::new();
	for entry in entries.values() {
		for parent in entry.next() {
			referenced.insert(parent.to_owned());
		}
	}

	let mut heads: Vec<Cid> = entries
		.keys()
		.filter(|hash| !referenced.contains(*hash))
		.cloned()
		.collect();
	heads.sort();
	heads
}

/// Tails are entries whose parents are absent from `entries` — the
/// boundary of what has actually been fetched.
pub fn find_tails(entries: &HashMap<Cid, LogEntry>) -> Vec<Cid> {
	let mut tails: Vec<Cid> = entries
		.values()
		.filter(|entry| entry.next().iter().any(|parent| !entries.contains_key(parent)))
		.map(|entry| entry.hash().to_owned())
		.collect();
	tails.sort();
	tails
}

/// Exponentially spaced back-references (distance 2^0, 2^1, 2^2, ...) from
/// `heads`, walking each head's first-parent chain, deduplicated and capped
/// at `max_refs`. This is the skip-list `Log::append` uses to bound lookup
/// cost without keeping every ancestor as a direct parent.
pub fn skip_list_refs(heads: &[Cid], entries: &HashMap<Cid, LogEntry>, max_refs: usize) -> Vec<Cid> {
	let mut refs = Vec::new();
	let mut seen: HashSet<Cid> = HashSet::new();

	for head in heads {
		let mut distance: usize = 1;

		while refs.len() < max_refs {
			let mut hops = 0;
			let mut cursor = Some(head.to_owned());
			while hops < distance {
				let Some(at) = cursor else { break };
				let Some(at_entry) = entries.get(&at) else { break };
				cursor = at_entry.next().first().cloned();
				hops += 1;
			}

			match cursor {
				Some(candidate) if seen.insert(candidate) => refs.push(candidate),
				Some(_) => {}
				None => break,
			}

			distance *= 2;
		}
	}

	refs.truncate(max_refs);
	refs
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::identity::Secp256k1IdentityProvider;
	use crate::lamport_clock::LamportClock;

	fn make_entry(id: &str, payload: &[u8], next: Vec<Cid>, time: u64) -> LogEntry {
		let provider = Secp256k1IdentityProvider::generate();
		let identity = provider.create_identity("user").unwrap();
		let clock = LamportClock::new(identity.pub_key()).set_time(time);
		LogEntry::create(&identity, &provider, id, payload, next, vec![], clock).unwrap()
	}

	#[test]
	fn heads_excludes_referenced_entries() {
		let e1 = make_entry("log", b"1", vec![], 1);
		let e2 = make_entry("log", b"2", vec![e1.hash().to_owned()], 2);

		let mut entries = HashMap::new();
		entries.insert(e1.hash().to_owned(), e1.clone());
		entries.insert(e2.hash().to_owned(), e2.clone());

		let heads = find_heads(&entries);
		assert_eq!(heads, vec![e2.hash().to_owned()]);
	}

	#[test]
	fn tails_are_entries_with_missing_parents() {
		let e1 = make_entry("log", b"1", vec![], 1);
		let missing = e1.hash().to_owned();
		let e2 = make_entry("log", b"2", vec![missing], 2);

		let mut entries = HashMap::new();
		entries.insert(e2.hash().to_owned(), e2.clone());

		let tails = find_tails(&entries);
		assert_eq!(tails, vec![e2.hash().to_owned()]);
	}
}
