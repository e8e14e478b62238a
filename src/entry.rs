//! Immutable, content-addressed log entries and their canonical CBOR
//! encoding. An entry's `hash` is the content address of its own canonical
//! encoding with the `hash` field cleared, so two replicas that compute the
//! same fields always produce the same hash without exchanging it.
//!
//! An entry is built as an `Ipld` tree (`id`, `next`, `refs`, `clock`,
//! `identity`, `sig`, `hash`, `payload`) and encoded with dag-cbor, the same
//! technique used to address and verify every other block in the log.

use std::collections::BTreeMap;

use cid::Cid;
use libipld::{cbor::DagCborCodec, codec::Codec, ipld, Ipld};
use multihash::Multihash;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};
use crate::identity::{Identity, IdentityProvider};
use crate::lamport_clock::LamportClock;

const DAG_CBOR_CODE: u64 = 0x71;
const SHA2_256_CODE: u64 = 0x12;

/// An entry in a [`crate::log::Log`]: an operation payload plus enough
/// causal metadata (`next`, `clock`) and provenance (`identity`, `sig`) to
/// let any peer verify and order it independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
	id: String,
	payload: Vec<u8>,
	next: Vec<Cid>,
	refs: Vec<Cid>,
	clock: LamportClock,
	identity: Identity,
	sig: String,
	hash: Cid,
}

impl LogEntry {
	/// Builds, signs, and content-addresses a new entry.
	///
	/// `next` must be the log's current heads; `refs` the skip-list
	/// back-references computed by [`crate::util::skip_list_refs`]; `clock`
	/// the entry's already-advanced Lamport clock (time greater than any
	/// parent's).
	pub fn create(
		identity: &Identity,
		provider: &dyn IdentityProvider,
		log_id: &str,
		payload: &[u8],
		next: Vec<Cid>,
		refs: Vec<Cid>,
		clock: LamportClock,
	) -> Result<LogEntry> {
		let unsigned = canonical_ipld(log_id, payload, &next, &refs, &clock, identity, None);
		let unsigned_bytes = encode_cbor(&unsigned)?;
		let sig = hex::encode(provider.sign(identity, &unsigned_bytes)?);

		let hashable = canonical_ipld(log_id, payload, &next, &refs, &clock, identity, Some(&sig));
		let hashable_bytes = encode_cbor(&hashable)?;
		let hash = content_address(&hashable_bytes);

		Ok(LogEntry {
			id: log_id.to_owned(),
			payload: payload.to_vec(),
			next,
			refs,
			clock,
			identity: identity.clone(),
			sig,
			hash,
		})
	}

	/// Verifies the entry's signature against its canonical encoding and
	/// recomputes its content address, failing with
	/// [`StoreError::InvalidSignature`] on either mismatch.
	pub fn verify(&self, provider: &dyn IdentityProvider) -> Result<()> {
		let unsigned = canonical_ipld(&self.id, &self.payload, &self.next, &self.refs, &self.clock, &self.identity, None);
		let unsigned_bytes = encode_cbor(&unsigned)?;
		let sig_bytes = hex::decode(&self.sig).map_err(|_| StoreError::InvalidSignature)?;
		if !provider.verify(self.identity.pub_key(), &unsigned_bytes, &sig_bytes)? {
			return Err(StoreError::InvalidSignature);
		}

		let hashable = canonical_ipld(&self.id, &self.payload, &self.next, &self.refs, &self.clock, &self.identity, Some(&self.sig));
		let hashable_bytes = encode_cbor(&hashable)?;
		if content_address(&hashable_bytes) != self.hash {
			return Err(StoreError::InvalidSignature);
		}

		Ok(())
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn payload(&self) -> &[u8] {
		&self.payload
	}

	pub fn next(&self) -> &[Cid] {
		&self.next
	}

	pub fn refs(&self) -> &[Cid] {
		&self.refs
	}

	pub fn clock(&self) -> &LamportClock {
		&self.clock
	}

	pub fn identity(&self) -> &Identity {
		&self.identity
	}

	pub fn sig(&self) -> &str {
		&self.sig
	}

	pub fn hash(&self) -> &Cid {
		&self.hash
	}

	/// Encodes the entry (`sig` included, `hash` blanked) as dag-cbor for
	/// storage on the block service or inside a snapshot file. These are
	/// exactly the bytes `hash` is the content address of — the block a
	/// store puts is addressed by `hash()` itself, never by some other CID
	/// over a `hash`-carrying encoding.
	pub fn to_cbor(&self) -> Result<Vec<u8>> {
		let hashable = canonical_ipld(&self.id, &self.payload, &self.next, &self.refs, &self.clock, &self.identity, Some(&self.sig));
		encode_cbor(&hashable)
	}

	/// Encodes the entry as JSON, the wire format [`crate::store`]'s
	/// snapshotter uses for each length-prefixed block — distinct
	/// from the dag-cbor encoding entries use on the block service.
	pub fn to_json(&self) -> Result<Vec<u8>> {
		serde_json::to_vec(self).map_err(StoreError::Json)
	}

	/// Decodes an entry previously produced by [`LogEntry::to_json`].
	pub fn from_json(bytes: &[u8]) -> Result<LogEntry> {
		serde_json::from_slice(bytes).map_err(StoreError::Json)
	}

	/// Decodes an entry previously produced by [`LogEntry::to_cbor`].
	///
	/// The encoding never carries `hash` — it is the content address
	/// of these very bytes — so the caller passes in `hash`, the CID the
	/// block was fetched from (or is about to be put under). This is what
	/// lets [`LogEntry::verify`] mean something: `hash` is the fetching
	/// layer's claim, independently recomputed from the decoded fields and
	/// compared, rather than a value the bytes vouch for themselves.
	pub fn from_cbor(bytes: &[u8], hash: Cid) -> Result<LogEntry> {
		let ipld: Ipld = DagCborCodec
			.decode(bytes)
			.map_err(|e| StoreError::Decode(e.to_string()))?;
		let Ipld::Map(map) = ipld else {
			return Err(StoreError::Decode("expected a CBOR map for entry".to_owned()));
		};

		let id = match map.get("id") {
			Some(Ipld::String(s)) => s.to_owned(),
			_ => return Err(StoreError::Decode("entry missing id".to_owned())),
		};
		let payload = match map.get("payload") {
			Some(Ipld::Bytes(b)) => b.to_owned(),
			_ => return Err(StoreError::Decode("entry missing payload".to_owned())),
		};
		let next = decode_cid_list(map.get("next"))?;
		let refs = decode_cid_list(map.get("refs"))?;
		let clock = match map.get("clock") {
			Some(Ipld::Map(clock_map)) => {
				let clock_id = match clock_map.get("id") {
					Some(Ipld::String(s)) => s.to_owned(),
					_ => return Err(StoreError::Decode("entry clock missing id".to_owned())),
				};
				let time = match clock_map.get("time") {
					Some(Ipld::Integer(t)) => *t as u64,
					_ => return Err(StoreError::Decode("entry clock missing time".to_owned())),
				};
				LamportClock::new(&clock_id).set_time(time)
			}
			_ => return Err(StoreError::Decode("entry missing clock".to_owned())),
		};
		let identity = match map.get("identity") {
			Some(Ipld::Map(identity_map)) => decode_identity(identity_map)?,
			_ => return Err(StoreError::Decode("entry missing identity".to_owned())),
		};
		let sig = match map.get("sig") {
			Some(Ipld::String(s)) => s.to_owned(),
			_ => return Err(StoreError::Decode("entry missing sig".to_owned())),
		};

		Ok(LogEntry {
			id,
			payload,
			next,
			refs,
			clock,
			identity,
			sig,
			hash,
		})
	}
}

fn decode_cid_list(ipld: Option<&Ipld>) -> Result<Vec<Cid>> {
	match ipld {
		Some(Ipld::List(items)) => items
			.iter()
			.map(|item| match item {
				Ipld::Link(cid) => Ok(cid.to_owned()),
				_ => Err(StoreError::Decode("expected a CID link".to_owned())),
			})
			.collect(),
		None => Ok(Vec::new()),
		_ => Err(StoreError::Decode("expected a list of CID links".to_owned())),
	}
}

fn decode_identity(map: &BTreeMap<String, Ipld>) -> Result<Identity> {
	let id = match map.get("id") {
		Some(Ipld::String(s)) => s.to_owned(),
		_ => return Err(StoreError::Decode("identity missing id".to_owned())),
	};
	let public_key = match map.get("publicKey") {
		Some(Ipld::String(s)) => s.to_owned(),
		_ => return Err(StoreError::Decode("identity missing publicKey".to_owned())),
	};
	let signatures = match map.get("signatures") {
		Some(Ipld::Map(sig_map)) => {
			let sig_id = match sig_map.get("id") {
				Some(Ipld::String(s)) => s.to_owned(),
				_ => return Err(StoreError::Decode("identity signatures missing id".to_owned())),
			};
			let sig_pub = match sig_map.get("publicKey") {
				Some(Ipld::String(s)) => s.to_owned(),
				_ => return Err(StoreError::Decode("identity signatures missing publicKey".to_owned())),
			};
			crate::identity::Signatures::new(sig_id, sig_pub)
		}
		_ => return Err(StoreError::Decode("identity missing signatures".to_owned())),
	};
	Ok(Identity::new(id, public_key, signatures))
}

fn identity_ipld(identity: &Identity) -> Ipld {
	ipld!({
		"id": identity.id(),
		"publicKey": identity.pub_key(),
		"signatures": {
			"id": identity.signatures().id(),
			"publicKey": identity.signatures().public_key(),
		}
	})
}

fn canonical_ipld(
	id: &str,
	payload: &[u8],
	next: &[Cid],
	refs: &[Cid],
	clock: &LamportClock,
	identity: &Identity,
	sig: Option<&str>,
) -> Ipld {
	let mut map: BTreeMap<String, Ipld> = BTreeMap::new();
	map.insert("id".to_owned(), Ipld::String(id.to_owned()));
	map.insert("payload".to_owned(), Ipld::Bytes(payload.to_vec()));
	map.insert(
		"next".to_owned(),
		Ipld::List(next.iter().cloned().map(Ipld::Link).collect()),
	);
	map.insert(
		"refs".to_owned(),
		Ipld::List(refs.iter().cloned().map(Ipld::Link).collect()),
	);
	map.insert(
		"clock".to_owned(),
		ipld!({ "id": clock.id(), "time": clock.time() as i64 }),
	);
	map.insert("identity".to_owned(), identity_ipld(identity));
	if let Some(sig) = sig {
		map.insert("sig".to_owned(), Ipld::String(sig.to_owned()));
	}
	Ipld::Map(map)
}

fn encode_cbor(ipld: &Ipld) -> Result<Vec<u8>> {
	DagCborCodec.encode(ipld).map_err(|e| StoreError::Decode(e.to_string()))
}

/// Derives a dag-cbor CID from already-encoded canonical bytes.
pub(crate) fn content_address(bytes: &[u8]) -> Cid {
	let digest = Sha256::digest(bytes);
	let mh = Multihash::<64>::wrap(SHA2_256_CODE, &digest).expect("sha2-256 digest fits the 64-byte multihash bound");
	Cid::new_v1(DAG_CBOR_CODE, mh)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::identity::Secp256k1IdentityProvider;

	fn fixture() -> (Identity, Secp256k1IdentityProvider) {
		let provider = Secp256k1IdentityProvider::generate();
		let identity = provider.create_identity("userA").unwrap();
		(identity, provider)
	}

	#[test]
	fn new_entry_has_nonempty_hash() {
		let (identity, provider) = fixture();
		let clock = LamportClock::new(identity.pub_key()).set_time(1);
		let entry = LogEntry::create(&identity, &provider, "log1", b"hello1", vec![], vec![], clock).unwrap();
		assert!(!entry.hash().to_string().is_empty());
		assert_eq!(entry.payload(), b"hello1");
	}

	#[test]
	fn verify_detects_tampering() {
		let (identity, provider) = fixture();
		let clock = LamportClock::new(identity.pub_key()).set_time(1);
		let mut entry = LogEntry::create(&identity, &provider, "log1", b"hello1", vec![], vec![], clock).unwrap();
		assert!(entry.verify(&provider).is_ok());
		entry.payload = b"tampered".to_vec();
		assert!(entry.verify(&provider).is_err());
	}
}
