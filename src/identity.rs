//! Identities sign log entries; an [`IdentityProvider`] is the narrow,
//! out-of-scope collaborator this crate consumes to produce and verify
//! those signatures. A `secp256k1`-backed provider is included because it
//! requires no external keystore, but callers may supply their own.

use std::cmp::Ordering;

use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signatures {
	id: String,
	public_key: String,
}

impl Signatures {
	pub fn new(id: impl Into<String>, public_key: impl Into<String>) -> Signatures {
		Signatures {
			id: id.into(),
			public_key: public_key.into(),
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn public_key(&self) -> &str {
		&self.public_key
	}
}

/// A signing identity bound to a log entry's `identity` field.
///
/// `id` is the application-chosen identifier (e.g. a username); `public_key`
/// is the hex-encoded verification key; `signatures` carries the identity
/// provider's own attestation that `id` and `public_key` belong together, so
/// a verifier does not need to trust the claim out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	id: String,
	public_key: String,
	signatures: Signatures,
}

impl Identity {
	pub fn new(id: impl Into<String>, public_key: impl Into<String>, signatures: Signatures) -> Identity {
		Identity {
			id: id.into(),
			public_key: public_key.into(),
			signatures,
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn pub_key(&self) -> &str {
		&self.public_key
	}

	pub fn signatures(&self) -> &Signatures {
		&self.signatures
	}
}

impl Ord for Identity {
	fn cmp(&self, other: &Self) -> Ordering {
		self.id.cmp(&other.id)
	}
}

impl PartialOrd for Identity {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

/// Out-of-scope collaborator: signs and verifies bytes on an identity's
/// behalf. Entry construction and `Log::join` call through this trait
/// rather than embedding one specific signature scheme.
pub trait IdentityProvider: Send + Sync {
	fn sign(&self, identity: &Identity, bytes: &[u8]) -> Result<Vec<u8>>;
	fn verify(&self, public_key: &str, bytes: &[u8], sig: &[u8]) -> Result<bool>;
}

/// An `IdentityProvider` backed by secp256k1 ECDSA over a SHA-256 digest of
/// the signed bytes, keyed by a single local keypair (one identity per
/// provider instance, matching how a CLI or daemon holds one signing key).
pub struct Secp256k1IdentityProvider {
	secret_key: SecretKey,
	public_key: PublicKey,
}

impl Secp256k1IdentityProvider {
	pub fn generate() -> Secp256k1IdentityProvider {
		let secp = Secp256k1::new();
		let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
		Secp256k1IdentityProvider { secret_key, public_key }
	}

	pub fn from_secret_key(secret_key: SecretKey) -> Secp256k1IdentityProvider {
		let secp = Secp256k1::new();
		let public_key = PublicKey::from_secret_key(&secp, &secret_key);
		Secp256k1IdentityProvider { secret_key, public_key }
	}

	pub fn public_key_hex(&self) -> String {
		hex::encode(self.public_key.serialize())
	}

	/// Creates an [`Identity`] for `id`, self-attesting `id` and the public
	/// key the way go-orbit-db's identity providers sign their own claims.
	pub fn create_identity(&self, id: &str) -> Result<Identity> {
		let public_key = self.public_key_hex();
		let id_sig = self.sign_raw(id.as_bytes())?;
		let pub_key_sig = self.sign_raw(format!("{}{}", public_key, id).as_bytes())?;
		Ok(Identity::new(
			id,
			public_key,
			Signatures::new(hex::encode(id_sig), hex::encode(pub_key_sig)),
		))
	}

	fn sign_raw(&self, bytes: &[u8]) -> Result<Vec<u8>> {
		let digest = Sha256::digest(bytes);
		let message = Message::from_digest_slice(&digest).map_err(|_| StoreError::InvalidSignature)?;
		let secp = Secp256k1::new();
		let sig = secp.sign_ecdsa(&message, &self.secret_key);
		Ok(sig.serialize_der().to_vec())
	}
}

impl IdentityProvider for Secp256k1IdentityProvider {
	fn sign(&self, _identity: &Identity, bytes: &[u8]) -> Result<Vec<u8>> {
		self.sign_raw(bytes)
	}

	fn verify(&self, public_key: &str, bytes: &[u8], sig: &[u8]) -> Result<bool> {
		let key_bytes = hex::decode(public_key).map_err(|_| StoreError::InvalidSignature)?;
		let public_key = PublicKey::from_slice(&key_bytes).map_err(|_| StoreError::InvalidSignature)?;
		let digest = Sha256::digest(bytes);
		let message = match Message::from_digest_slice(&digest) {
			Ok(m) => m,
			Err(_) => return Ok(false),
		};
		let signature = match Signature::from_der(sig) {
			Ok(s) => s,
			Err(_) => return Ok(false),
		};
		let secp = Secp256k1::new();
		Ok(secp.verify_ecdsa(&message, &signature, &public_key).is_ok())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identity_ordering_is_by_id() {
		let a = Identity::new("a", "pubA", Signatures::new("", ""));
		let b = Identity::new("b", "pubB", Signatures::new("", ""));
		assert!(a < b);
	}

	#[test]
	fn sign_and_verify_round_trip() {
		let provider = Secp256k1IdentityProvider::generate();
		let identity = provider.create_identity("userA").unwrap();
		let sig = provider.sign(&identity, b"hello").unwrap();
		assert!(provider.verify(identity.pub_key(), b"hello", &sig).unwrap());
		assert!(!provider.verify(identity.pub_key(), b"goodbye", &sig).unwrap());
	}
}
