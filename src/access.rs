//! Access control policy: out-of-scope collaborator consulted by
//! [`crate::log::Log::append`] and [`crate::log::Log::join`] before an
//! entry is admitted.

use crate::entry::LogEntry;
use crate::error::{Result, StoreError};
use crate::gset::GSet;
use crate::identity::IdentityProvider;

/// Decides whether an entry is allowed onto a log.
pub trait AccessController: Send + Sync {
	fn can_append(&self, entry: &LogEntry, identity_provider: &dyn IdentityProvider) -> Result<()>;
}

/// A write-list access controller: an entry is admitted only if its
/// identity's public key (or id) is in the `write` set, mirroring
/// go-orbit-db's `accesscontroller/simple`, which defaults a new store's
/// access controller to `{"write": [owner_identity]}`.
#[derive(Debug, Clone)]
pub struct SimpleAccessController {
	write: GSet<String>,
}

impl SimpleAccessController {
	pub fn new(write: impl IntoIterator<Item = String>) -> SimpleAccessController {
		SimpleAccessController {
			write: write.into_iter().collect(),
		}
	}

	/// A controller that only the given owner may append to.
	pub fn owner_only(owner_public_key: impl Into<String>) -> SimpleAccessController {
		SimpleAccessController::new([owner_public_key.into()])
	}

	pub fn grant(&mut self, public_key: impl Into<String>) {
		self.write.insert(public_key.into());
	}

	pub fn can_write(&self, public_key: &str) -> bool {
		self.write.contains(public_key) || self.write.contains("*")
	}
}

impl AccessController for SimpleAccessController {
	fn can_append(&self, entry: &LogEntry, identity_provider: &dyn IdentityProvider) -> Result<()> {
		if !self.can_write(entry.identity().pub_key()) {
			return Err(StoreError::AccessDenied(format!(
				"identity \"{}\" is not allowed to write",
				entry.identity().id()
			)));
		}

		entry
			.verify(identity_provider)
			.map_err(|_| StoreError::AccessDenied("entry signature did not verify".to_owned()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::identity::Secp256k1IdentityProvider;
	use crate::lamport_clock::LamportClock;

	#[test]
	fn owner_can_append_others_cannot() {
		let provider = Secp256k1IdentityProvider::generate();
		let owner = provider.create_identity("owner").unwrap();
		let stranger_provider = Secp256k1IdentityProvider::generate();
		let stranger = stranger_provider.create_identity("stranger").unwrap();

		let acl = SimpleAccessController::owner_only(owner.pub_key());

		let clock = LamportClock::new(owner.pub_key()).set_time(1);
		let entry = LogEntry::create(&owner, &provider, "log1", b"hi", vec![], vec![], clock).unwrap();
		assert!(acl.can_append(&entry, &provider).is_ok());

		let clock = LamportClock::new(stranger.pub_key()).set_time(1);
		let entry = LogEntry::create(&stranger, &stranger_provider, "log1", b"hi", vec![], vec![], clock).unwrap();
		assert!(acl.can_append(&entry, &stranger_provider).is_err());
	}
}
