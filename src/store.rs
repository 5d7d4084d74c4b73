//! Persistence contracts for credentials, incremental markers, and harvested records.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// crates.io
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::{Credential, NewCredential},
};

/// Boxed future returned by [`HarvestStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend shared by the credential lifecycle and the scheduled jobs.
pub trait HarvestStore
where
	Self: Send + Sync,
{
	/// Lists stored credentials in insertion order.
	fn list_credentials(&self) -> StoreFuture<'_, Vec<Credential>>;

	/// Persists a minted credential and assigns its storage identifier.
	fn insert_credential(&self, credential: NewCredential) -> StoreFuture<'_, Credential>;

	/// Deletes one credential; returns whether it existed.
	fn delete_credential(&self, id: u64) -> StoreFuture<'_, bool>;

	/// Deletes every credential; returns how many were removed.
	fn clear_credentials(&self) -> StoreFuture<'_, usize>;

	/// Reads the last-fetch marker of an endpoint.
	fn marker<'a>(&'a self, endpoint: &'a str) -> StoreFuture<'a, Option<OffsetDateTime>>;

	/// Writes the last-fetch marker of an endpoint.
	fn set_marker<'a>(&'a self, endpoint: &'a str, at: OffsetDateTime) -> StoreFuture<'a, ()>;

	/// Inserts or replaces one record of `collection`, keyed by `id`.
	fn upsert<'a>(
		&'a self,
		collection: &'a str,
		id: &'a str,
		record: Value,
	) -> StoreFuture<'a, ()>;

	/// Inserts or replaces a batch of `(id, record)` pairs in one write; returns the batch
	/// size.
	fn upsert_many<'a>(
		&'a self,
		collection: &'a str,
		records: Vec<(String, Value)>,
	) -> StoreFuture<'a, usize>;

	/// Removes every record of `collection`; returns how many were removed.
	fn clear_collection<'a>(&'a self, collection: &'a str) -> StoreFuture<'a, usize>;

	/// Records of `collection`, ordered by id.
	fn collection<'a>(&'a self, collection: &'a str) -> StoreFuture<'a, Vec<Value>>;
}

/// Error type produced by [`HarvestStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Marker(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

/// Whole store contents; both built-in backends mutate one of these under a lock.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoreState {
	next_id: u64,
	credentials: BTreeMap<u64, Credential>,
	markers: BTreeMap<String, Marker>,
	collections: BTreeMap<String, BTreeMap<String, Value>>,
}
impl StoreState {
	fn list_credentials(&self) -> Vec<Credential> {
		self.credentials.values().cloned().collect()
	}

	fn insert_credential(&mut self, credential: NewCredential) -> Credential {
		self.next_id += 1;

		let stored = credential.into_credential(self.next_id, OffsetDateTime::now_utc());

		self.credentials.insert(stored.id, stored.clone());

		stored
	}

	fn delete_credential(&mut self, id: u64) -> bool {
		self.credentials.remove(&id).is_some()
	}

	fn clear_credentials(&mut self) -> usize {
		let removed = self.credentials.len();

		self.credentials.clear();

		removed
	}

	fn marker(&self, endpoint: &str) -> Option<OffsetDateTime> {
		self.markers.get(endpoint).map(|marker| marker.0)
	}

	fn set_marker(&mut self, endpoint: &str, at: OffsetDateTime) {
		self.markers.insert(endpoint.to_owned(), Marker(at));
	}

	fn upsert(&mut self, collection: &str, id: &str, record: Value) {
		self.collections.entry(collection.to_owned()).or_default().insert(id.to_owned(), record);
	}

	fn upsert_many(&mut self, collection: &str, records: Vec<(String, Value)>) -> usize {
		let count = records.len();

		self.collections.entry(collection.to_owned()).or_default().extend(records);

		count
	}

	fn clear_collection(&mut self, collection: &str) -> usize {
		self.collections.remove(collection).map_or(0, |records| records.len())
	}

	fn collection(&self, collection: &str) -> Vec<Value> {
		self.collections
			.get(collection)
			.map(|records| records.values().cloned().collect())
			.unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::*;

	fn minted(app_id: u64) -> NewCredential {
		let credential = test_credential(app_id);

		NewCredential {
			app_id,
			name: credential.name,
			uid: credential.uid,
			secret: credential.secret,
			redirect_uri: credential.redirect_uri,
		}
	}

	#[test]
	fn credential_ids_increase_and_survive_deletes() {
		let mut state = StoreState::default();
		let first = state.insert_credential(minted(10));
		let second = state.insert_credential(minted(11));

		assert_eq!((first.id, second.id), (1, 2));
		assert!(state.delete_credential(1));
		assert!(!state.delete_credential(1));
		assert_eq!(state.insert_credential(minted(12)).id, 3);
		assert_eq!(state.clear_credentials(), 2);
		assert!(state.list_credentials().is_empty());
	}

	#[test]
	fn upsert_replaces_by_id() {
		let mut state = StoreState::default();

		state.upsert("locations", "1", serde_json::json!({ "id": 1, "host": "a" }));
		state.upsert("locations", "1", serde_json::json!({ "id": 1, "host": "b" }));
		state.upsert("locations", "2", serde_json::json!({ "id": 2, "host": "c" }));

		let records = state.collection("locations");

		assert_eq!(records.len(), 2);
		assert_eq!(records[0]["host"], "b");
		assert_eq!(state.clear_collection("locations"), 2);
		assert_eq!(state.clear_collection("locations"), 0);
	}

	#[test]
	fn markers_serialize_as_rfc3339() {
		let mut state = StoreState::default();

		state.set_marker("locations", OffsetDateTime::UNIX_EPOCH);

		let json = serde_json::to_value(&state).expect("Store state should serialize.");

		assert_eq!(json["markers"]["locations"], "1970-01-01T00:00:00Z");
		assert_eq!(state.marker("locations"), Some(OffsetDateTime::UNIX_EPOCH));
		assert_eq!(state.marker("campus"), None);
	}
}
