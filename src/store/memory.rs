//! Thread-safe in-memory [`HarvestStore`] implementation for local development and tests.

// crates.io
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::{Credential, NewCredential},
	store::{HarvestStore, StoreError, StoreFuture, StoreState},
};

type SharedState = Arc<RwLock<StoreState>>;

/// Storage backend that keeps credentials and records in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(SharedState);
impl MemoryStore {
	fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> Result<T, StoreError> {
		Ok(f(&self.0.read()))
	}

	fn write<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> Result<T, StoreError> {
		Ok(f(&mut self.0.write()))
	}
}
impl HarvestStore for MemoryStore {
	fn list_credentials(&self) -> StoreFuture<'_, Vec<Credential>> {
		Box::pin(async move { self.read(StoreState::list_credentials) })
	}

	fn insert_credential(&self, credential: NewCredential) -> StoreFuture<'_, Credential> {
		Box::pin(async move { self.write(|state| state.insert_credential(credential)) })
	}

	fn delete_credential(&self, id: u64) -> StoreFuture<'_, bool> {
		Box::pin(async move { self.write(|state| state.delete_credential(id)) })
	}

	fn clear_credentials(&self) -> StoreFuture<'_, usize> {
		Box::pin(async move { self.write(StoreState::clear_credentials) })
	}

	fn marker<'a>(&'a self, endpoint: &'a str) -> StoreFuture<'a, Option<OffsetDateTime>> {
		Box::pin(async move { self.read(|state| state.marker(endpoint)) })
	}

	fn set_marker<'a>(&'a self, endpoint: &'a str, at: OffsetDateTime) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.write(|state| state.set_marker(endpoint, at)) })
	}

	fn upsert<'a>(
		&'a self,
		collection: &'a str,
		id: &'a str,
		record: Value,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.write(|state| state.upsert(collection, id, record)) })
	}

	fn upsert_many<'a>(
		&'a self,
		collection: &'a str,
		records: Vec<(String, Value)>,
	) -> StoreFuture<'a, usize> {
		Box::pin(async move { self.write(|state| state.upsert_many(collection, records)) })
	}

	fn clear_collection<'a>(&'a self, collection: &'a str) -> StoreFuture<'a, usize> {
		Box::pin(async move { self.write(|state| state.clear_collection(collection)) })
	}

	fn collection<'a>(&'a self, collection: &'a str) -> StoreFuture<'a, Vec<Value>> {
		Box::pin(async move { self.read(|state| state.collection(collection)) })
	}
}
