//! File-backed [`HarvestStore`] that rewrites a JSON snapshot after each mutation.
//!
//! Harvest jobs write through [`HarvestStore::upsert_many`], so a listing page costs one
//! snapshot rather than one per record.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// crates.io
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::{Credential, NewCredential},
	store::{HarvestStore, StoreError, StoreFuture, StoreState},
};

/// Persists credentials, markers, and records to one JSON file.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<StoreState>>,
	writer: Arc<AsyncMutex<()>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let state = Self::load_state(&path)?;

		Ok(Self {
			path,
			inner: Arc::new(RwLock::new(state)),
			writer: Arc::new(AsyncMutex::new(())),
		})
	}

	/// Location of the snapshot.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_state(path: &Path) -> Result<StoreState, StoreError> {
		if !path.exists() {
			return Ok(StoreState::default());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(StoreState::default());
		}

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	/// Applies `f` and writes the resulting snapshot.
	///
	/// `writer` orders snapshots: the state is mutated and serialized only once the previous
	/// write finished, so the file never goes back to an older state. The file I/O runs on
	/// the blocking pool; the state lock is never held across it.
	async fn mutate<T, F>(&self, f: F) -> Result<T, StoreError>
	where
		F: FnOnce(&mut StoreState) -> T,
	{
		let _writer = self.writer.lock().await;
		let (output, serialized) = {
			let mut state = self.inner.write();
			let output = f(&mut state);
			let serialized =
				serde_json::to_vec_pretty(&*state).map_err(|e| StoreError::Serialization {
					message: format!("Failed to serialize store snapshot: {e}"),
				})?;

			(output, serialized)
		};
		let path = self.path.clone();

		tokio::task::spawn_blocking(move || write_snapshot(&path, &serialized))
			.await
			.map_err(|e| StoreError::Backend { message: format!("Snapshot writer failed: {e}") })??;

		Ok(output)
	}
}
impl HarvestStore for FileStore {
	fn list_credentials(&self) -> StoreFuture<'_, Vec<Credential>> {
		Box::pin(async move { Ok(self.inner.read().list_credentials()) })
	}

	fn insert_credential(&self, credential: NewCredential) -> StoreFuture<'_, Credential> {
		Box::pin(async move { self.mutate(|state| state.insert_credential(credential)).await })
	}

	fn delete_credential(&self, id: u64) -> StoreFuture<'_, bool> {
		Box::pin(async move { self.mutate(|state| state.delete_credential(id)).await })
	}

	fn clear_credentials(&self) -> StoreFuture<'_, usize> {
		Box::pin(async move { self.mutate(StoreState::clear_credentials).await })
	}

	fn marker<'a>(&'a self, endpoint: &'a str) -> StoreFuture<'a, Option<OffsetDateTime>> {
		Box::pin(async move { Ok(self.inner.read().marker(endpoint)) })
	}

	fn set_marker<'a>(&'a self, endpoint: &'a str, at: OffsetDateTime) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.mutate(|state| state.set_marker(endpoint, at)).await })
	}

	fn upsert<'a>(
		&'a self,
		collection: &'a str,
		id: &'a str,
		record: Value,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.mutate(|state| state.upsert(collection, id, record)).await })
	}

	fn upsert_many<'a>(
		&'a self,
		collection: &'a str,
		records: Vec<(String, Value)>,
	) -> StoreFuture<'a, usize> {
		Box::pin(async move { self.mutate(|state| state.upsert_many(collection, records)).await })
	}

	fn clear_collection<'a>(&'a self, collection: &'a str) -> StoreFuture<'a, usize> {
		Box::pin(async move { self.mutate(|state| state.clear_collection(collection)).await })
	}

	fn collection<'a>(&'a self, collection: &'a str) -> StoreFuture<'a, Vec<Value>> {
		Box::pin(async move { Ok(self.inner.read().collection(collection)) })
	}
}

fn write_snapshot(path: &Path, serialized: &[u8]) -> Result<(), StoreError> {
	let mut tmp_path = path.to_path_buf();

	tmp_path.set_extension("tmp");

	{
		let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
			message: format!("Failed to create {}: {e}", tmp_path.display()),
		})?;

		file.write_all(serialized).map_err(|e| StoreError::Backend {
			message: format!("Failed to write {}: {e}", tmp_path.display()),
		})?;
		file.sync_all().map_err(|e| StoreError::Backend {
			message: format!("Failed to sync {}: {e}", tmp_path.display()),
		})?;
	}

	fs::rename(&tmp_path, path).map_err(|e| StoreError::Backend {
		message: format!("Failed to replace {}: {e}", path.display()),
	})
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;

	fn temp_path() -> PathBuf {
		let unique = format!(
			"intra_harvester_file_store_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	#[tokio::test]
	async fn credentials_and_markers_survive_reopen() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let credential = NewCredential {
			app_id: 7,
			name: "harvester-7".into(),
			uid: "uid-7".into(),
			secret: crate::auth::Secret::new("secret-7"),
			redirect_uri: "http://localhost:8080".into(),
		};
		let stored = store
			.insert_credential(credential)
			.await
			.expect("Failed to insert fixture credential.");

		store
			.set_marker("/v2/locations", OffsetDateTime::UNIX_EPOCH)
			.await
			.expect("Failed to write marker.");
		drop(store);

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");
		let credentials =
			reopened.list_credentials().await.expect("Failed to list reopened credentials.");

		assert_eq!(credentials, vec![stored]);
		assert_eq!(
			reopened.marker("/v2/locations").await.expect("Failed to read marker."),
			Some(OffsetDateTime::UNIX_EPOCH)
		);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}
}
