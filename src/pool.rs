//! Credential pool partitioned by endpoint class.
//!
//! Callers borrow a [`RateLimitedClient`] through [`CredentialPool::acquire`], which hands
//! out a [`Lease`]. The lease owns the client's busy flag: dropping it releases the client,
//! whatever the outcome of the exchange was.

// std
use std::ops::Deref;
// self
use crate::{
	_prelude::*,
	auth::{ClassId, Credential, Identity, Secret},
	limit::RateLimitedClient,
	route::ClassTable,
};

/// Pause between two scans when every client of a class is busy.
pub const ACQUIRE_BACKOFF: Duration = Duration::from_millis(100);

/// Exclusive, RAII-scoped use of one [`RateLimitedClient`].
pub struct Lease {
	client: Arc<RateLimitedClient>,
}
impl Lease {
	fn claim(client: &Arc<RateLimitedClient>) -> Option<Self> {
		client.try_claim().then(|| Self { client: client.clone() })
	}

	/// Waits until `client` is idle, then claims it.
	pub async fn wait_for(client: Arc<RateLimitedClient>, backoff: Duration) -> Self {
		loop {
			if let Some(lease) = Self::claim(&client) {
				return lease;
			}

			tokio::time::sleep(backoff).await;
		}
	}

	/// Shared handle to the leased client.
	pub fn client(&self) -> &Arc<RateLimitedClient> {
		&self.client
	}

	/// Releases the client immediately.
	pub fn release(self) {}
}
impl Deref for Lease {
	type Target = RateLimitedClient;

	fn deref(&self) -> &Self::Target {
		&self.client
	}
}
impl Drop for Lease {
	fn drop(&mut self) {
		self.client.release();
	}
}
impl Debug for Lease {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("Lease").field(&self.client).finish()
	}
}

/// Indexed collection of rate-limited clients, one disjoint partition per endpoint class.
#[derive(Debug)]
pub struct CredentialPool {
	partitions: Mutex<BTreeMap<ClassId, Vec<Arc<RateLimitedClient>>>>,
	backoff: Duration,
}
impl CredentialPool {
	/// Creates an empty pool with the default scan back-off.
	pub fn new() -> Self {
		Self::with_backoff(ACQUIRE_BACKOFF)
	}

	/// Creates an empty pool that waits `backoff` between scans.
	pub fn with_backoff(backoff: Duration) -> Self {
		Self { partitions: Mutex::new(BTreeMap::new()), backoff }
	}

	/// Adds a client to the partition of its class and returns the shared handle.
	///
	/// Anonymous clients have no class and are returned without being admitted.
	pub fn admit(&self, client: RateLimitedClient) -> Arc<RateLimitedClient> {
		let client = Arc::new(client);

		if let Some(class) = client.class().cloned() {
			self.partitions.lock().entry(class).or_default().push(client.clone());
		}

		client
	}

	/// Builds a client for the class that most needs one, given `total` credentials in the
	/// budget, and admits it.
	///
	/// The class is chosen and the client pushed under one lock, so concurrent provisioners
	/// never both fill the same gap.
	pub fn admit_balanced<F, E>(
		&self,
		table: &ClassTable,
		total: usize,
		build: F,
	) -> Result<Arc<RateLimitedClient>, E>
	where
		F: FnOnce(ClassId) -> Result<RateLimitedClient, E>,
	{
		let mut partitions = self.partitions.lock();
		let class =
			table.class_in_need(total, |id| partitions.get(id).map_or(0, Vec::len)).clone();
		let client = Arc::new(build(class.clone())?);

		partitions.entry(class).or_default().push(client.clone());

		Ok(client)
	}

	/// Removes the client carrying credential `credential_id`.
	pub fn remove(&self, credential_id: u64) -> Option<Arc<RateLimitedClient>> {
		let mut partitions = self.partitions.lock();

		for clients in partitions.values_mut() {
			if let Some(index) =
				clients.iter().position(|client| client.credential_id() == Some(credential_id))
			{
				return Some(clients.remove(index));
			}
		}

		None
	}

	/// Swaps the identity of `client` in place; limiters and partition are kept.
	pub fn replace_credential(
		&self,
		client: &RateLimitedClient,
		credential: Credential,
		access_token: Secret,
	) -> Option<Identity> {
		let _scan = self.partitions.lock();

		client.replace_identity(Identity::new(credential, access_token))
	}

	/// Waits for an idle client of `class` and leases it.
	///
	/// Scans the partition in order under the pool lock and claims the first idle client.
	/// The lock is dropped before sleeping between scans. A class without clients fails
	/// with [`Error::NoCredentials`] instead of waiting.
	pub async fn acquire(&self, class: &ClassId) -> Result<Lease> {
		loop {
			{
				let partitions = self.partitions.lock();
				let clients = partitions
					.get(class)
					.filter(|clients| !clients.is_empty())
					.ok_or_else(|| Error::NoCredentials { class: class.clone() })?;

				if let Some(lease) = clients.iter().find_map(Lease::claim) {
					return Ok(lease);
				}
			}

			tracing::trace!(%class, "all clients busy, waiting to find a new one");
			tokio::time::sleep(self.backoff).await;
		}
	}

	/// Releases a lease; equivalent to dropping it.
	pub fn release(&self, lease: Lease) {
		lease.release();
	}

	/// Number of clients in `class`.
	pub fn class_len(&self, class: &str) -> usize {
		self.partitions.lock().get(class).map_or(0, Vec::len)
	}

	/// Number of clients across all classes.
	pub fn len(&self) -> usize {
		self.partitions.lock().values().map(Vec::len).sum()
	}

	/// Returns `true` when no client has been admitted.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Clients of `class`, in scan order.
	pub fn clients(&self, class: &str) -> Vec<Arc<RateLimitedClient>> {
		self.partitions.lock().get(class).cloned().unwrap_or_default()
	}
}
impl Default for CredentialPool {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::*, limit::RateLimits};

	fn pool_with(classes: &[(&str, u64)]) -> CredentialPool {
		let pool = CredentialPool::with_backoff(Duration::from_millis(10));
		let transport = ScriptedTransport::ok_json("{}");

		for (class, id) in classes {
			let client = RateLimitedClient::new(
				transport.clone(),
				ClassId::new(class).expect("Class fixture should be valid."),
				test_identity(*id),
				RateLimits::default(),
				Duration::from_secs(5),
			)
			.expect("Client fixture should build.");

			pool.admit(client);
		}

		pool
	}

	fn class(id: &str) -> ClassId {
		ClassId::new(id).expect("Class fixture should be valid.")
	}

	#[tokio::test]
	async fn acquire_stays_within_class() {
		let pool = pool_with(&[("a", 1), ("b", 2), ("a", 3)]);
		let first = pool.acquire(&class("a")).await.expect("Class a should have a client.");
		let second = pool.acquire(&class("a")).await.expect("Class a should have two clients.");

		assert_eq!(first.credential_id(), Some(1));
		assert_eq!(second.credential_id(), Some(3));
		assert_eq!(pool.class_len("a"), 2);
		assert_eq!(pool.len(), 3);
	}

	#[tokio::test]
	async fn empty_class_fails_fast() {
		let pool = pool_with(&[("a", 1)]);
		let err = pool.acquire(&class("b")).await.expect_err("Class b has no clients.");

		assert!(matches!(err, Error::NoCredentials { .. }));
	}

	#[tokio::test]
	async fn busy_client_is_reused_only_after_release() {
		let pool = Arc::new(pool_with(&[("a", 1)]));
		let lease = pool.acquire(&class("a")).await.expect("First acquire should succeed.");
		let waiter = {
			let pool = pool.clone();

			tokio::spawn(async move { pool.acquire(&class("a")).await.map(|l| l.credential_id()) })
		};

		tokio::time::sleep(Duration::from_millis(50)).await;

		assert!(!waiter.is_finished(), "Second acquire must wait while the client is busy.");

		pool.release(lease);

		let id = waiter
			.await
			.expect("Waiter task should not panic.")
			.expect("Second acquire should succeed after release.");

		assert_eq!(id, Some(1));
	}

	#[tokio::test]
	async fn replace_and_remove_credentials() {
		let pool = pool_with(&[("a", 1)]);
		let client = pool.clients("a").remove(0);
		let previous = pool.replace_credential(&client, test_credential(9), Secret::new("fresh"));

		assert_eq!(previous.map(|identity| identity.credential.id), Some(1));
		assert_eq!(client.credential_id(), Some(9));
		assert_eq!(
			client.access_token().map(|token| token.expose().to_owned()).as_deref(),
			Some("fresh")
		);
		assert!(pool.remove(1).is_none());
		assert!(pool.remove(9).is_some());
		assert!(pool.is_empty());
	}

	#[test]
	fn balanced_admission_fills_quotas_in_table_order() {
		let table = ClassTable::builder()
			.class("oauth", ["/oauth"], 0.2)
			.class("a", ["/v2/campus"], 0.8)
			.build()
			.expect("Table fixture should be valid.");
		let pool = pool_with(&[("oauth", 1)]);
		let transport = ScriptedTransport::ok_json("{}");

		for id in 2..=6 {
			pool.admit_balanced(&table, 5, |class| {
				RateLimitedClient::new(
					transport.clone(),
					class,
					test_identity(id),
					RateLimits::default(),
					Duration::from_secs(5),
				)
			})
			.expect("Client fixture should build.");
		}

		// Four fill class a; the surplus one goes to the first class.
		assert_eq!(pool.class_len("a"), 4);
		assert_eq!(pool.class_len("oauth"), 2);
	}
}
