//! Credential lifecycle: minting, persisting, rotating, and deleting origin applications.
//!
//! [`CredentialLifecycle`] works against any [`ApplicationPortal`]. The bundled
//! [`IntraPortal`] drives the origin's HTML forms with a logged-in session. The lifecycle
//! borrows the executor per call and never owns it, so it can be installed as the executor's
//! [`CredentialRotator`] without a reference cycle.

#[cfg(feature = "reqwest")] pub mod portal;
pub mod scrape;

#[cfg(feature = "reqwest")] pub use portal::*;

// crates.io
use tokio::{sync::Semaphore, task::JoinSet};
// self
use crate::{
	_prelude::*,
	auth::{Credential, Identity, NewCredential},
	executor::{CredentialRotator, Executor, RotateFuture},
	limit::RateLimitedClient,
	store::HarvestStore,
};

/// Portal operations allowed in flight during bulk minting and deletion.
pub const PROVISION_CONCURRENCY: usize = 42;

/// Boxed future returned by [`ApplicationPortal`] operations.
pub type PortalFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Failures while scraping or submitting portal forms.
#[derive(Debug, ThisError)]
pub enum PortalError {
	/// The portal answered a stage with an unexpected status.
	#[error("Portal answered {stage} with status {status}.")]
	UnexpectedStatus {
		/// Operation that failed.
		stage: &'static str,
		/// Received status.
		status: u16,
	},
	/// The application list carried no CSRF token.
	#[error("Portal page did not contain a CSRF token.")]
	MissingCsrfToken,
	/// The application list carried no `.apps-root` element.
	#[error("Portal page did not contain the application list.")]
	MissingAppsRoot,
	/// The application list data attribute is not the expected JSON.
	#[error("Application list is malformed.")]
	MalformedAppList {
		/// Decoding failure.
		#[source]
		source: serde_json::Error,
	},
	/// The create response neither linked nor redirected to the new application.
	#[error("Invalid response, did you pass the right authenticity token?")]
	MissingApplicationId,
	/// A link or redirect pointed at something other than an application id.
	#[error("`{value}` does not name an application.")]
	InvalidApplicationId {
		/// Offending path.
		value: String,
	},
	/// The application page did not show both client credentials.
	#[error("Application page did not contain client credentials.")]
	MissingCredentials,
	/// A built-in CSS selector failed to parse.
	#[error("Selector `{selector}` is invalid.")]
	Selector {
		/// Offending selector.
		selector: &'static str,
	},
	/// Session values cannot be sent as header values.
	#[error("Portal session contains characters that are not valid in a header.")]
	InvalidHeader,
}

/// Origin-side management of OAuth applications.
pub trait ApplicationPortal
where
	Self: Send + Sync,
{
	/// Creates one application and reads back its client credentials.
	fn mint_one(&self) -> PortalFuture<'_, NewCredential>;

	/// Ids of every application owned by the session.
	fn list_existing_ids(&self) -> PortalFuture<'_, Vec<u64>>;

	/// Deletes one application.
	fn delete_one(&self, app_id: u64) -> PortalFuture<'_, ()>;
}

/// Mints, persists, rotates, and deletes credentials.
pub struct CredentialLifecycle {
	portal: Arc<dyn ApplicationPortal>,
	store: Arc<dyn HarvestStore>,
	concurrency: usize,
}
impl CredentialLifecycle {
	/// Creates a lifecycle over `portal`, persisting into `store`.
	pub fn new(portal: Arc<dyn ApplicationPortal>, store: Arc<dyn HarvestStore>) -> Self {
		Self { portal, store, concurrency: PROVISION_CONCURRENCY }
	}

	/// Overrides the number of portal operations in flight; zero is treated as one.
	pub fn with_concurrency(mut self, concurrency: usize) -> Self {
		self.concurrency = concurrency.max(1);

		self
	}

	/// Store credentials are persisted into.
	pub fn store(&self) -> &Arc<dyn HarvestStore> {
		&self.store
	}

	/// Mints `target` credentials when the store holds none, admitting each into the
	/// executor's pool as soon as its token is granted.
	///
	/// Returns how many credentials were minted; zero when the store was already populated.
	pub async fn ensure_initial(
		self: &Arc<Self>,
		executor: &Arc<Executor>,
		target: usize,
	) -> Result<usize> {
		let stored = self.store.list_credentials().await?.len();

		if stored > 0 {
			tracing::debug!(stored, "credentials already provisioned");

			return Ok(0);
		}

		tracing::info!(target, "provisioning credentials");

		let semaphore = Arc::new(Semaphore::new(self.concurrency));
		let mut tasks = JoinSet::new();

		for _ in 0..target {
			let permit = semaphore.clone().acquire_owned().await.map_err(|_| Error::Cancelled)?;
			let lifecycle = self.clone();
			let executor = executor.clone();

			tasks.spawn(async move {
				let _permit = permit;

				lifecycle.provision_one(&executor, target).await
			});
		}

		let mut minted = 0;
		let mut first_error = None;

		while let Some(joined) = tasks.join_next().await {
			match joined.map_err(Error::from).and_then(|outcome| outcome) {
				Ok(()) => {
					minted += 1;

					tracing::info!("created credential {minted}/{target}");
				},
				Err(e) => {
					tracing::warn!(error = %e, "credential provisioning failed");

					first_error.get_or_insert(e);
				},
			}
		}

		match first_error {
			Some(source) =>
				Err(Error::Provisioning { minted, requested: target, source: Box::new(source) }),
			None => Ok(minted),
		}
	}

	async fn provision_one(&self, executor: &Executor, total: usize) -> Result<()> {
		let credential = self.mint_one().await?;
		let token = executor.client_credentials_token(&credential).await?;

		executor.admit(credential, token, total)?;

		Ok(())
	}

	/// Mints one credential through the portal and persists it.
	pub async fn mint_one(&self) -> Result<Credential> {
		let minted = self.portal.mint_one().await?;
		let credential = self.store.insert_credential(minted).await?;

		tracing::debug!(credential = credential.id, app_id = credential.app_id, "credential minted");

		Ok(credential)
	}

	/// Replaces the credential of `client` with a freshly minted one.
	///
	/// The client carries the new identity once this returns `Ok`. Removing the old
	/// credential from the store and deleting its origin application are best-effort.
	pub async fn rotate(
		&self,
		executor: &Executor,
		client: &RateLimitedClient,
	) -> Result<Identity> {
		let fresh = self.mint_one().await?;
		let token = executor.client_credentials_token(&fresh).await?;
		let previous = executor.pool().replace_credential(client, fresh.clone(), token.clone());

		tracing::info!(
			class = ?client.class(),
			old = ?previous.as_ref().map(|identity| identity.credential.id),
			new = fresh.id,
			"credential rotated"
		);

		if let Some(previous) = previous {
			if let Err(e) = self.store.delete_credential(previous.credential.id).await {
				tracing::warn!(
					credential = previous.credential.id,
					error = %e,
					"failed to forget rotated credential"
				);
			}
			if let Err(e) = self.portal.delete_one(previous.credential.app_id).await {
				tracing::warn!(
					app_id = previous.credential.app_id,
					error = %e,
					"failed to delete rotated application"
				);
			}
		}

		Ok(Identity::new(fresh, token))
	}

	/// Deletes every application the portal lists, then clears stored credentials.
	///
	/// Individual deletions that fail are logged and skipped. Returns how many applications
	/// were deleted.
	pub async fn delete_all(self: &Arc<Self>) -> Result<usize> {
		let ids = self.portal.list_existing_ids().await?;
		let semaphore = Arc::new(Semaphore::new(self.concurrency));
		let mut tasks = JoinSet::new();

		tracing::info!(applications = ids.len(), "deleting applications");

		for app_id in ids {
			let permit = semaphore.clone().acquire_owned().await.map_err(|_| Error::Cancelled)?;
			let lifecycle = self.clone();

			tasks.spawn(async move {
				let _permit = permit;

				lifecycle.portal.delete_one(app_id).await.map(|()| app_id)
			});
		}

		let mut deleted = 0;

		while let Some(joined) = tasks.join_next().await {
			match joined.map_err(Error::from).and_then(|outcome| outcome) {
				Ok(app_id) => {
					deleted += 1;

					tracing::debug!(app_id, "application deleted");
				},
				Err(e) => tracing::warn!(error = %e, "failed to delete application"),
			}
		}

		let cleared = self.store.clear_credentials().await?;

		tracing::info!(deleted, cleared, "applications deleted");

		Ok(deleted)
	}

	/// Provisions up to `target` credentials if none are stored, then loads the stored ones
	/// into the executor's pool.
	///
	/// Returns the number of pooled credentials.
	pub async fn bootstrap(
		self: &Arc<Self>,
		executor: &Arc<Executor>,
		target: usize,
	) -> Result<usize> {
		if self.ensure_initial(executor, target).await? > 0 {
			return Ok(executor.pool().len());
		}

		let stored = self.store.list_credentials().await?;

		executor.load_credentials(stored).await
	}
}
impl CredentialRotator for CredentialLifecycle {
	fn rotate<'a>(
		&'a self,
		executor: &'a Executor,
		client: &'a RateLimitedClient,
	) -> RotateFuture<'a> {
		Box::pin(CredentialLifecycle::rotate(self, executor, client))
	}
}
impl Debug for CredentialLifecycle {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialLifecycle").field("concurrency", &self.concurrency).finish()
	}
}
