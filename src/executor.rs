//! Request executor: routes, authenticates, retries, rotates, and decodes origin calls.
//!
//! The [`Executor`] ties the pieces together. Pooled requests are routed to their endpoint
//! class, sent with a leased credential, and retried once after an authorization or
//! throttling rejection. A second rejection rotates the credential through the configured
//! [`CredentialRotator`] before the final attempt.

// crates.io
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{ClassId, Credential, Identity, Secret, TOKEN_PATH, TokenGrant, grant::TokenResponse},
	error::ConfigError,
	http::{HttpResponse, HttpTransport},
	limit::{DEFAULT_TIMEOUT, RateLimitedClient, RateLimits},
	obs::{DebugTap, FetchSpan, RequestKind, RequestOutcome, record_request_outcome},
	pool::{ACQUIRE_BACKOFF, CredentialPool, Lease},
	request::{ApiRequest, AuthMode},
	route::{ClassTable, ClassTableError, OAUTH_CLASS},
	stats::FetchStats,
};

/// Production origin.
pub const API_BASE: &str = "https://api.intra.42.fr";
/// Pause before retrying a rejected or throttled exchange.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

const THROTTLED_BODY: &[u8] = b"429";

/// Boxed future returned by [`CredentialRotator::rotate`].
pub type RotateFuture<'a> = Pin<Box<dyn Future<Output = Result<Identity>> + 'a + Send>>;

/// Replaces the credential of a client whose requests keep being rejected.
///
/// Implementations mint a new credential, obtain its access token through `executor`, and
/// swap it onto `client` before returning the new identity.
pub trait CredentialRotator
where
	Self: Send + Sync,
{
	/// Rotates the credential carried by `client`.
	fn rotate<'a>(
		&'a self,
		executor: &'a Executor,
		client: &'a RateLimitedClient,
	) -> RotateFuture<'a>;
}

/// Executes [`ApiRequest`]s against the origin.
pub struct Executor {
	transport: Arc<dyn HttpTransport>,
	base_url: Url,
	table: ClassTable,
	pool: CredentialPool,
	anonymous: Arc<RateLimitedClient>,
	limits: RateLimits,
	timeout: Duration,
	retry_delay: Duration,
	acquire_backoff: Duration,
	stats: FetchStats,
	debug: DebugTap,
	rotator: Option<Arc<dyn CredentialRotator>>,
}
impl Executor {
	/// Starts a builder for an executor using `transport` and the class `table`.
	pub fn builder(transport: Arc<dyn HttpTransport>, table: ClassTable) -> ExecutorBuilder {
		ExecutorBuilder::new(transport, table)
	}

	/// Origin base URL.
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Endpoint class table used for routing.
	pub fn table(&self) -> &ClassTable {
		&self.table
	}

	/// Live credential pool.
	pub fn pool(&self) -> &CredentialPool {
		&self.pool
	}

	/// Page counters shared by every paginated fetch of this executor.
	pub fn stats(&self) -> &FetchStats {
		&self.stats
	}

	/// Executes `request` and decodes the JSON body into `T`.
	pub async fn execute<T>(&self, request: &ApiRequest) -> Result<T>
	where
		T: DeserializeOwned,
	{
		self.execute_as(request, RequestKind::Api).await
	}

	pub(crate) async fn execute_as<T>(&self, request: &ApiRequest, kind: RequestKind) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let span = FetchSpan::new(kind, "execute", request.path());

		record_request_outcome(kind, RequestOutcome::Attempt);

		let result = span.instrument(self.exchange(request, kind)).await;

		match &result {
			Ok(_) => record_request_outcome(kind, RequestOutcome::Success),
			Err(e) => {
				record_request_outcome(kind, RequestOutcome::Failure);
				tracing::debug!(path = request.path(), error = %e, "request failed");
			},
		}

		result
	}

	async fn exchange<T>(&self, request: &ApiRequest, kind: RequestKind) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let mut body_retry = true;

		loop {
			let response = self.dispatch(request, kind).await?;

			if body_retry && response.body().starts_with(THROTTLED_BODY) {
				body_retry = false;

				record_request_outcome(kind, RequestOutcome::Retry);
				tracing::warn!(path = request.path(), "throttled response body, retrying");
				tokio::time::sleep(self.retry_delay).await;

				continue;
			}

			let status = response.status();

			if !status.is_success() {
				return Err(Error::unexpected_status(status.as_u16(), response.body()));
			}

			return decode(&response);
		}
	}

	/// One logical exchange, including the retry and rotation policy of pooled requests.
	async fn dispatch(&self, request: &ApiRequest, kind: RequestKind) -> Result<HttpResponse> {
		match request.auth() {
			AuthMode::Anonymous => {
				let lease = Lease::wait_for(self.anonymous.clone(), self.acquire_backoff).await;

				self.send(&lease, request, None).await
			},
			AuthMode::Bearer(token) => {
				let lease = Lease::wait_for(self.anonymous.clone(), self.acquire_backoff).await;

				self.send(&lease, request, Some(token)).await
			},
			AuthMode::Pool => {
				let class = self.table.class_for(request.path())?.clone();
				let lease = self.pool.acquire(&class).await?;

				self.dispatch_pooled(&lease, &class, request, kind).await
			},
		}
	}

	async fn dispatch_pooled(
		&self,
		lease: &Lease,
		class: &ClassId,
		request: &ApiRequest,
		kind: RequestKind,
	) -> Result<HttpResponse> {
		let response = self.send(lease, request, lease.access_token().as_ref()).await?;

		if !is_rejection(response.status()) {
			return Ok(response);
		}

		record_request_outcome(kind, RequestOutcome::Retry);
		tracing::warn!(
			%class,
			path = request.path(),
			status = response.status().as_u16(),
			"credential rejected, retrying"
		);
		tokio::time::sleep(self.retry_delay).await;

		let response = self.send(lease, request, lease.access_token().as_ref()).await?;
		let status = response.status();

		if !is_rejection(status) {
			return Ok(response);
		}

		let Some(rotator) = &self.rotator else {
			return Err(Error::CredentialExhausted { class: class.clone(), status: status.as_u16() });
		};

		record_request_outcome(kind, RequestOutcome::Rotation);
		tracing::warn!(
			%class,
			credential = ?lease.credential_id(),
			status = status.as_u16(),
			"credential still rejected, rotating"
		);
		rotator.rotate(self, lease.client()).await?;

		let response = self.send(lease, request, lease.access_token().as_ref()).await?;
		let status = response.status();

		if is_rejection(status) {
			return Err(Error::CredentialExhausted { class: class.clone(), status: status.as_u16() });
		}

		Ok(response)
	}

	async fn send(
		&self,
		client: &RateLimitedClient,
		request: &ApiRequest,
		bearer: Option<&Secret>,
	) -> Result<HttpResponse> {
		let http_request = request.to_http(&self.base_url, bearer, OffsetDateTime::now_utc())?;

		self.debug.request(&http_request);

		let response = client.send(http_request).await?;

		self.debug.response(request.path(), &response);

		if let Some(sink) = request.header_sink() {
			sink.store(response.headers().clone());
		}

		Ok(response)
	}

	/// Exchanges `grant` for an access token of `credential`.
	///
	/// Token requests are unauthenticated and go through the shared anonymous client.
	pub async fn token(&self, credential: &Credential, grant: &TokenGrant) -> Result<Secret> {
		let request =
			ApiRequest::new(TOKEN_PATH).method(Method::POST).params(grant.params(credential));
		let response: TokenResponse = self.execute_as(&request, RequestKind::Token).await?;

		if response.access_token.is_empty() {
			return Err(ConfigError::MissingAccessToken.into());
		}

		Ok(Secret::new(response.access_token))
	}

	/// Application-level access token for `credential`.
	pub async fn client_credentials_token(&self, credential: &Credential) -> Result<Secret> {
		self.token(credential, &TokenGrant::ClientCredentials).await
	}

	/// Exchanges a user's authorization `code` for a token, acting as the oauth class
	/// credential.
	pub async fn login_token(&self, code: &str, next: &str) -> Result<Secret> {
		let credential = self.oauth_credential().ok_or(ConfigError::MissingOauthCredential)?;
		let grant = TokenGrant::AuthorizationCode { code: code.into(), next: next.into() };

		self.token(&credential, &grant).await
	}

	/// Credential carried by the first client of the oauth class.
	pub fn oauth_credential(&self) -> Option<Credential> {
		self.pool
			.clients(OAUTH_CLASS)
			.into_iter()
			.find_map(|client| client.identity())
			.map(|identity| identity.credential)
	}

	/// Admits `credential` into the class that most needs it, given `total` credentials in the
	/// budget.
	pub fn admit(
		&self,
		credential: Credential,
		access_token: Secret,
		total: usize,
	) -> Result<Arc<RateLimitedClient>, ConfigError> {
		let credential_id = credential.id;
		let identity = Identity::new(credential, access_token);
		let client = self.pool.admit_balanced(&self.table, total, |class| {
			self.client_for(class, identity)
		})?;

		tracing::debug!(class = ?client.class(), credential = credential_id, "credential admitted");

		Ok(client)
	}

	/// Admits `identity` into an explicit class.
	pub fn admit_to(
		&self,
		class: ClassId,
		identity: Identity,
	) -> Result<Arc<RateLimitedClient>, ConfigError> {
		if self.table.get(&class).is_none() {
			return Err(ClassTableError::UnknownClass { id: class }.into());
		}

		let credential_id = identity.credential.id;
		let client = self.client_for(class.clone(), identity)?;

		tracing::debug!(%class, credential = credential_id, "credential admitted");

		Ok(self.pool.admit(client))
	}

	fn client_for(
		&self,
		class: ClassId,
		identity: Identity,
	) -> Result<RateLimitedClient, ConfigError> {
		RateLimitedClient::new(self.transport.clone(), class, identity, self.limits, self.timeout)
	}

	/// Grants tokens for stored `credentials` and admits them, balancing classes by share.
	///
	/// Credentials whose token grant fails are logged and skipped. Returns how many were
	/// admitted.
	pub async fn load_credentials(&self, credentials: Vec<Credential>) -> Result<usize> {
		let total = credentials.len();
		let mut admitted = 0;

		for credential in credentials {
			match self.client_credentials_token(&credential).await {
				Ok(token) => {
					self.admit(credential, token, total)?;

					admitted += 1;
				},
				Err(e) => tracing::warn!(
					credential = credential.id,
					error = %e,
					"skipping credential whose token grant failed"
				),
			}
		}

		tracing::info!(admitted, total, "credentials loaded");

		Ok(admitted)
	}
}
impl Debug for Executor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Executor")
			.field("base_url", &self.base_url.as_str())
			.field("pool", &self.pool)
			.field("stats", &self.stats)
			.field("debug", &self.debug)
			.field("rotator", &self.rotator.is_some())
			.finish()
	}
}

/// Builder for [`Executor`] values.
pub struct ExecutorBuilder {
	transport: Arc<dyn HttpTransport>,
	table: ClassTable,
	base_url: String,
	limits: RateLimits,
	timeout: Duration,
	retry_delay: Duration,
	acquire_backoff: Duration,
	debug: DebugTap,
	rotator: Option<Arc<dyn CredentialRotator>>,
}
impl ExecutorBuilder {
	fn new(transport: Arc<dyn HttpTransport>, table: ClassTable) -> Self {
		Self {
			transport,
			table,
			base_url: API_BASE.into(),
			limits: RateLimits::default(),
			timeout: DEFAULT_TIMEOUT,
			retry_delay: RETRY_DELAY,
			acquire_backoff: ACQUIRE_BACKOFF,
			debug: DebugTap::Off,
			rotator: None,
		}
	}

	/// Overrides the origin base URL.
	pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
		self.base_url = base_url.into();

		self
	}

	/// Overrides the token buckets applied to every client.
	pub fn limits(mut self, limits: RateLimits) -> Self {
		self.limits = limits;

		self
	}

	/// Overrides the total deadline of one exchange.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Overrides the pause before retrying a rejected exchange.
	pub fn retry_delay(mut self, delay: Duration) -> Self {
		self.retry_delay = delay;

		self
	}

	/// Overrides the pause between pool scans while every client is busy.
	pub fn acquire_backoff(mut self, backoff: Duration) -> Self {
		self.acquire_backoff = backoff;

		self
	}

	/// Selects the exchanges dumped to standard error.
	pub fn debug_tap(mut self, debug: DebugTap) -> Self {
		self.debug = debug;

		self
	}

	/// Enables credential rotation after repeated rejections.
	pub fn rotator(mut self, rotator: Arc<dyn CredentialRotator>) -> Self {
		self.rotator = Some(rotator);

		self
	}

	/// Validates the configuration and builds the executor.
	pub fn build(self) -> Result<Executor, ConfigError> {
		let base_url = Url::parse(&self.base_url)
			.map_err(|source| ConfigError::InvalidBaseUrl { value: self.base_url.clone(), source })?;

		self.limits.validate()?;

		let anonymous = Arc::new(RateLimitedClient::anonymous(
			self.transport.clone(),
			self.limits,
			self.timeout,
		)?);

		Ok(Executor {
			transport: self.transport,
			base_url,
			table: self.table,
			pool: CredentialPool::with_backoff(self.acquire_backoff),
			anonymous,
			limits: self.limits,
			timeout: self.timeout,
			retry_delay: self.retry_delay,
			acquire_backoff: self.acquire_backoff,
			stats: FetchStats::default(),
			debug: self.debug,
			rotator: self.rotator,
		})
	}
}
impl Debug for ExecutorBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ExecutorBuilder")
			.field("base_url", &self.base_url)
			.field("limits", &self.limits)
			.field("timeout", &self.timeout)
			.field("retry_delay", &self.retry_delay)
			.finish()
	}
}

fn is_rejection(status: StatusCode) -> bool {
	matches!(status, StatusCode::UNAUTHORIZED | StatusCode::TOO_MANY_REQUESTS)
}

fn decode<T>(response: &HttpResponse) -> Result<T>
where
	T: DeserializeOwned,
{
	let mut deserializer = serde_json::Deserializer::from_slice(response.body());

	serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|source| Error::parse(response.status().as_u16(), response.body(), source))
}
