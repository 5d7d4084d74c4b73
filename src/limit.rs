//! Rate-limited HTTP client (RLC): one identity bound to two token buckets.
//!
//! Each [`RateLimitedClient`] owns a per-second and a per-hour [`governor`] limiter, a busy
//! flag that serializes its use, and the [`Identity`] it authenticates with. The identity
//! lives behind a lock so credential rotation can swap it without rebuilding the limiters.

// std
use std::{
	num::NonZeroU32,
	sync::atomic::{AtomicBool, Ordering},
};
// crates.io
use governor::{
	Quota, RateLimiter,
	clock::DefaultClock,
	state::{InMemoryState, NotKeyed},
};
// self
use crate::{
	_prelude::*,
	auth::{ClassId, Identity, Secret},
	error::{ConfigError, TransportError},
	http::{HttpRequest, HttpResponse, HttpTransport},
};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Default total deadline for one exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Token bucket shape: one token replenished every `period`, at most `burst` stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
	/// Interval after which one token is replenished.
	pub period: Duration,
	/// Bucket capacity.
	pub burst: u32,
}
impl LimiterConfig {
	/// Origin contract per second: one token per second, two stored.
	pub const PER_SECOND: Self = Self { period: Duration::from_secs(1), burst: 2 };
	/// Origin contract per hour: 1200 stored, one replenished per hour.
	pub const PER_HOUR: Self = Self { period: Duration::from_secs(3600), burst: 1200 };

	/// Creates a bucket configuration.
	pub const fn new(period: Duration, burst: u32) -> Self {
		Self { period, burst }
	}

	fn quota(self) -> Result<Quota, ConfigError> {
		let burst = NonZeroU32::new(self.burst)
			.ok_or(ConfigError::InvalidLimiter { reason: "burst must be positive" })?;
		let quota = Quota::with_period(self.period)
			.ok_or(ConfigError::InvalidLimiter { reason: "period must be positive" })?;

		Ok(quota.allow_burst(burst))
	}
}

/// Pair of bucket configurations applied to every client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
	/// Short-window bucket.
	pub per_second: LimiterConfig,
	/// Long-window bucket.
	pub per_hour: LimiterConfig,
}
impl RateLimits {
	/// Validates both buckets without building limiters.
	pub fn validate(&self) -> Result<(), ConfigError> {
		self.per_second.quota()?;
		self.per_hour.quota()?;

		Ok(())
	}
}
impl Default for RateLimits {
	fn default() -> Self {
		Self { per_second: LimiterConfig::PER_SECOND, per_hour: LimiterConfig::PER_HOUR }
	}
}

/// One identity (or none, for anonymous calls) bound to its own token buckets.
pub struct RateLimitedClient {
	transport: Arc<dyn HttpTransport>,
	per_second: DirectLimiter,
	per_hour: DirectLimiter,
	timeout: Duration,
	busy: AtomicBool,
	class: Option<ClassId>,
	identity: RwLock<Option<Identity>>,
}
impl RateLimitedClient {
	/// Builds a client for `identity`, pinned to `class`.
	pub fn new(
		transport: Arc<dyn HttpTransport>,
		class: ClassId,
		identity: Identity,
		limits: RateLimits,
		timeout: Duration,
	) -> Result<Self, ConfigError> {
		Self::build(transport, Some(class), Some(identity), limits, timeout)
	}

	/// Builds the shared unauthenticated client. It carries no identity but is still
	/// rate-limited.
	pub fn anonymous(
		transport: Arc<dyn HttpTransport>,
		limits: RateLimits,
		timeout: Duration,
	) -> Result<Self, ConfigError> {
		Self::build(transport, None, None, limits, timeout)
	}

	fn build(
		transport: Arc<dyn HttpTransport>,
		class: Option<ClassId>,
		identity: Option<Identity>,
		limits: RateLimits,
		timeout: Duration,
	) -> Result<Self, ConfigError> {
		if timeout.is_zero() {
			return Err(ConfigError::InvalidLimiter { reason: "timeout must be positive" });
		}

		Ok(Self {
			transport,
			per_second: RateLimiter::direct(limits.per_second.quota()?),
			per_hour: RateLimiter::direct(limits.per_hour.quota()?),
			timeout,
			busy: AtomicBool::new(false),
			class,
			identity: RwLock::new(identity),
		})
	}

	/// Class partition this client belongs to; `None` for the anonymous client.
	pub fn class(&self) -> Option<&ClassId> {
		self.class.as_ref()
	}

	/// Snapshot of the current identity.
	pub fn identity(&self) -> Option<Identity> {
		self.identity.read().clone()
	}

	/// Current bearer token, if the client carries an identity.
	pub fn access_token(&self) -> Option<Secret> {
		self.identity.read().as_ref().map(|identity| identity.access_token.clone())
	}

	/// Storage identifier of the carried credential.
	pub fn credential_id(&self) -> Option<u64> {
		self.identity.read().as_ref().map(|identity| identity.credential.id)
	}

	/// Atomically swaps the identity, returning the previous one.
	///
	/// Exchanges already dispatched keep the token they were built with.
	pub fn replace_identity(&self, identity: Identity) -> Option<Identity> {
		self.identity.write().replace(identity)
	}

	/// Returns `true` while a caller holds the client.
	pub fn is_busy(&self) -> bool {
		self.busy.load(Ordering::Acquire)
	}

	/// Marks the client busy if it was idle; returns whether the caller now owns it.
	pub(crate) fn try_claim(&self) -> bool {
		self.busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
	}

	pub(crate) fn release(&self) {
		self.busy.store(false, Ordering::Release);
	}

	/// Waits for both buckets, then performs the exchange under the total deadline.
	///
	/// Non-success statuses are returned as responses; only transport failures and
	/// timeouts are errors.
	pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
		self.per_second.until_ready().await;
		self.per_hour.until_ready().await;

		tokio::time::timeout(self.timeout, self.transport.call(request))
			.await
			.map_err(|_| TransportError::Timeout { after: self.timeout })?
	}
}
impl Debug for RateLimitedClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimitedClient")
			.field("class", &self.class)
			.field("credential_id", &self.credential_id())
			.field("busy", &self.is_busy())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::time::Instant;
	// self
	use super::*;
	use crate::_preludet::*;

	fn client_with(limits: RateLimits, transport: Arc<ScriptedTransport>) -> RateLimitedClient {
		RateLimitedClient::anonymous(transport, limits, DEFAULT_TIMEOUT)
			.expect("Anonymous client should build with valid limits.")
	}

	#[test]
	fn limiter_config_rejects_zero_values() {
		assert!(LimiterConfig::new(Duration::ZERO, 2).quota().is_err());
		assert!(LimiterConfig::new(Duration::from_secs(1), 0).quota().is_err());
		assert!(RateLimits::default().validate().is_ok());
	}

	#[test]
	fn claim_is_exclusive_until_release() {
		let client = client_with(RateLimits::default(), ScriptedTransport::ok_json("{}"));

		assert!(client.try_claim());
		assert!(client.is_busy());
		assert!(!client.try_claim());

		client.release();

		assert!(!client.is_busy());
		assert!(client.try_claim());
	}

	#[tokio::test]
	async fn per_second_bucket_spaces_requests_after_burst() {
		let limits = RateLimits {
			per_second: LimiterConfig::new(Duration::from_millis(100), 2),
			per_hour: LimiterConfig::PER_HOUR,
		};
		let transport = ScriptedTransport::ok_json("[]");
		let client = client_with(limits, transport.clone());
		let started = Instant::now();

		for _ in 0..5 {
			client
				.send(get_request("/v2/campus"))
				.await
				.expect("Scripted transport should answer every request.");
		}

		// Two burst tokens, then three replenishments of 100ms each.
		assert!(started.elapsed() >= Duration::from_millis(290));
		assert_eq!(transport.request_count(), 5);
	}

	#[tokio::test]
	async fn hourly_bucket_stops_after_its_burst() {
		let limits =
			RateLimits { per_second: fast_limits().per_second, per_hour: LimiterConfig::PER_HOUR };
		let transport = ScriptedTransport::ok_json("[]");
		let client = client_with(limits, transport.clone());

		for _ in 0..1200 {
			client
				.send(get_request("/v2/campus"))
				.await
				.expect("The first 1200 requests fit in the hourly bucket.");
		}

		let blocked =
			tokio::time::timeout(Duration::from_millis(200), client.send(get_request("/v2/campus")))
				.await;

		assert!(blocked.is_err(), "Request 1201 must wait for the next hour.");
		assert_eq!(transport.request_count(), 1200);
	}

	#[tokio::test]
	async fn slow_transport_times_out() {
		let transport = ScriptedTransport::new(|_| {
			ScriptedReply::json(200, "{}").delayed(Duration::from_millis(200))
		});
		let client = RateLimitedClient::anonymous(
			transport,
			RateLimits::default(),
			Duration::from_millis(20),
		)
		.expect("Anonymous client should build with a short timeout.");
		let err = client
			.send(get_request("/v2/campus"))
			.await
			.expect_err("Slow transport should exceed the deadline.");

		assert!(matches!(err, TransportError::Timeout { .. }));
	}
}
