//! Harvester-level error types shared across the pool, executor, planner, and lifecycle layers.

// self
use crate::_prelude::*;

/// Harvester-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

const BODY_EXCERPT_LEN: usize = 512;

/// Canonical harvester error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Application portal scraping or form submission failed.
	#[error(transparent)]
	Portal(#[from] crate::lifecycle::PortalError),

	/// Response body could not be decoded into the requested type.
	#[error("Failed to decode response body with status {status}: {source} ({body}).")]
	Parse {
		/// HTTP status of the decoded response.
		status: u16,
		/// Truncated raw body.
		body: String,
		/// Structured decoding failure including the failing path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Listing headers were missing or malformed.
	#[error("Failed to get page count: {reason}.")]
	PageCount {
		/// Description of the missing or malformed header.
		reason: String,
	},
	/// No endpoint class matches the request path.
	#[error("No endpoint class matches `{path}`.")]
	NoRoute {
		/// Request path that failed to route.
		path: String,
	},
	/// The routed class has no credentials to serve the request.
	#[error("Endpoint class `{class}` has no credentials.")]
	NoCredentials {
		/// Class that was asked to serve the request.
		class: crate::auth::ClassId,
	},
	/// Retry and rotation both failed to clear an authorization or throttling response.
	#[error("Credential for class `{class}` is still rejected with status {status}.")]
	CredentialExhausted {
		/// Class of the rejected credential.
		class: crate::auth::ClassId,
		/// Last rejection status (401 or 429).
		status: u16,
	},
	/// Origin answered with a non-success status outside the retry policy.
	#[error("Origin responded with status {status}: {body}.")]
	UnexpectedStatus {
		/// HTTP status code.
		status: u16,
		/// Truncated raw body.
		body: String,
	},
	/// The surrounding operation was cancelled.
	#[error("Operation was cancelled.")]
	Cancelled,
	/// A background task panicked or was aborted.
	#[error("Background task failed.")]
	Task(#[from] tokio::task::JoinError),
	/// Initial credential provisioning stopped short of the requested amount.
	#[error("Provisioned {minted} of {requested} credentials.")]
	Provisioning {
		/// Credentials successfully minted and admitted.
		minted: usize,
		/// Credentials requested.
		requested: usize,
		/// First failure observed while minting.
		#[source]
		source: Box<Error>,
	},
}
impl Error {
	pub(crate) fn parse(
		status: u16,
		body: &[u8],
		source: serde_path_to_error::Error<serde_json::Error>,
	) -> Self {
		Self::Parse { status, body: body_excerpt(body), source }
	}

	pub(crate) fn unexpected_status(status: u16, body: &[u8]) -> Self {
		Self::UnexpectedStatus { status, body: body_excerpt(body) }
	}

	pub(crate) fn page_count(reason: impl Into<String>) -> Self {
		Self::PageCount { reason: reason.into() }
	}

	/// Returns `true` for decode failures, which HEAD sizing requests tolerate.
	pub fn is_parse(&self) -> bool {
		matches!(self, Self::Parse { .. })
	}

	/// Returns `true` when the error stems from cancellation.
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}

/// Configuration and validation failures raised by the harvester.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] http::Error),
	/// A base URL cannot be parsed.
	#[error("Base URL `{value}` is invalid.")]
	InvalidBaseUrl {
		/// Rejected input.
		value: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Endpoint class table failed validation.
	#[error(transparent)]
	ClassTable(#[from] crate::route::ClassTableError),
	/// A class or job name is not a valid slug.
	#[error(transparent)]
	Name(#[from] crate::auth::NameError),
	/// A timestamp could not be rendered as RFC 3339.
	#[error(transparent)]
	TimestampFormat(#[from] time::error::Format),
	/// A wall-clock schedule names an invalid time of day.
	#[error(transparent)]
	InvalidTimeOfDay(#[from] time::error::ComponentRange),
	/// Token bucket configuration is unusable.
	#[error("Limiter configuration is invalid: {reason}.")]
	InvalidLimiter {
		/// Short description of the rejected value.
		reason: &'static str,
	},
	/// Required environment variable is absent.
	#[error("Environment variable `{name}` is not set.")]
	MissingEnv {
		/// Variable name.
		name: &'static str,
	},
	/// Token endpoint answered without an access token.
	#[error("Token endpoint response did not contain an access token.")]
	MissingAccessToken,
	/// The distinguished oauth class has no credential to act with.
	#[error("The oauth endpoint class has no credential.")]
	MissingOauthCredential,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO, deadline).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the origin.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The exchange did not finish within the configured deadline.
	#[error("Request did not complete within {after:?}.")]
	Timeout {
		/// Deadline that elapsed.
		after: Duration,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Lossy, bounded rendering of a response body for error messages.
pub(crate) fn body_excerpt(body: &[u8]) -> String {
	let text = String::from_utf8_lossy(body);

	match text.char_indices().nth(BODY_EXCERPT_LEN) {
		Some((cut, _)) => format!("{}...", &text[..cut]),
		None => text.into_owned(),
	}
}
