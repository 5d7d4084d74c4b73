//! Transport primitives for origin exchanges.
//!
//! The module exposes [`HttpTransport`] alongside [`HeaderSink`] so callers can swap the
//! HTTP stack (a scripted transport in tests, reqwest in production) without touching the
//! rate-limiting or pagination layers. Every exchange is fully buffered: requests and
//! responses carry `Vec<u8>` bodies, which keeps retries and debug dumps trivial.

// crates.io
use http::HeaderMap;
// self
use crate::{_prelude::*, error::TransportError};

/// Fully buffered request handed to an [`HttpTransport`].
pub type HttpRequest = http::Request<Vec<u8>>;
/// Fully buffered response returned by an [`HttpTransport`].
pub type HttpResponse = http::Response<Vec<u8>>;

/// Boxed future returned by [`HttpTransport::call`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP stacks capable of executing one buffered exchange.
///
/// Implementations must be `Send + Sync + 'static` so a single transport can be shared by
/// every rate-limited client in the pool. Non-success statuses are not errors at this layer;
/// only failures to obtain a response are reported as [`TransportError`].
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Performs the exchange.
	fn call(&self, request: HttpRequest) -> TransportFuture<'_>;
}

/// Thread-safe slot that receives the response headers of the exchange it is attached to.
///
/// The executor stores headers before decoding the body, so callers can read paging
/// headers even when the body is empty or malformed.
#[derive(Clone, Debug, Default)]
pub struct HeaderSink(Arc<Mutex<Option<HeaderMap>>>);
impl HeaderSink {
	/// Stores the headers of the latest response, replacing earlier ones.
	pub fn store(&self, headers: HeaderMap) {
		*self.0.lock() = Some(headers);
	}

	/// Returns the captured headers, if any, consuming them from the slot.
	pub fn take(&self) -> Option<HeaderMap> {
		self.0.lock().take()
	}

	/// Returns a single captured header value as a string.
	pub fn header(&self, name: &str) -> Option<String> {
		self.0
			.lock()
			.as_ref()
			.and_then(|headers| headers.get(name))
			.and_then(|value| value.to_str().ok())
			.map(ToOwned::to_owned)
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn call(&self, request: HttpRequest) -> TransportFuture<'_> {
		let client = self.0.clone();

		Box::pin(async move {
			let request = reqwest::Request::try_from(request)?;
			let response = client.execute(request).await?;
			let status = response.status();
			let version = response.version();
			let headers = response.headers().to_owned();
			let mut converted = HttpResponse::new(response.bytes().await?.to_vec());

			*converted.status_mut() = status;
			*converted.version_mut() = version;
			*converted.headers_mut() = headers;

			Ok(converted)
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use http::HeaderValue;
	// self
	use super::*;

	#[test]
	fn header_sink_reads_and_takes() {
		let sink = HeaderSink::default();
		let mut headers = HeaderMap::new();

		headers.insert("x-total", HeaderValue::from_static("250"));
		sink.store(headers);

		assert_eq!(sink.header("X-Total").as_deref(), Some("250"));
		assert!(sink.header("x-per-page").is_none());
		assert!(sink.take().is_some());
		assert!(sink.take().is_none());
	}

	#[test]
	fn header_sink_clones_share_state() {
		let sink = HeaderSink::default();
		let clone = sink.clone();
		let mut headers = HeaderMap::new();

		headers.insert("x-per-page", HeaderValue::from_static("100"));
		clone.store(headers);

		assert_eq!(sink.header("x-per-page").as_deref(), Some("100"));
	}
}
