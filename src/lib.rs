//! Credential-pooled, rate-limited harvesting for the 42 intra API: token buckets per
//! credential, class-partitioned pools, paginated fan-out, and self-healing credential
//! rotation, driven by an incremental job scheduler.

#![deny(clippy::all, missing_docs)]
#![cfg_attr(not(test), deny(unused_crate_dependencies))]

pub mod auth;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod lifecycle;
pub mod limit;
pub mod obs;
pub mod paginate;
pub mod pool;
pub mod request;
pub mod route;
pub mod schedule;
pub mod stats;
pub mod store;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for tests; enabled via `cfg(test)` or the `test`
	//! crate feature.

	pub use crate::_prelude::*;

	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// crates.io
	use ::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
	// self
	use crate::{
		auth::{ClassId, Credential, Identity, Secret},
		executor::{Executor, ExecutorBuilder},
		http::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportFuture},
		limit::{LimiterConfig, RateLimits},
		route::ClassTable,
	};

	/// Origin used by scripted requests.
	pub const TEST_ORIGIN: &str = "https://api.intra.42.fr";

	/// Canned response of a [`ScriptedTransport`].
	#[derive(Clone, Debug)]
	pub struct ScriptedReply {
		/// HTTP status.
		pub status: u16,
		/// Response headers.
		pub headers: Vec<(String, String)>,
		/// Raw body.
		pub body: Vec<u8>,
		/// Time spent before answering.
		pub delay: Duration,
	}
	impl ScriptedReply {
		/// JSON response with `status`.
		pub fn json(status: u16, body: impl Into<String>) -> Self {
			Self {
				status,
				headers: vec![("content-type".into(), "application/json".into())],
				body: body.into().into_bytes(),
				delay: Duration::ZERO,
			}
		}

		/// Body-less response with `status`.
		pub fn empty(status: u16) -> Self {
			Self { status, headers: Vec::new(), body: Vec::new(), delay: Duration::ZERO }
		}

		/// Adds a response header.
		pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
			self.headers.push((name.into(), value.into()));

			self
		}

		/// Delays the answer by `delay`.
		pub fn delayed(mut self, delay: Duration) -> Self {
			self.delay = delay;

			self
		}

		fn into_response(self) -> HttpResponse {
			let mut response = HttpResponse::new(self.body);

			*response.status_mut() =
				StatusCode::from_u16(self.status).expect("Scripted status should be valid.");

			for (name, value) in self.headers {
				response.headers_mut().append(
					HeaderName::try_from(name).expect("Scripted header name should be valid."),
					HeaderValue::try_from(value).expect("Scripted header value should be valid."),
				);
			}

			response
		}
	}

	/// Request observed by a [`ScriptedTransport`].
	#[derive(Clone, Debug)]
	pub struct RecordedRequest {
		/// Zero-based arrival order across all paths.
		pub sequence: usize,
		/// HTTP method.
		pub method: Method,
		/// URL path.
		pub path: String,
		/// Decoded query parameters.
		pub query: BTreeMap<String, String>,
		/// Request headers.
		pub headers: HeaderMap,
	}
	impl RecordedRequest {
		fn from_http(sequence: usize, request: &HttpRequest) -> Self {
			let uri = request.uri();
			let query = url::form_urlencoded::parse(uri.query().unwrap_or_default().as_bytes())
				.into_owned()
				.collect();

			Self {
				sequence,
				method: request.method().clone(),
				path: uri.path().to_owned(),
				query,
				headers: request.headers().clone(),
			}
		}

		/// Single header value as a string.
		pub fn header(&self, name: &str) -> Option<String> {
			self.headers.get(name).and_then(|value| value.to_str().ok()).map(ToOwned::to_owned)
		}
	}

	type Script = Box<dyn Fn(&RecordedRequest) -> ScriptedReply + Send + Sync>;

	/// In-process [`HttpTransport`] that records requests and answers from a script.
	pub struct ScriptedTransport {
		script: Script,
		requests: Mutex<Vec<RecordedRequest>>,
		in_flight: AtomicUsize,
		peak_in_flight: AtomicUsize,
	}
	impl ScriptedTransport {
		/// Transport answering every request with `script`.
		pub fn new<F>(script: F) -> Arc<Self>
		where
			F: 'static + Send + Sync + Fn(&RecordedRequest) -> ScriptedReply,
		{
			Arc::new(Self {
				script: Box::new(script),
				requests: Mutex::new(Vec::new()),
				in_flight: AtomicUsize::new(0),
				peak_in_flight: AtomicUsize::new(0),
			})
		}

		/// Transport answering every request with `200` and `body`.
		pub fn ok_json(body: impl Into<String>) -> Arc<Self> {
			let body = body.into();

			Self::new(move |_| ScriptedReply::json(200, body.clone()))
		}

		/// Requests received so far.
		pub fn request_count(&self) -> usize {
			self.requests.lock().len()
		}

		/// Copies of the requests received so far, in arrival order.
		pub fn requests(&self) -> Vec<RecordedRequest> {
			self.requests.lock().clone()
		}

		/// Highest number of requests answered concurrently.
		pub fn peak_in_flight(&self) -> usize {
			self.peak_in_flight.load(Ordering::SeqCst)
		}
	}
	impl HttpTransport for ScriptedTransport {
		fn call(&self, request: HttpRequest) -> TransportFuture<'_> {
			let recorded = {
				let mut requests = self.requests.lock();
				let recorded = RecordedRequest::from_http(requests.len(), &request);

				requests.push(recorded.clone());

				recorded
			};
			let reply = (self.script)(&recorded);

			Box::pin(async move {
				let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;

				self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

				if !reply.delay.is_zero() {
					tokio::time::sleep(reply.delay).await;
				}

				self.in_flight.fetch_sub(1, Ordering::SeqCst);

				Ok(reply.into_response())
			})
		}
	}
	impl Debug for ScriptedTransport {
		fn fmt(&self, f: &mut Formatter) -> FmtResult {
			f.debug_struct("ScriptedTransport").field("requests", &self.request_count()).finish()
		}
	}

	/// Plain `GET` against [`TEST_ORIGIN`].
	pub fn get_request(path: &str) -> HttpRequest {
		::http::Request::builder()
			.uri(format!("{TEST_ORIGIN}{path}"))
			.body(Vec::new())
			.expect("Test request should build.")
	}

	/// Validated class identifier.
	pub fn class_id(id: &str) -> ClassId {
		ClassId::new(id).expect("Class fixture should be valid.")
	}

	/// Credential fixture whose fields derive from `id`.
	pub fn test_credential(id: u64) -> Credential {
		Credential {
			id,
			app_id: id,
			name: format!("app-{id}"),
			uid: format!("uid-{id}"),
			secret: Secret::new(format!("secret-{id}")),
			redirect_uri: "http://localhost:8080".into(),
			created_at: OffsetDateTime::UNIX_EPOCH,
		}
	}

	/// [`test_credential`] paired with the access token `token-<id>`.
	pub fn test_identity(id: u64) -> Identity {
		Identity::new(test_credential(id), Secret::new(format!("token-{id}")))
	}

	/// Token buckets loose enough to never delay a test.
	pub fn fast_limits() -> RateLimits {
		let loose = LimiterConfig::new(Duration::from_millis(1), 10_000);

		RateLimits { per_second: loose, per_hour: loose }
	}

	/// Executor builder over the intra class table with fast limits and short delays.
	pub fn test_executor_builder(transport: Arc<dyn HttpTransport>) -> ExecutorBuilder {
		let table = ClassTable::intra().expect("Built-in class table should validate.");

		Executor::builder(transport, table)
			.limits(fast_limits())
			.timeout(Duration::from_secs(5))
			.retry_delay(Duration::from_millis(10))
			.acquire_backoff(Duration::from_millis(2))
	}

	/// Built executor whose pool holds `(class, credential id)` pairs.
	pub fn test_executor(transport: Arc<dyn HttpTransport>, pooled: &[(&str, u64)]) -> Arc<Executor> {
		let executor = test_executor_builder(transport).build().expect("Test executor should build.");

		for (class, id) in pooled {
			executor
				.admit_to(class_id(class), test_identity(*id))
				.expect("Pooled fixture should be admitted.");
		}

		Arc::new(executor)
	}

	/// Reqwest transport for tests against `httpmock`.
	pub fn test_reqwest_transport() -> Arc<ReqwestTransport> {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		Arc::new(ReqwestTransport::with_client(client))
	}
}

mod _prelude {
	pub use std::{
		collections::BTreeMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
		time::Duration,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::OffsetDateTime;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use tokio_util::sync::CancellationToken;
pub use url;
#[cfg(not(feature = "reqwest"))] use rand as _;
