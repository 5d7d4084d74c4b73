//! Immutable, chainable descriptions of origin requests.
//!
//! An [`ApiRequest`] names a path, its query parameters and headers, and how the exchange is
//! authenticated. Paginated fetches additionally read the page size, starting page,
//! concurrency bound, and `updated_at` window. Every builder method consumes and returns the
//! request, so a base request can be cloned and specialized per page.

// crates.io
use http::Method;
use time::format_description::well_known::Rfc3339;
// self
use crate::{
	_prelude::*,
	auth::Secret,
	error::ConfigError,
	http::{HeaderSink, HttpRequest},
};

/// Items requested per page unless overridden.
pub const DEFAULT_PAGE_SIZE: u32 = 100;
/// Page workers allowed in flight unless overridden.
pub const DEFAULT_MAX_CONCURRENT: usize = 50;
/// Query key carrying the `updated_at` window.
pub const UPDATED_AT_RANGE: &str = "range[updated_at]";
/// Query key carrying the page number.
pub const PAGE_NUMBER: &str = "page[number]";
/// Query key carrying the page size.
pub const PAGE_SIZE: &str = "page[size]";

/// How an exchange is authenticated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AuthMode {
	/// Sent through the shared unauthenticated client.
	#[default]
	Anonymous,
	/// Routed to an endpoint class and sent with a pooled credential.
	Pool,
	/// Sent through the shared unauthenticated client with a caller-supplied bearer token.
	Bearer(Secret),
}

/// Description of one origin request.
#[derive(Clone, Debug)]
pub struct ApiRequest {
	method: Method,
	path: String,
	params: BTreeMap<String, String>,
	headers: BTreeMap<String, String>,
	auth: AuthMode,
	page_size: u32,
	starting_page: u32,
	max_concurrent: usize,
	updated_since: Option<OffsetDateTime>,
	updated_until: Option<OffsetDateTime>,
	header_sink: Option<HeaderSink>,
}
impl ApiRequest {
	/// Starts an anonymous `GET` for `path`.
	pub fn new(path: impl Into<String>) -> Self {
		Self {
			method: Method::GET,
			path: path.into(),
			params: BTreeMap::new(),
			headers: BTreeMap::new(),
			auth: AuthMode::Anonymous,
			page_size: DEFAULT_PAGE_SIZE,
			starting_page: 1,
			max_concurrent: DEFAULT_MAX_CONCURRENT,
			updated_since: None,
			updated_until: None,
			header_sink: None,
		}
	}

	/// Overrides the HTTP method.
	pub fn method(mut self, method: Method) -> Self {
		self.method = method;

		self
	}

	/// Routes the request through the credential pool.
	pub fn authenticated(mut self) -> Self {
		self.auth = AuthMode::Pool;

		self
	}

	/// Authenticates with an explicit bearer token instead of the pool.
	pub fn bearer(mut self, token: Secret) -> Self {
		self.auth = AuthMode::Bearer(token);

		self
	}

	/// Adds or replaces one query parameter.
	pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.params.insert(key.into(), value.into());

		self
	}

	/// Adds or replaces several query parameters.
	pub fn params<I, K, V>(mut self, params: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		self.params.extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));

		self
	}

	/// Adds or replaces one request header.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());

		self
	}

	/// Sets the page size used by paginated fetches.
	pub fn page_size(mut self, size: u32) -> Self {
		self.page_size = size;

		self
	}

	/// Starts a paginated fetch at `page`; zero keeps the current starting page.
	pub fn from_page(mut self, page: u32) -> Self {
		if page > 0 {
			self.starting_page = page;
		}

		self
	}

	/// Bounds the page workers in flight; zero means unbounded.
	pub fn max_concurrent(mut self, limit: usize) -> Self {
		self.max_concurrent = limit;

		self
	}

	/// Restricts results to records updated after `since`, up to the send time.
	pub fn updated_since(mut self, since: OffsetDateTime) -> Self {
		self.updated_since = Some(since);
		self.updated_until = None;

		self
	}

	/// Restricts results to records updated within `[since, until]`.
	pub fn updated_between(mut self, since: OffsetDateTime, until: OffsetDateTime) -> Self {
		self.updated_since = Some(since);
		self.updated_until = Some(until);

		self
	}

	/// Captures the response headers of the exchange into `sink`.
	pub fn output_headers_in(mut self, sink: HeaderSink) -> Self {
		self.header_sink = Some(sink);

		self
	}

	/// HTTP method.
	pub fn http_method(&self) -> &Method {
		&self.method
	}

	/// Origin path.
	pub fn path(&self) -> &str {
		&self.path
	}

	/// Caller-supplied query parameters.
	pub fn query_params(&self) -> &BTreeMap<String, String> {
		&self.params
	}

	/// Caller-supplied headers.
	pub fn headers(&self) -> &BTreeMap<String, String> {
		&self.headers
	}

	/// Authentication mode.
	pub fn auth(&self) -> &AuthMode {
		&self.auth
	}

	/// Items per page.
	pub fn items_per_page(&self) -> u32 {
		self.page_size
	}

	/// First page dispatched by paginated fetches.
	pub fn starting_page(&self) -> u32 {
		self.starting_page
	}

	/// Concurrency bound of paginated fetches; zero means unbounded.
	pub fn concurrency(&self) -> usize {
		self.max_concurrent
	}

	/// Lower bound of the `updated_at` window.
	pub fn since(&self) -> Option<OffsetDateTime> {
		self.updated_since
	}

	/// Header sink attached to the request.
	pub fn header_sink(&self) -> Option<&HeaderSink> {
		self.header_sink.as_ref()
	}

	/// Copy of this request fetching page `number`.
	pub(crate) fn page(&self, number: u32) -> Self {
		let page_size = self.page_size.to_string();

		self.clone().param(PAGE_NUMBER, number.to_string()).param(PAGE_SIZE, page_size)
	}

	/// Header-only sizing request sharing this request's filters, reporting into `sink`.
	pub(crate) fn sizing_head(&self, sink: HeaderSink) -> Self {
		let page_size = self.page_size.to_string();

		self.clone().method(Method::HEAD).param(PAGE_SIZE, page_size).output_headers_in(sink)
	}

	/// Query parameters as sent, where caller parameters override the `updated_at` window.
	pub fn effective_params(
		&self,
		now: OffsetDateTime,
	) -> Result<BTreeMap<String, String>, ConfigError> {
		let mut params = BTreeMap::new();

		if let Some(since) = self.updated_since {
			let until = self.updated_until.unwrap_or(now);

			params.insert(
				UPDATED_AT_RANGE.to_owned(),
				format!("{},{}", since.format(&Rfc3339)?, until.format(&Rfc3339)?),
			);
		}

		params.extend(self.params.iter().map(|(k, v)| (k.clone(), v.clone())));

		Ok(params)
	}

	/// Renders the buffered HTTP request against `base`.
	pub(crate) fn to_http(
		&self,
		base: &Url,
		bearer: Option<&Secret>,
		now: OffsetDateTime,
	) -> Result<HttpRequest, ConfigError> {
		let raw = format!("{}{}", base.as_str().trim_end_matches('/'), self.path);
		let mut url = Url::parse(&raw)
			.map_err(|source| ConfigError::InvalidBaseUrl { value: raw.clone(), source })?;
		let params = self.effective_params(now)?;

		if !params.is_empty() {
			url.query_pairs_mut().extend_pairs(params.iter());
		}

		let mut builder = http::Request::builder().method(self.method.clone()).uri(url.as_str());

		for (name, value) in &self.headers {
			builder = builder.header(name.as_str(), value.as_str());
		}
		if let Some(token) = bearer {
			builder = builder.header(http::header::AUTHORIZATION, token.bearer());
		}

		Ok(builder.body(Vec::new())?)
	}
}
