//! Operator-selected wire dumps of origin exchanges.

// std
use std::io::Write;
// crates.io
use http::{HeaderMap, header::AUTHORIZATION};
// self
use crate::{
	_prelude::*,
	http::{HttpRequest, HttpResponse},
};

/// Environment variable selecting the dumped paths: `*` or comma-separated prefixes.
pub const DEBUG_ENV: &str = "httpdebug";

/// Selection of request paths whose exchanges are dumped to standard error.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DebugTap {
	/// Nothing is dumped.
	#[default]
	Off,
	/// Every exchange is dumped.
	All,
	/// Exchanges whose path starts with one of the prefixes are dumped.
	Prefixes(Vec<String>),
}
impl DebugTap {
	/// Parses `*`, a comma-separated prefix list, or an empty value.
	pub fn parse(raw: &str) -> Self {
		match raw.trim() {
			"" => Self::Off,
			"*" => Self::All,
			list => {
				let prefixes: Vec<String> = list
					.split(',')
					.map(str::trim)
					.filter(|prefix| !prefix.is_empty())
					.map(ToOwned::to_owned)
					.collect();

				if prefixes.is_empty() { Self::Off } else { Self::Prefixes(prefixes) }
			},
		}
	}

	/// Returns `true` when exchanges on `path` are dumped.
	pub fn selects(&self, path: &str) -> bool {
		match self {
			Self::Off => false,
			Self::All => true,
			Self::Prefixes(prefixes) => prefixes.iter().any(|prefix| path.starts_with(prefix)),
		}
	}

	/// Dumps the request when its path is selected.
	pub fn request(&self, request: &HttpRequest) {
		if self.selects(request.uri().path()) {
			emit(&render_request(request));
		}
	}

	/// Dumps the response to a request on `path` when selected.
	pub fn response(&self, path: &str, response: &HttpResponse) {
		if self.selects(path) {
			emit(&render_response(response));
		}
	}
}

/// HTTP/1-style wire rendering of a request, with the bearer token redacted.
pub fn render_request(request: &HttpRequest) -> String {
	let target = request.uri().path_and_query().map_or("/", |target| target.as_str());
	let host = request.uri().host().unwrap_or_default();
	let mut out = format!("{} {target} {:?}\r\nHost: {host}\r\n", request.method(), request.version());

	render_headers(&mut out, request.headers());
	out.push_str("\r\n");
	out.push_str(&String::from_utf8_lossy(request.body()));

	out
}

/// HTTP/1-style wire rendering of a response.
pub fn render_response(response: &HttpResponse) -> String {
	let mut out = format!("{:?} {}\r\n", response.version(), response.status());

	render_headers(&mut out, response.headers());
	out.push_str("\r\n");
	out.push_str(&String::from_utf8_lossy(response.body()));

	out
}

fn render_headers(out: &mut String, headers: &HeaderMap) {
	for (name, value) in headers {
		let value = if name == AUTHORIZATION {
			"<redacted>".into()
		} else {
			String::from_utf8_lossy(value.as_bytes()).into_owned()
		};

		out.push_str(&format!("{name}: {value}\r\n"));
	}
}

fn emit(dump: &str) {
	let mut stderr = std::io::stderr().lock();

	let _ = write!(stderr, "\n\n{dump}\n\n");
}

#[cfg(test)]
mod tests {
	// crates.io
	use http::{HeaderValue, Method, StatusCode};
	// self
	use super::*;

	#[test]
	fn parse_handles_wildcard_lists_and_blank() {
		assert_eq!(DebugTap::parse(""), DebugTap::Off);
		assert_eq!(DebugTap::parse(" , "), DebugTap::Off);
		assert_eq!(DebugTap::parse("*"), DebugTap::All);
		assert_eq!(
			DebugTap::parse("/v2/users, /oauth"),
			DebugTap::Prefixes(vec!["/v2/users".into(), "/oauth".into()])
		);
	}

	#[test]
	fn selects_by_prefix() {
		let tap = DebugTap::parse("/v2/cursus_users,/oauth");

		assert!(tap.selects("/v2/cursus_users"));
		assert!(tap.selects("/oauth/token"));
		assert!(!tap.selects("/v2/campus"));
		assert!(DebugTap::All.selects("/anything"));
		assert!(!DebugTap::Off.selects("/anything"));
	}

	#[test]
	fn request_rendering_redacts_authorization() {
		let mut request = HttpRequest::new(b"{}".to_vec());

		*request.method_mut() = Method::POST;
		*request.uri_mut() = "https://api.intra.42.fr/oauth/token?grant_type=client_credentials"
			.parse()
			.expect("Fixture URI should parse.");
		request.headers_mut().insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));

		let dump = render_request(&request);

		assert!(dump.starts_with("POST /oauth/token?grant_type=client_credentials HTTP/1.1\r\n"));
		assert!(dump.contains("Host: api.intra.42.fr\r\n"));
		assert!(dump.contains("authorization: <redacted>\r\n"));
		assert!(!dump.contains("abc"));
		assert!(dump.ends_with("\r\n\r\n{}"));
	}

	#[test]
	fn response_rendering_includes_status_and_body() {
		let mut response = HttpResponse::new(b"[]".to_vec());

		*response.status_mut() = StatusCode::NOT_FOUND;

		let dump = render_response(&response);

		assert!(dump.starts_with("HTTP/1.1 404 Not Found\r\n"));
		assert!(dump.ends_with("[]"));
	}
}
