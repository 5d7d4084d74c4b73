//! Observability helpers for origin exchanges.
//!
//! # Feature Flags
//!
//! - Spans named `intra_harvester.fetch` carry the `kind` (request family) and `stage` (call
//!   site) fields.
//! - Enable `metrics` to increment the `intra_harvester_request_total` counter for every
//!   attempt/success/failure/retry/rotation, labeled by `kind` + `outcome`.
//! - Set `httpdebug` to dump selected exchanges to standard error (see [`DebugTap`]).

mod counter;
mod debug;
mod span;

pub use counter::*;
pub use debug::*;
pub use span::*;

// self
use crate::_prelude::*;

/// Families of origin requests observed by the harvester.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
	/// Single API call through the executor.
	Api,
	/// Page sizing request or page fetch.
	Page,
	/// Token grant against `/oauth/token`.
	Token,
	/// Application portal scraping.
	Portal,
}
impl RequestKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			RequestKind::Api => "api",
			RequestKind::Page => "page",
			RequestKind::Token => "token",
			RequestKind::Portal => "portal",
		}
	}
}
impl Display for RequestKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestOutcome {
	/// Entry to an executor helper.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
	/// Delayed retry after a throttling or authorization response.
	Retry,
	/// Credential rotation triggered by repeated rejections.
	Rotation,
}
impl RequestOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			RequestOutcome::Attempt => "attempt",
			RequestOutcome::Success => "success",
			RequestOutcome::Failure => "failure",
			RequestOutcome::Retry => "retry",
			RequestOutcome::Rotation => "rotation",
		}
	}
}
impl Display for RequestOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
