// crates.io
use tracing::{Instrument, instrument::Instrumented};
// self
use crate::{_prelude::*, obs::RequestKind};

/// A span builder used around origin exchanges.
#[derive(Clone, Debug)]
pub struct FetchSpan {
	span: tracing::Span,
}
impl FetchSpan {
	/// Creates a new span tagged with the provided request kind, stage, and path.
	pub fn new(kind: RequestKind, stage: &'static str, path: &str) -> Self {
		Self { span: tracing::info_span!("intra_harvester.fetch", kind = kind.as_str(), stage, path) }
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> Instrumented<Fut>
	where
		Fut: Future,
	{
		fut.instrument(self.span.clone())
	}
}
