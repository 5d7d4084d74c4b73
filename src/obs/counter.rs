// self
use crate::obs::{RequestKind, RequestOutcome};

/// Records a request outcome via the global metrics recorder (when enabled).
pub fn record_request_outcome(kind: RequestKind, outcome: RequestOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"intra_harvester_request_total",
			"kind" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}
