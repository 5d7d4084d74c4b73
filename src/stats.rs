//! Planned and completed request counters shared by paginated fetches.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::_prelude::*;

/// Thread-safe counters for page requests.
#[derive(Debug, Default)]
pub struct FetchStats {
	planned: AtomicU64,
	completed: AtomicU64,
}
impl FetchStats {
	/// Returns the number of page requests planned so far.
	pub fn planned(&self) -> u64 {
		self.planned.load(Ordering::Acquire)
	}

	/// Returns the number of page requests that finished, successfully or not.
	pub fn completed(&self) -> u64 {
		self.completed.load(Ordering::Acquire)
	}

	/// Reads both counters as one snapshot where `completed <= planned` holds.
	pub fn snapshot(&self) -> StatsSnapshot {
		// Completions are always preceded by the matching plan growth, so reading
		// `completed` first keeps the pair ordered.
		let completed = self.completed();
		let planned = self.planned();

		StatsSnapshot { planned, completed }
	}

	/// Completion percentage of the current snapshot.
	pub fn percent(&self) -> u64 {
		self.snapshot().percent()
	}

	pub(crate) fn grow_planned(&self, pages: u64) {
		self.planned.fetch_add(pages, Ordering::AcqRel);
	}

	pub(crate) fn record_completed(&self) {
		self.completed.fetch_add(1, Ordering::AcqRel);
	}
}
impl Display for FetchStats {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		Display::fmt(&self.snapshot(), f)
	}
}

/// Point-in-time copy of [`FetchStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
	/// Page requests planned.
	pub planned: u64,
	/// Page requests completed.
	pub completed: u64,
}
impl StatsSnapshot {
	/// `100 * completed / planned`, or zero before anything was planned.
	pub fn percent(&self) -> u64 {
		if self.planned == 0 { 0 } else { self.completed.saturating_mul(100) / self.planned }
	}
}
impl Display for StatsSnapshot {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}/{} requests", self.completed, self.planned)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn percent_is_zero_before_planning() {
		let stats = FetchStats::default();

		assert_eq!(stats.percent(), 0);
		assert_eq!(stats.to_string(), "0/0 requests");
	}

	#[test]
	fn snapshot_tracks_progress() {
		let stats = FetchStats::default();

		stats.grow_planned(3);
		stats.record_completed();

		let snapshot = stats.snapshot();

		assert_eq!(snapshot, StatsSnapshot { planned: 3, completed: 1 });
		assert_eq!(snapshot.percent(), 33);
		assert_eq!(snapshot.to_string(), "1/3 requests");
	}

	#[test]
	fn snapshot_serializes_with_camel_case_fields() {
		let payload = serde_json::to_string(&StatsSnapshot { planned: 2, completed: 2 })
			.expect("Snapshot should serialize to JSON.");

		assert_eq!(payload, "{\"planned\":2,\"completed\":2}");
	}
}
