//! Periodic, incremental harvesting jobs.
//!
//! A [`Scheduler`] owns a set of named jobs, each with a [`Cadence`]. Enabled jobs run once at
//! start and then on every tick until the cancellation token fires. Failures are forwarded to
//! the error channel returned by [`Scheduler::new`]; the next tick is the retry.

// std
use std::{
	collections::HashSet,
	sync::atomic::{AtomicBool, Ordering},
	time::Instant,
};
// crates.io
use serde_json::Value;
use time::Time;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	auth::JobName,
	error::ConfigError,
	executor::Executor,
	paginate::PageEvent,
	request::{ApiRequest, DEFAULT_MAX_CONCURRENT, DEFAULT_PAGE_SIZE},
	store::{HarvestStore, StoreError},
};

/// Environment variable listing disabled jobs: `*` or comma-separated names.
pub const DISABLED_JOBS_ENV: &str = "disabledjobs";

/// When a job fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cadence {
	/// Fixed interval between ticks.
	Every(Duration),
	/// Once a day at a UTC wall-clock time.
	DailyAt(Time),
}
impl Cadence {
	/// Daily cadence at `hour:minute:second` UTC.
	pub fn daily_at(hour: u8, minute: u8, second: u8) -> Result<Self, ConfigError> {
		Ok(Self::DailyAt(Time::from_hms(hour, minute, second)?))
	}

	/// Delay from `now` until the next tick.
	pub fn next_delay(&self, now: OffsetDateTime) -> Duration {
		match *self {
			Self::Every(interval) => interval,
			Self::DailyAt(at) => {
				let today = now.replace_time(at);
				let next = if today > now { today } else { today + time::Duration::DAY };

				Duration::try_from(next - now).unwrap_or(Duration::ZERO)
			},
		}
	}
}

/// What happens when a tick fires while the previous run is still going.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverlapPolicy {
	/// Runs overlap.
	#[default]
	Allow,
	/// The tick is dropped.
	Skip,
}

/// Name, cadence, and run policy of one job.
#[derive(Clone, Debug)]
pub struct JobSpec {
	name: JobName,
	cadence: Cadence,
	run_on_start: bool,
	overlap: OverlapPolicy,
}
impl JobSpec {
	/// Job that runs at start and then on every tick of `cadence`.
	pub fn new(name: impl AsRef<str>, cadence: Cadence) -> Result<Self, ConfigError> {
		Ok(Self {
			name: JobName::new(name)?,
			cadence,
			run_on_start: true,
			overlap: OverlapPolicy::Allow,
		})
	}

	/// Drops ticks that fire while the previous run is still going.
	pub fn skip_overlapping(mut self) -> Self {
		self.overlap = OverlapPolicy::Skip;

		self
	}

	/// Waits for the first tick instead of running at start.
	pub fn without_initial_run(mut self) -> Self {
		self.run_on_start = false;

		self
	}

	/// Job name.
	pub fn name(&self) -> &JobName {
		&self.name
	}

	/// Job cadence.
	pub fn cadence(&self) -> Cadence {
		self.cadence
	}
}

/// Jobs suppressed at startup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DisabledJobs {
	/// Every job runs.
	#[default]
	None,
	/// No job runs.
	All,
	/// The named jobs do not run.
	Named(HashSet<String>),
}
impl DisabledJobs {
	/// Parses `*`, a comma-separated list, or an empty value. Names are matched
	/// case-insensitively, since job names are lowercase slugs.
	pub fn parse(raw: &str) -> Self {
		match raw.trim() {
			"" => Self::None,
			"*" => Self::All,
			list => Self::Named(
				list.split(',')
					.map(str::trim)
					.filter(|name| !name.is_empty())
					.map(str::to_ascii_lowercase)
					.collect(),
			),
		}
	}

	/// Returns `true` when `name` must not run.
	pub fn is_disabled(&self, name: &str) -> bool {
		match self {
			Self::None => false,
			Self::All => true,
			Self::Named(names) => names.contains(name),
		}
	}
}

/// Operational error raised by a job run.
#[derive(Debug)]
pub struct JobError {
	/// Job that failed.
	pub job: JobName,
	/// Failure.
	pub error: Error,
}
impl Display for JobError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}: {}", self.job, self.error)
	}
}

/// Everything a job run may use.
#[derive(Clone)]
pub struct JobContext {
	job: JobName,
	tick: u64,
	executor: Arc<Executor>,
	store: Arc<dyn HarvestStore>,
	cancel: CancellationToken,
	errors: mpsc::UnboundedSender<JobError>,
}
impl JobContext {
	/// Builds a context outside a scheduler, e.g. to run a job by hand.
	pub fn new(
		job: JobName,
		executor: Arc<Executor>,
		store: Arc<dyn HarvestStore>,
		cancel: CancellationToken,
		errors: mpsc::UnboundedSender<JobError>,
	) -> Self {
		Self { job, tick: 0, executor, store, cancel, errors }
	}

	/// Same context for run number `tick`.
	pub fn with_tick(mut self, tick: u64) -> Self {
		self.tick = tick;

		self
	}

	/// Name of the running job.
	pub fn job(&self) -> &JobName {
		&self.job
	}

	/// Zero-based run counter; zero is the first run since start.
	pub fn tick(&self) -> u64 {
		self.tick
	}

	/// Shared executor.
	pub fn executor(&self) -> &Arc<Executor> {
		&self.executor
	}

	/// Shared store.
	pub fn store(&self) -> &Arc<dyn HarvestStore> {
		&self.store
	}

	/// Scheduler-wide cancellation.
	pub fn cancel(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Forwards a non-fatal error to the error channel.
	pub fn report(&self, error: Error) {
		tracing::warn!(job = %self.job, error = %error, "job error");

		let _ = self.errors.send(JobError { job: self.job.clone(), error });
	}
}
impl Debug for JobContext {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("JobContext").field("job", &self.job).field("tick", &self.tick).finish()
	}
}

/// Boxed future returned by [`Job::run`].
pub type JobFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + 'a + Send>>;

/// Unit of scheduled work.
pub trait Job
where
	Self: Send + Sync,
{
	/// Performs one run.
	fn run<'a>(&'a self, ctx: &'a JobContext) -> JobFuture<'a>;
}

/// [`Job`] backed by a closure receiving an owned [`JobContext`].
pub struct FnJob<F>(pub F);
impl<F, Fut> Job for FnJob<F>
where
	F: Send + Sync + Fn(JobContext) -> Fut,
	Fut: 'static + Send + Future<Output = Result<()>>,
{
	fn run<'a>(&'a self, ctx: &'a JobContext) -> JobFuture<'a> {
		Box::pin((self.0)(ctx.clone()))
	}
}

/// Fetches one listing endpoint and upserts each element into a store collection.
#[derive(Clone, Debug)]
pub struct ListingJob {
	path: String,
	collection: String,
	params: BTreeMap<String, String>,
	page_size: u32,
	max_concurrent: usize,
	incremental_since: Option<OffsetDateTime>,
	wipe_on_first_run: bool,
	id_field: String,
}
impl ListingJob {
	/// Lists `path` into `collection`.
	pub fn new(path: impl Into<String>, collection: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			collection: collection.into(),
			params: BTreeMap::new(),
			page_size: DEFAULT_PAGE_SIZE,
			max_concurrent: DEFAULT_MAX_CONCURRENT,
			incremental_since: None,
			wipe_on_first_run: false,
			id_field: "id".into(),
		}
	}

	/// Adds a fixed query parameter.
	pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.params.insert(key.into(), value.into());

		self
	}

	/// Overrides the page size.
	pub fn page_size(mut self, size: u32) -> Self {
		self.page_size = size;

		self
	}

	/// Overrides the page workers in flight; zero means unbounded.
	pub fn max_concurrent(mut self, limit: usize) -> Self {
		self.max_concurrent = limit;

		self
	}

	/// Only fetches records updated since the last run, starting from `default_since`.
	pub fn incremental(mut self, default_since: OffsetDateTime) -> Self {
		self.incremental_since = Some(default_since);

		self
	}

	/// Clears the collection before the first run after start.
	pub fn wipe_on_first_run(mut self) -> Self {
		self.wipe_on_first_run = true;

		self
	}

	/// Overrides the field used as the record key.
	pub fn id_field(mut self, field: impl Into<String>) -> Self {
		self.id_field = field.into();

		self
	}

	/// Marker key: the final segment of the listing path.
	pub fn marker_key(&self) -> &str {
		self.path.trim_end_matches('/').rsplit('/').next().unwrap_or(&self.path)
	}

	fn record_id(&self, record: &Value) -> Result<String, StoreError> {
		match record.get(&self.id_field) {
			Some(Value::String(id)) => Ok(id.clone()),
			Some(Value::Number(id)) => Ok(id.to_string()),
			_ => Err(StoreError::Serialization {
				message: format!(
					"Record of `{}` has no usable `{}` field",
					self.collection, self.id_field
				),
			}),
		}
	}

	async fn flush(&self, ctx: &JobContext, batch: &mut Vec<(String, Value)>) -> usize {
		if batch.is_empty() {
			return 0;
		}

		match ctx.store().upsert_many(&self.collection, std::mem::take(batch)).await {
			Ok(stored) => stored,
			Err(e) => {
				ctx.report(e.into());

				0
			},
		}
	}

	async fn run_once(&self, ctx: &JobContext) -> Result<()> {
		let store = ctx.store();

		if self.wipe_on_first_run && ctx.tick() == 0 {
			let removed = store.clear_collection(&self.collection).await?;

			tracing::debug!(collection = %self.collection, removed, "collection wiped");
		}

		let mut request = ApiRequest::new(&self.path)
			.authenticated()
			.params(self.params.clone())
			.page_size(self.page_size)
			.max_concurrent(self.max_concurrent);

		if let Some(default_since) = self.incremental_since {
			let key = self.marker_key();
			let since = store.marker(key).await?.unwrap_or(default_since);
			let now = OffsetDateTime::now_utc();

			store.set_marker(key, now).await?;

			request = request.updated_between(since, now);
		}

		let mut stream = ctx.executor().fetch_paginated::<Value>(request, ctx.cancel().clone()).await?;
		let batch_size = self.page_size.max(1) as usize;
		let mut batch = Vec::with_capacity(batch_size);
		let mut upserted = 0;

		loop {
			match stream.recv().await {
				PageEvent::Item { value, .. } => match self.record_id(&value) {
					Ok(id) => {
						batch.push((id, value));

						if batch.len() >= batch_size {
							upserted += self.flush(ctx, &mut batch).await;
						}
					},
					Err(e) => ctx.report(e.into()),
				},
				PageEvent::Failed(e) => ctx.report(e),
				PageEvent::Done => break,
			}
		}

		upserted += self.flush(ctx, &mut batch).await;

		tracing::info!(collection = %self.collection, upserted, "listing harvested");

		Ok(())
	}
}
impl Job for ListingJob {
	fn run<'a>(&'a self, ctx: &'a JobContext) -> JobFuture<'a> {
		Box::pin(self.run_once(ctx))
	}
}

struct ScheduledJob {
	spec: JobSpec,
	job: Arc<dyn Job>,
}

/// Drives named jobs on their cadences.
pub struct Scheduler {
	executor: Arc<Executor>,
	store: Arc<dyn HarvestStore>,
	disabled: DisabledJobs,
	jobs: Vec<ScheduledJob>,
	errors: mpsc::UnboundedSender<JobError>,
}
impl Scheduler {
	/// Creates an empty scheduler and the receiving end of its error channel.
	pub fn new(
		executor: Arc<Executor>,
		store: Arc<dyn HarvestStore>,
	) -> (Self, mpsc::UnboundedReceiver<JobError>) {
		let (errors, rx) = mpsc::unbounded_channel();

		(Self { executor, store, disabled: DisabledJobs::None, jobs: Vec::new(), errors }, rx)
	}

	/// Suppresses the selected jobs.
	pub fn disabled(mut self, disabled: DisabledJobs) -> Self {
		self.disabled = disabled;

		self
	}

	/// Registers a job.
	pub fn job(mut self, spec: JobSpec, job: impl 'static + Job) -> Self {
		self.jobs.push(ScheduledJob { spec, job: Arc::new(job) });

		self
	}

	/// Spawns one driver per enabled job.
	pub fn start(self, cancel: CancellationToken) -> SchedulerHandle {
		let mut drivers = JoinSet::new();
		let mut enabled = Vec::new();

		for ScheduledJob { spec, job } in self.jobs {
			if self.disabled.is_disabled(spec.name()) {
				tracing::info!(job = %spec.name(), "job disabled");

				continue;
			}

			let ctx = JobContext::new(
				spec.name().clone(),
				self.executor.clone(),
				self.store.clone(),
				cancel.clone(),
				self.errors.clone(),
			);

			enabled.push(spec.name().clone());
			drivers.spawn(drive(spec, job, ctx));
		}

		tracing::info!(jobs = enabled.len(), "scheduler started");

		SchedulerHandle { enabled, drivers }
	}
}
impl Debug for Scheduler {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Scheduler")
			.field("jobs", &self.jobs.iter().map(|job| job.spec.name()).collect::<Vec<_>>())
			.field("disabled", &self.disabled)
			.finish()
	}
}

/// Running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
	enabled: Vec<JobName>,
	drivers: JoinSet<()>,
}
impl SchedulerHandle {
	/// Jobs that were started.
	pub fn enabled_jobs(&self) -> &[JobName] {
		&self.enabled
	}

	/// Waits until every driver stopped, which happens after cancellation once in-flight runs
	/// finished.
	pub async fn join(mut self) {
		while self.drivers.join_next().await.is_some() {}
	}
}

async fn drive(spec: JobSpec, job: Arc<dyn Job>, ctx: JobContext) {
	let running = Arc::new(AtomicBool::new(false));
	let mut runs = JoinSet::new();
	let mut tick = 0;

	if spec.run_on_start {
		launch(&spec, &job, &ctx, tick, &running, &mut runs);

		tick += 1;
	}

	loop {
		let delay = spec.cadence.next_delay(OffsetDateTime::now_utc());

		tokio::select! {
			biased;
			_ = ctx.cancel().cancelled() => break,
			_ = tokio::time::sleep(delay) => {},
		}

		while runs.try_join_next().is_some() {}

		launch(&spec, &job, &ctx, tick, &running, &mut runs);

		tick += 1;
	}

	while runs.join_next().await.is_some() {}

	tracing::debug!(job = %spec.name(), "job driver stopped");
}

fn launch(
	spec: &JobSpec,
	job: &Arc<dyn Job>,
	ctx: &JobContext,
	tick: u64,
	running: &Arc<AtomicBool>,
	runs: &mut JoinSet<()>,
) {
	let skip = spec.overlap == OverlapPolicy::Skip;

	if skip && running.swap(true, Ordering::AcqRel) {
		tracing::debug!(job = %spec.name(), tick, "previous run still in progress, skipping tick");

		return;
	}

	let job = job.clone();
	let ctx = ctx.clone().with_tick(tick);
	let running = running.clone();

	runs.spawn(async move {
		let started = Instant::now();

		tracing::info!(job = %ctx.job(), tick, "job started");

		match job.run(&ctx).await {
			Ok(()) => tracing::info!(
				job = %ctx.job(),
				tick,
				elapsed_ms = started.elapsed().as_millis() as u64,
				"job finished"
			),
			Err(e) => ctx.report(e),
		}

		if skip {
			running.store(false, Ordering::Release);
		}
	});
}
