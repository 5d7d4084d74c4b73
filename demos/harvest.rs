//! Runs the harvester against the live origin: provisions credentials through the logged-in
//! portal session, then keeps campuses, users, locations, and projects up to date in a JSON
//! file store.
//!
//! Requires `INTRA_SESSION_TOKEN` and `USER_ID_TOKEN`; honors `REDIRECT_URI`, `httpdebug`, and
//! `disabledjobs`.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use color_eyre::Result;
use time::macros::datetime;
use tracing_subscriber::EnvFilter;
// self
use intra_harvester::{
	CancellationToken,
	config::HarvestEnv,
	executor::Executor,
	http::ReqwestTransport,
	lifecycle::{CredentialLifecycle, IntraPortal},
	route::ClassTable,
	schedule::{Cadence, JobSpec, ListingJob, Scheduler},
	store::{FileStore, HarvestStore},
};

const STORE_PATH: &str = "harvest.json";
const CREDENTIALS: usize = 42;

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let env = HarvestEnv::from_env();
	let store: Arc<dyn HarvestStore> = Arc::new(FileStore::open(STORE_PATH)?);
	let portal = Arc::new(IntraPortal::new(env.portal_session()?)?);
	let lifecycle = Arc::new(CredentialLifecycle::new(portal, store.clone()));
	let executor = Arc::new(
		Executor::builder(Arc::new(ReqwestTransport::default()), ClassTable::intra()?)
			.debug_tap(env.debug.clone())
			.rotator(lifecycle.clone())
			.build()?,
	);
	let pooled = lifecycle.bootstrap(&executor, CREDENTIALS).await?;

	tracing::info!(pooled, "credential pool ready");

	let (scheduler, mut errors) = Scheduler::new(executor.clone(), store);
	let scheduler = scheduler
		.disabled(env.disabled_jobs.clone())
		.job(
			JobSpec::new("campus", Cadence::daily_at(0, 0, 0)?)?,
			ListingJob::new("/v2/campus", "campus"),
		)
		.job(
			JobSpec::new("users", Cadence::Every(Duration::from_secs(6 * 3600)))?,
			ListingJob::new("/v2/cursus_users", "users")
				.param("filter[cursus_id]", "21")
				.param("sort", "-level")
				.max_concurrent(20),
		)
		.job(
			JobSpec::new("locations", Cadence::Every(Duration::from_secs(60)))?.skip_overlapping(),
			ListingJob::new("/v2/locations", "locations")
				.param("filter[active]", "true")
				.incremental(datetime!(2019-07-29 08:45:17 UTC))
				.wipe_on_first_run(),
		)
		.job(
			JobSpec::new("projects", Cadence::Every(Duration::from_secs(24 * 3600)))?,
			ListingJob::new("/v2/projects_users", "projects")
				.incremental(datetime!(2019-07-29 08:45:17 UTC))
				.max_concurrent(100),
		);
	let handle = scheduler.start(CancellationToken::new());

	tracing::info!(jobs = ?handle.enabled_jobs(), "harvesting");

	let stats = tokio::spawn({
		let executor = executor.clone();

		async move {
			loop {
				tokio::time::sleep(Duration::from_secs(30)).await;
				tracing::info!(progress = %executor.stats().snapshot(), "fetch progress");
			}
		}
	});

	while let Some(error) = errors.recv().await {
		tracing::error!(%error, "job error");
	}

	stats.abort();
	handle.join().await;

	Ok(())
}
