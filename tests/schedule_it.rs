// std
use std::sync::atomic::{AtomicUsize, Ordering};
// crates.io
use http::Method;
use serde_json::json;
use time::{format_description::well_known::Rfc3339, macros::datetime};
use tokio::sync::mpsc;
// self
use intra_harvester::{
	_preludet::*,
	CancellationToken,
	auth::JobName,
	request::UPDATED_AT_RANGE,
	schedule::{Cadence, DisabledJobs, FnJob, Job, JobContext, JobSpec, ListingJob, Scheduler},
	store::{HarvestStore, MemoryStore},
};

const LOCATIONS: &str = "/v2/locations";

fn locations_origin() -> Arc<ScriptedTransport> {
	ScriptedTransport::new(|request| {
		if request.method == Method::HEAD {
			ScriptedReply::empty(200).header("X-Total", "2").header("X-Per-Page", "100")
		} else {
			ScriptedReply::json(
				200,
				json!([{ "id": 1, "host": "c1r1s1" }, { "id": 2, "host": "c1r1s2" }]).to_string(),
			)
		}
	})
}

fn context(
	job: &str,
	transport: Arc<ScriptedTransport>,
	store: Arc<MemoryStore>,
) -> (JobContext, mpsc::UnboundedReceiver<intra_harvester::schedule::JobError>) {
	let (errors, rx) = mpsc::unbounded_channel();
	let executor = test_executor(transport, &[("locations", 1)]);
	let ctx = JobContext::new(
		JobName::new(job).expect("Job fixture should be valid."),
		executor,
		store,
		CancellationToken::new(),
		errors,
	);

	(ctx, rx)
}

fn ranges(transport: &ScriptedTransport) -> Vec<String> {
	transport
		.requests()
		.into_iter()
		.filter(|request| request.method == Method::GET)
		.filter_map(|request| request.query.get(UPDATED_AT_RANGE).cloned())
		.collect()
}

#[tokio::test]
async fn incremental_listing_advances_its_marker() {
	let transport = locations_origin();
	let store = Arc::new(MemoryStore::default());
	let (ctx, mut errors) = context("locations", transport.clone(), store.clone());
	let job = ListingJob::new(LOCATIONS, "locations").incremental(datetime!(2019-07-29 0:00 UTC));

	job.run(&ctx).await.expect("First run should succeed.");

	let marker = store
		.marker("locations")
		.await
		.expect("Marker should be readable.")
		.expect("First run should record a marker.");

	job.run(&ctx.clone().with_tick(1)).await.expect("Second run should succeed.");

	let ranges = ranges(&transport);
	let marker = marker.format(&Rfc3339).expect("Marker should format.");

	assert_eq!(ranges.len(), 2);
	assert!(ranges[0].starts_with("2019-07-29T00:00:00Z,"), "First range was {}.", ranges[0]);
	assert!(ranges[1].starts_with(&format!("{marker},")), "Second range was {}.", ranges[1]);
	assert_eq!(store.collection("locations").await.expect("Collection should list.").len(), 2);
	assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn wipe_happens_on_first_run_only() {
	let transport = locations_origin();
	let store = Arc::new(MemoryStore::default());
	let (ctx, _errors) = context("locations", transport, store.clone());
	let job = ListingJob::new(LOCATIONS, "locations").wipe_on_first_run();

	store.upsert("locations", "99", json!({ "id": 99 })).await.expect("Seed should upsert.");
	job.run(&ctx).await.expect("First run should succeed.");

	assert_eq!(store.collection("locations").await.expect("Collection should list.").len(), 2);

	store.upsert("locations", "99", json!({ "id": 99 })).await.expect("Seed should upsert.");
	job.run(&ctx.clone().with_tick(1)).await.expect("Later run should succeed.");

	assert_eq!(store.collection("locations").await.expect("Collection should list.").len(), 3);
}

#[tokio::test]
async fn records_without_id_are_reported_not_fatal() {
	let transport = ScriptedTransport::new(|request| {
		if request.method == Method::HEAD {
			ScriptedReply::empty(200).header("X-Total", "2").header("X-Per-Page", "100")
		} else {
			ScriptedReply::json(200, r#"[{"id":1},{"login":"ghost"}]"#)
		}
	});
	let store = Arc::new(MemoryStore::default());
	let (ctx, mut errors) = context("users", transport, store.clone());

	ListingJob::new(LOCATIONS, "locations").run(&ctx).await.expect("Run should complete.");

	let error = errors.try_recv().expect("Missing id should be reported.");

	assert_eq!(error.job.as_ref(), "users");
	assert_eq!(store.collection("locations").await.expect("Collection should list.").len(), 1);
}

#[tokio::test]
async fn scheduler_runs_enabled_jobs_until_cancelled() {
	let executor = test_executor(ScriptedTransport::ok_json("[]"), &[]);
	let store: Arc<dyn HarvestStore> = Arc::new(MemoryStore::default());
	let ticks = Arc::new(AtomicUsize::new(0));
	let disabled_runs = Arc::new(AtomicUsize::new(0));
	let (scheduler, mut errors) = Scheduler::new(executor, store);
	let counting = {
		let ticks = ticks.clone();

		FnJob(move |_: JobContext| {
			let ticks = ticks.clone();

			async move {
				ticks.fetch_add(1, Ordering::SeqCst);

				Ok::<_, Error>(())
			}
		})
	};
	let failing = FnJob(|_: JobContext| async {
		Err::<(), _>(Error::UnexpectedStatus { status: 500, body: "down".into() })
	});
	let cancel = CancellationToken::new();
	let handle = scheduler
		.disabled(DisabledJobs::parse("projects"))
		.job(
			JobSpec::new("counting", Cadence::Every(Duration::from_millis(20)))
				.expect("Job schedule should be valid."),
			counting,
		)
		.job(
			JobSpec::new("failing", Cadence::Every(Duration::from_secs(3600)))
				.expect("Job schedule should be valid."),
			failing,
		)
		.job(
			JobSpec::new("projects", Cadence::Every(Duration::from_millis(1)))
				.expect("Job schedule should be valid."),
			FnJob({
				let disabled_runs = disabled_runs.clone();

				move |_: JobContext| {
					disabled_runs.fetch_add(1, Ordering::SeqCst);

					async { Ok::<_, Error>(()) }
				}
			}),
		)
		.start(cancel.clone());
	let enabled = handle.enabled_jobs().iter().map(|job| job.to_string()).collect::<Vec<_>>();

	assert_eq!(enabled, vec!["counting", "failing"]);

	let error = tokio::time::timeout(Duration::from_secs(1), errors.recv())
		.await
		.expect("Failing job should report promptly.")
		.expect("Error channel should stay open while running.");

	assert_eq!(error.job.as_ref(), "failing");

	tokio::time::sleep(Duration::from_millis(110)).await;
	cancel.cancel();
	tokio::time::timeout(Duration::from_secs(1), handle.join())
		.await
		.expect("Drivers should stop after cancellation.");

	let ticks = ticks.load(Ordering::SeqCst);

	assert!(ticks >= 3, "Only {ticks} runs happened.");
	assert_eq!(disabled_runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn overlapping_ticks_are_skipped_when_requested() {
	let executor = test_executor(ScriptedTransport::ok_json("[]"), &[]);
	let store: Arc<dyn HarvestStore> = Arc::new(MemoryStore::default());
	let started = Arc::new(AtomicUsize::new(0));
	let (scheduler, _errors) = Scheduler::new(executor, store);
	let slow = {
		let started = started.clone();

		FnJob(move |_: JobContext| {
			let started = started.clone();

			async move {
				started.fetch_add(1, Ordering::SeqCst);
				tokio::time::sleep(Duration::from_millis(200)).await;

				Ok::<_, Error>(())
			}
		})
	};
	let cancel = CancellationToken::new();
	let handle = scheduler
		.job(
			JobSpec::new("locations", Cadence::Every(Duration::from_millis(10)))
				.expect("Job schedule should be valid.")
				.skip_overlapping(),
			slow,
		)
		.start(cancel.clone());

	tokio::time::sleep(Duration::from_millis(150)).await;
	cancel.cancel();
	handle.join().await;

	assert_eq!(started.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn first_run_waits_for_tick_when_initial_run_is_disabled() {
	let executor = test_executor(ScriptedTransport::ok_json("[]"), &[]);
	let store: Arc<dyn HarvestStore> = Arc::new(MemoryStore::default());
	let started = Arc::new(AtomicUsize::new(0));
	let (scheduler, _errors) = Scheduler::new(executor, store);
	let job = {
		let started = started.clone();

		FnJob(move |ctx: JobContext| {
			let started = started.clone();

			async move {
				assert_eq!(ctx.tick(), 0);
				started.fetch_add(1, Ordering::SeqCst);

				Ok::<_, Error>(())
			}
		})
	};
	let cancel = CancellationToken::new();
	let handle = scheduler
		.job(
			JobSpec::new("campus", Cadence::Every(Duration::from_millis(300)))
				.expect("Job schedule should be valid.")
				.without_initial_run(),
			job,
		)
		.start(cancel.clone());

	tokio::time::sleep(Duration::from_millis(100)).await;

	assert_eq!(started.load(Ordering::SeqCst), 0);

	cancel.cancel();
	handle.join().await;
}
