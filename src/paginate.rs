//! Paginated fan-out: a HEAD request sizes the listing, then one worker per page streams
//! decoded items into a bounded channel.
//!
//! The stream yields [`PageEvent::Item`] for every element, [`PageEvent::Failed`] for every
//! failed page, and exactly one terminal [`PageEvent::Done`] once all workers finished.
//! Cancelling the token stops new dispatches and unblocks waiting workers; the stream then
//! reports [`Error::Cancelled`] before [`PageEvent::Done`].

// crates.io
use serde::de::DeserializeOwned;
use tokio::{
	sync::{Semaphore, mpsc},
	task::JoinSet,
};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	executor::Executor,
	http::HeaderSink,
	obs::{FetchSpan, RequestKind},
	request::ApiRequest,
};

/// Header carrying the total number of items of a listing.
pub const TOTAL_HEADER: &str = "X-Total";
/// Header carrying the number of items per page.
pub const PER_PAGE_HEADER: &str = "X-Per-Page";

const CHANNEL_CAPACITY: usize = 256;

/// Per-item transformation applied before an element is streamed; receives the page number.
pub type PageHook<E> = Arc<dyn Fn(E, u32) -> E + Send + Sync>;

/// One event of a paginated fetch.
#[derive(Debug)]
pub enum PageEvent<E> {
	/// Decoded element of `page`.
	Item {
		/// Page the element was listed on.
		page: u32,
		/// Decoded (and hooked) element.
		value: E,
	},
	/// A page failed, or the fetch was cancelled.
	Failed(Error),
	/// Every worker finished; no further events follow.
	Done,
}

/// Receiving side of a paginated fetch.
#[derive(Debug)]
pub struct PageStream<E> {
	rx: mpsc::Receiver<PageEvent<E>>,
	page_count: u32,
	dispatched: u32,
	finished: bool,
}
impl<E> PageStream<E> {
	/// Total pages reported by the sizing request.
	pub fn page_count(&self) -> u32 {
		self.page_count
	}

	/// Pages planned for dispatch, from the starting page through the last one.
	pub fn dispatched(&self) -> u32 {
		self.dispatched
	}

	/// Receives the next event; returns [`PageEvent::Done`] forever once finished.
	pub async fn recv(&mut self) -> PageEvent<E> {
		if self.finished {
			return PageEvent::Done;
		}

		match self.rx.recv().await {
			Some(PageEvent::Done) | None => {
				self.finished = true;

				PageEvent::Done
			},
			Some(event) => event,
		}
	}

	/// Drains the stream into its elements and errors.
	pub async fn collect(mut self) -> (Vec<E>, Vec<Error>) {
		let mut items = Vec::new();
		let mut errors = Vec::new();

		loop {
			match self.recv().await {
				PageEvent::Item { value, .. } => items.push(value),
				PageEvent::Failed(e) => errors.push(e),
				PageEvent::Done => return (items, errors),
			}
		}
	}
}

/// Number of pages holding `total` items at `per_page` items each.
pub fn page_count(total: u64, per_page: u64) -> Result<u32> {
	if per_page == 0 {
		return Err(Error::page_count("X-Per-Page is zero"));
	}
	if total == 0 {
		return Ok(0);
	}

	u32::try_from(1 + (total - 1) / per_page)
		.map_err(|_| Error::page_count("page count does not fit in 32 bits"))
}

impl Executor {
	/// Fetches every page of `request`, streaming decoded elements of type `E`.
	pub async fn fetch_paginated<E>(
		self: &Arc<Self>,
		request: ApiRequest,
		cancel: CancellationToken,
	) -> Result<PageStream<E>>
	where
		E: 'static + Send + DeserializeOwned,
	{
		self.fetch_paginated_with(request, cancel, None).await
	}

	/// Like [`Executor::fetch_paginated`], passing every element through `hook` first.
	pub async fn fetch_paginated_with<E>(
		self: &Arc<Self>,
		request: ApiRequest,
		cancel: CancellationToken,
		hook: Option<PageHook<E>>,
	) -> Result<PageStream<E>>
	where
		E: 'static + Send + DeserializeOwned,
	{
		let page_count = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(Error::Cancelled),
			count = self.discover_page_count(&request) => count?,
		};
		let first = request.starting_page();
		let dispatched = if first > page_count { 0 } else { page_count - first + 1 };
		let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

		self.stats().grow_planned(u64::from(dispatched));
		tracing::info!(path = request.path(), page_count, dispatched, "fetching pages");

		let executor = self.clone();

		tokio::spawn(async move {
			executor.drive_pages(request, first, page_count, tx, cancel, hook).await;
		});

		Ok(PageStream { rx, page_count, dispatched, finished: false })
	}

	/// Sends `request` as HEAD and derives its page count from the paging headers.
	///
	/// Decode failures of the (empty) HEAD body are expected and ignored.
	pub async fn discover_page_count(&self, request: &ApiRequest) -> Result<u32> {
		let sink = HeaderSink::default();
		let head = request.sizing_head(sink.clone());
		let span = FetchSpan::new(RequestKind::Page, "size", request.path());

		match span.instrument(self.execute_as::<serde_json::Value>(&head, RequestKind::Page)).await
		{
			Ok(_) => {},
			Err(e) if e.is_parse() => {},
			Err(e) => return Err(e),
		}

		let total = numeric_header(&sink, TOTAL_HEADER)?;
		let per_page = numeric_header(&sink, PER_PAGE_HEADER)?;

		page_count(total, per_page)
	}

	async fn drive_pages<E>(
		self: Arc<Self>,
		request: ApiRequest,
		first: u32,
		last: u32,
		tx: mpsc::Sender<PageEvent<E>>,
		cancel: CancellationToken,
		hook: Option<PageHook<E>>,
	) where
		E: 'static + Send + DeserializeOwned,
	{
		let semaphore = match request.concurrency() {
			0 => None,
			limit => Some(Arc::new(Semaphore::new(limit))),
		};
		let mut workers = JoinSet::new();

		for page in first..=last {
			let permit = match &semaphore {
				Some(semaphore) => tokio::select! {
					biased;
					_ = cancel.cancelled() => break,
					permit = semaphore.clone().acquire_owned() => match permit {
						Ok(permit) => Some(permit),
						Err(_) => break,
					},
				},
				None => None,
			};

			if cancel.is_cancelled() {
				break;
			}

			let executor = self.clone();
			let request = request.page(page);
			let tx = tx.clone();
			let cancel = cancel.clone();
			let hook = hook.clone();

			workers.spawn(async move {
				let _permit = permit;

				executor.fetch_page(request, page, tx, cancel, hook).await;
			});
		}

		while let Some(joined) = workers.join_next().await {
			if let Err(e) = joined {
				let _ = tx.send(PageEvent::Failed(e.into())).await;
			}
		}

		if cancel.is_cancelled() {
			let _ = tx.send(PageEvent::Failed(Error::Cancelled)).await;
		}

		let _ = tx.send(PageEvent::Done).await;
	}

	async fn fetch_page<E>(
		self: Arc<Self>,
		request: ApiRequest,
		page: u32,
		tx: mpsc::Sender<PageEvent<E>>,
		cancel: CancellationToken,
		hook: Option<PageHook<E>>,
	) where
		E: 'static + Send + DeserializeOwned,
	{
		let outcome = tokio::select! {
			biased;
			_ = cancel.cancelled() => Err(Error::Cancelled),
			items = self.execute_as::<Vec<E>>(&request, RequestKind::Page) => items,
		};

		self.stats().record_completed();

		match outcome {
			Ok(items) =>
				for item in items {
					let value = match &hook {
						Some(hook) => hook(item, page),
						None => item,
					};

					if tx.send(PageEvent::Item { page, value }).await.is_err() {
						return;
					}
				},
			// Reported once by the driver.
			Err(Error::Cancelled) => {},
			Err(e) => {
				tracing::warn!(path = request.path(), page, error = %e, "page failed");

				let _ = tx.send(PageEvent::Failed(e)).await;
			},
		}
	}
}

fn numeric_header(sink: &HeaderSink, name: &str) -> Result<u64> {
	let raw =
		sink.header(name).ok_or_else(|| Error::page_count(format!("{name} header is missing")))?;

	raw.trim().parse().map_err(|_| Error::page_count(format!("{name} header `{raw}` is not a number")))
}
