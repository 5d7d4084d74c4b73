//! Reqwest-backed session against the origin's application management pages.

// crates.io
use reqwest::{
	Response,
	header::{self, HeaderMap, HeaderValue},
	multipart::{Form, Part},
	redirect::Policy,
};
// self
use crate::{
	_prelude::*,
	auth::{NewCredential, Secret},
	config::DEFAULT_REDIRECT_URI,
	error::{ConfigError, TransportError},
	lifecycle::{
		ApplicationPortal, PortalError, PortalFuture,
		scrape::{self, ScrapedCredentials},
	},
	obs::{FetchSpan, RequestKind, RequestOutcome, record_request_outcome},
};

/// Production application portal.
pub const PORTAL_BASE: &str = "https://profile.intra.42.fr";
/// Prefix of generated application names.
pub const APP_NAME_PREFIX: &str = "intra-harvester";

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const APPLICATIONS: &str = "/oauth/applications";

/// Logged-in portal session cookies plus the redirect URI given to new applications.
#[derive(Clone, Debug)]
pub struct PortalSession {
	/// Value of the `_intra_42_session_production` cookie.
	pub intra_session: Secret,
	/// Value of the `user.id` cookie.
	pub user_id: Secret,
	/// Redirect URI registered on minted applications.
	pub redirect_uri: String,
}
impl PortalSession {
	/// Creates a session with the default redirect URI.
	pub fn new(intra_session: Secret, user_id: Secret) -> Self {
		Self { intra_session, user_id, redirect_uri: DEFAULT_REDIRECT_URI.into() }
	}

	/// Overrides the redirect URI.
	pub fn redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
		self.redirect_uri = redirect_uri.into();

		self
	}

	fn cookie(&self) -> String {
		format!(
			"user.id={}; _intra_42_session_production={}",
			self.user_id.expose(),
			self.intra_session.expose()
		)
	}
}

/// [`ApplicationPortal`] that drives the origin's HTML forms.
///
/// Redirects are not followed; create and delete answer with `302`, which counts as success.
/// The CSRF token is read from the application list and reused until a form submission
/// fails; the next submission then reads a fresh one.
#[derive(Debug)]
pub struct IntraPortal {
	client: ReqwestClient,
	base: Url,
	session: PortalSession,
	app_name_prefix: String,
	csrf: AsyncMutex<Option<String>>,
}
impl IntraPortal {
	/// Portal session against the production origin.
	pub fn new(session: PortalSession) -> Result<Self, ConfigError> {
		Self::with_base(PORTAL_BASE, session)
	}

	/// Portal session against `base`.
	pub fn with_base(base: &str, session: PortalSession) -> Result<Self, ConfigError> {
		let base = Url::parse(base)
			.map_err(|source| ConfigError::InvalidBaseUrl { value: base.into(), source })?;
		let client = ReqwestClient::builder().redirect(Policy::none()).build()?;

		Ok(Self {
			client,
			base,
			session,
			app_name_prefix: APP_NAME_PREFIX.into(),
			csrf: AsyncMutex::new(None),
		})
	}

	/// Overrides the prefix of generated application names.
	pub fn app_name_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.app_name_prefix = prefix.into();

		self
	}

	async fn csrf_token(&self) -> Result<String> {
		let mut cached = self.csrf.lock().await;

		if let Some(token) = cached.as_ref() {
			return Ok(token.clone());
		}

		let token = self.fetch_csrf_token().await?;

		*cached = Some(token.clone());

		Ok(token)
	}

	/// Runs a form submission with the cached CSRF token, discarding the token on failure.
	async fn submit_form<T, F, Fut>(&self, submit: F) -> Result<T>
	where
		F: FnOnce(String) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let result = submit(self.csrf_token().await?).await;

		if result.is_err() && self.csrf.lock().await.take().is_some() {
			tracing::debug!("form submission failed, CSRF token discarded");
		}

		result
	}

	async fn fetch_csrf_token(&self) -> Result<String> {
		let html = self.get_page(APPLICATIONS, "csrf").await?;

		Ok(scrape::csrf_token(&html)?)
	}

	fn url(&self, path: &str) -> Result<Url> {
		self.base.join(path).map_err(|source| {
			ConfigError::InvalidBaseUrl { value: format!("{}{path}", self.base), source }.into()
		})
	}

	fn headers(&self) -> Result<HeaderMap> {
		let origin = self.base.origin().ascii_serialization();
		let mut headers = HeaderMap::new();

		headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
		headers.insert(header::COOKIE, header_value(&self.session.cookie())?);
		headers.insert(header::REFERER, header_value(&format!("{origin}{APPLICATIONS}/new"))?);
		headers.insert("authority", header_value(self.base.host_str().unwrap_or_default())?);
		headers.insert(header::ORIGIN, header_value(&origin)?);

		Ok(headers)
	}

	async fn get_page(&self, path: &str, stage: &'static str) -> Result<String> {
		let span = FetchSpan::new(RequestKind::Portal, stage, path);

		record_request_outcome(RequestKind::Portal, RequestOutcome::Attempt);

		let result = span.instrument(self.read_page(path, stage)).await;

		record_request_outcome(
			RequestKind::Portal,
			if result.is_ok() { RequestOutcome::Success } else { RequestOutcome::Failure },
		);

		result
	}

	async fn read_page(&self, path: &str, stage: &'static str) -> Result<String> {
		let response = self
			.client
			.get(self.url(path)?)
			.headers(self.headers()?)
			.send()
			.await
			.map_err(TransportError::from)?;
		let response = expect_status(response, stage, &[200])?;

		Ok(response.text().await.map_err(TransportError::from)?)
	}

	async fn create_application(&self, csrf: String, name: &str) -> Result<u64> {
		let form = Form::new()
			.text("utf8", "✓")
			.text("authenticity_token", csrf)
			.text("doorkeeper_application[name]", name.to_owned())
			.text("doorkeeper_application[image_cache]", "")
			.part("doorkeeper_application[image]", Part::bytes(Vec::new()).file_name(""))
			.text("doorkeeper_application[description]", "")
			.text("doorkeeper_application[website]", "")
			.text("doorkeeper_application[public]", "0")
			.text("doorkeeper_application[scopes]", "")
			.text("doorkeeper_application[redirect_uri]", self.session.redirect_uri.clone())
			.text("commit", "Submit");
		let response = self
			.client
			.post(self.url(APPLICATIONS)?)
			.headers(self.headers()?)
			.multipart(form)
			.send()
			.await
			.map_err(TransportError::from)?;
		let response = expect_status(response, "create", &[302, 200])?;
		let location = response
			.headers()
			.get(header::LOCATION)
			.and_then(|value| value.to_str().ok())
			.map(ToOwned::to_owned);
		let body = response.text().await.map_err(TransportError::from)?;

		match (scrape::linked_application_id(&body)?, location) {
			(Some(id), _) => Ok(id),
			(None, Some(location)) => Ok(scrape::location_application_id(&location)?),
			(None, None) => Err(PortalError::MissingApplicationId.into()),
		}
	}

	async fn mint(&self) -> Result<NewCredential> {
		let name = format!("{}-{:08x}", self.app_name_prefix, rand::random::<u32>());
		let app_id = self.submit_form(|csrf| self.create_application(csrf, &name)).await?;
		let html = self.get_page(&format!("{APPLICATIONS}/{app_id}"), "application").await?;
		let ScrapedCredentials { uid, secret, redirect_uri } =
			scrape::application_credentials(&html)?;

		tracing::debug!(app_id, %name, "application created");

		Ok(NewCredential { app_id, name, uid, secret: Secret::new(secret), redirect_uri })
	}

	async fn delete(&self, app_id: u64) -> Result<()> {
		self.submit_form(|csrf| self.delete_application(csrf, app_id)).await?;
		tracing::debug!(app_id, "application deleted");

		Ok(())
	}

	async fn delete_application(&self, csrf: String, app_id: u64) -> Result<()> {
		let token: String = url::form_urlencoded::byte_serialize(csrf.as_bytes()).collect();
		let response = self
			.client
			.post(self.url(&format!("{APPLICATIONS}/{app_id}"))?)
			.headers(self.headers()?)
			.header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
			.body(format!("_method=delete&authenticity_token={token}"))
			.send()
			.await
			.map_err(TransportError::from)?;

		expect_status(response, "delete", &[302, 200])?;

		Ok(())
	}
}
impl ApplicationPortal for IntraPortal {
	fn mint_one(&self) -> PortalFuture<'_, NewCredential> {
		let span = FetchSpan::new(RequestKind::Portal, "mint", APPLICATIONS);

		Box::pin(span.instrument(self.mint()))
	}

	fn list_existing_ids(&self) -> PortalFuture<'_, Vec<u64>> {
		Box::pin(async move {
			let html = self.get_page(&format!("{APPLICATIONS}/"), "list").await?;

			Ok(scrape::application_ids(&html)?)
		})
	}

	fn delete_one(&self, app_id: u64) -> PortalFuture<'_, ()> {
		let span = FetchSpan::new(RequestKind::Portal, "delete", APPLICATIONS);

		Box::pin(span.instrument(self.delete(app_id)))
	}
}

fn header_value(value: &str) -> Result<HeaderValue> {
	HeaderValue::from_str(value).map_err(|_| PortalError::InvalidHeader.into())
}

fn expect_status(response: Response, stage: &'static str, accepted: &[u16]) -> Result<Response> {
	let status = response.status().as_u16();

	if accepted.contains(&status) {
		Ok(response)
	} else {
		Err(PortalError::UnexpectedStatus { stage, status }.into())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn cookie_carries_both_session_values() {
		let session = PortalSession::new(Secret::new("sess"), Secret::new("uid"));

		assert_eq!(session.cookie(), "user.id=uid; _intra_42_session_production=sess");
		assert_eq!(session.redirect_uri, DEFAULT_REDIRECT_URI);
	}

	#[test]
	fn headers_mirror_the_portal_origin() {
		let portal = IntraPortal::with_base(
			"http://127.0.0.1:9000",
			PortalSession::new(Secret::new("s"), Secret::new("u")),
		)
		.expect("Portal should build.");
		let headers = portal.headers().expect("Headers should build.");

		assert_eq!(headers[header::ORIGIN], "http://127.0.0.1:9000");
		assert_eq!(headers[header::REFERER], "http://127.0.0.1:9000/oauth/applications/new");
		assert_eq!(headers["authority"], "127.0.0.1");
		assert!(
			headers[header::USER_AGENT].to_str().map(|ua| ua.contains("Chrome")).unwrap_or(false)
		);
	}
}
