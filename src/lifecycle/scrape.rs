//! Extraction of CSRF tokens, application ids, and client credentials from portal pages.

// crates.io
use scraper::{ElementRef, Html, Selector};
// self
use crate::{_prelude::*, lifecycle::PortalError};

const APPLICATIONS_PATH: &str = "/oauth/applications/";

/// Client credentials shown on an application page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScrapedCredentials {
	/// Public client identifier.
	pub uid: String,
	/// Client secret.
	pub secret: String,
	/// Redirect URI registered for the application.
	pub redirect_uri: String,
}

#[derive(Deserialize)]
struct ListedApplication {
	id: u64,
}

fn selector(css: &'static str) -> Result<Selector, PortalError> {
	Selector::parse(css).map_err(|_| PortalError::Selector { selector: css })
}

fn text_of(element: ElementRef) -> String {
	element.text().collect::<String>().trim().to_owned()
}

/// CSRF token from `<meta name="csrf-token">`.
pub fn csrf_token(html: &str) -> Result<String, PortalError> {
	let document = Html::parse_document(html);
	let meta = selector("meta[name=csrf-token]")?;

	document
		.select(&meta)
		.next()
		.and_then(|element| element.value().attr("content"))
		.filter(|token| !token.is_empty())
		.map(ToOwned::to_owned)
		.ok_or(PortalError::MissingCsrfToken)
}

/// Application ids listed in the JSON `data` attribute of `.apps-root`.
pub fn application_ids(html: &str) -> Result<Vec<u64>, PortalError> {
	let document = Html::parse_document(html);
	let root = selector(".apps-root")?;
	let data = document
		.select(&root)
		.next()
		.and_then(|element| element.value().attr("data"))
		.ok_or(PortalError::MissingAppsRoot)?;
	let listed: Vec<ListedApplication> =
		serde_json::from_str(data).map_err(|source| PortalError::MalformedAppList { source })?;

	Ok(listed.into_iter().map(|application| application.id).collect())
}

/// Id of the first `/oauth/applications/<id>` link on a page.
pub fn linked_application_id(html: &str) -> Result<Option<u64>, PortalError> {
	let document = Html::parse_document(html);
	let link = selector("a[href^='/oauth/applications/']")?;
	let Some(href) = document.select(&link).next().and_then(|element| element.value().attr("href"))
	else {
		return Ok(None);
	};

	application_id_in_path(href).map(Some)
}

/// Id carried by a `Location` header pointing at an application page.
pub fn location_application_id(location: &str) -> Result<u64, PortalError> {
	let path = match Url::parse(location) {
		Ok(url) => url.path().to_owned(),
		Err(_) => location.to_owned(),
	};

	application_id_in_path(&path)
}

fn application_id_in_path(path: &str) -> Result<u64, PortalError> {
	let segment = path
		.find(APPLICATIONS_PATH)
		.map(|at| &path[at + APPLICATIONS_PATH.len()..])
		.and_then(|rest| rest.split(['/', '?', '#']).next())
		.unwrap_or_default();

	segment.parse().map_err(|_| PortalError::InvalidApplicationId { value: path.to_owned() })
}

/// UID, secret, and redirect URI shown on an application page.
pub fn application_credentials(html: &str) -> Result<ScrapedCredentials, PortalError> {
	let document = Html::parse_document(html);
	let credential = selector(".credential")?;
	let redirect = selector(".redirect-uri-block code")?;
	let mut credentials = document.select(&credential).map(text_of);
	let (Some(uid), Some(secret)) = (credentials.next(), credentials.next()) else {
		return Err(PortalError::MissingCredentials);
	};
	let redirect_uri = document.select(&redirect).next().map(text_of).unwrap_or_default();

	Ok(ScrapedCredentials { uid, secret, redirect_uri })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	const APPLICATIONS_PAGE: &str = r#"<html><head>
		<meta name="csrf-token" content="tok+en/==">
		</head><body>
		<div class="apps-root" data='[{"id":11,"name":"a"},{"id":12,"name":"b"}]'></div>
		</body></html>"#;
	const APPLICATION_PAGE: &str = r#"<html><body>
		<a href="/oauth/applications/7/edit">Edit</a>
		<div class="credential"> u-123 </div>
		<div class="credential">s-456</div>
		<div class="redirect-uri-block"><code>http://localhost:8080</code></div>
		</body></html>"#;

	#[test]
	fn reads_csrf_and_listed_ids() {
		assert_eq!(csrf_token(APPLICATIONS_PAGE).ok().as_deref(), Some("tok+en/=="));
		assert_eq!(application_ids(APPLICATIONS_PAGE).ok(), Some(vec![11, 12]));
		assert!(matches!(csrf_token("<html></html>"), Err(PortalError::MissingCsrfToken)));
		assert!(matches!(application_ids("<html></html>"), Err(PortalError::MissingAppsRoot)));
	}

	#[test]
	fn reads_application_page() {
		let credentials =
			application_credentials(APPLICATION_PAGE).expect("Fixture page should scrape.");

		assert_eq!(credentials.uid, "u-123");
		assert_eq!(credentials.secret, "s-456");
		assert_eq!(credentials.redirect_uri, "http://localhost:8080");
		assert_eq!(linked_application_id(APPLICATION_PAGE).ok(), Some(Some(7)));
		assert!(matches!(
			application_credentials("<div class=\"credential\">only</div>"),
			Err(PortalError::MissingCredentials)
		));
	}

	#[test]
	fn reads_ids_from_locations() {
		assert_eq!(
			location_application_id("https://profile.intra.42.fr/oauth/applications/42").ok(),
			Some(42)
		);
		assert_eq!(location_application_id("/oauth/applications/9?created=1").ok(), Some(9));
		assert!(location_application_id("/oauth/applications/new").is_err());
		assert_eq!(linked_application_id("<a href=\"/intra\">x</a>").ok(), Some(None));
	}
}
