// crates.io
use httpmock::prelude::*;
use serde_json::{Value, json};
// self
use intra_harvester::{
	_preludet::*,
	auth::{Identity, NewCredential, Secret},
	executor::Executor,
	lifecycle::{CredentialLifecycle, IntraPortal, PortalSession},
	request::ApiRequest,
	store::{HarvestStore, MemoryStore},
};

const COOKIE: &str = "user.id=uid; _intra_42_session_production=sess";
const APPLICATIONS_PAGE: &str = r#"<html><head>
	<meta name="csrf-token" content="csrf-123">
	</head><body>
	<div class="apps-root" data='[{"id":3,"name":"old"},{"id":4,"name":"other"}]'></div>
	</body></html>"#;
const CREATED_PAGE: &str =
	r#"<html><body>You are being <a href="/oauth/applications/7">redirected</a>.</body></html>"#;
const APPLICATION_PAGE: &str = r#"<html><body>
	<div class="credential">u-7</div>
	<div class="credential">s-7</div>
	<div class="redirect-uri-block"><code>http://localhost:8080</code></div>
	</body></html>"#;

struct Harness {
	server: MockServer,
	store: Arc<MemoryStore>,
	lifecycle: Arc<CredentialLifecycle>,
	executor: Arc<Executor>,
}

async fn harness() -> Harness {
	let server = MockServer::start_async().await;
	let store = Arc::new(MemoryStore::default());
	let portal = IntraPortal::with_base(
		&server.base_url(),
		PortalSession::new(Secret::new("sess"), Secret::new("uid")),
	)
	.expect("Portal should build against the mock server.");
	let lifecycle = Arc::new(CredentialLifecycle::new(Arc::new(portal), store.clone()));
	let executor = Arc::new(
		test_executor_builder(test_reqwest_transport())
			.base_url(server.base_url())
			.rotator(lifecycle.clone())
			.build()
			.expect("Executor should build against the mock server."),
	);

	Harness { server, store, lifecycle, executor }
}

async fn mock_portal_pages(server: &MockServer) {
	server
		.mock_async(|when, then| {
			when.method(GET).path("/oauth/applications").header("cookie", COOKIE);
			then.status(200).body(APPLICATIONS_PAGE);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/oauth/applications/7").header("cookie", COOKIE);
			then.status(200).body(APPLICATION_PAGE);
		})
		.await;
}

#[tokio::test]
async fn rejected_credential_is_rotated_and_request_retried() {
	let Harness { server, store, executor, .. } = harness().await;

	mock_portal_pages(&server).await;

	let old = store
		.insert_credential(NewCredential {
			app_id: 3,
			name: "old".into(),
			uid: "u-3".into(),
			secret: Secret::new("s-3"),
			redirect_uri: "http://localhost:8080".into(),
		})
		.await
		.expect("Old credential should be stored.");
	let client = executor
		.admit_to(class_id("campus"), Identity::new(old.clone(), Secret::new("token-old")))
		.expect("Old credential should be admitted.");
	let rejected = server
		.mock_async(|when, then| {
			when.method(GET).path("/v2/campus").header("authorization", "Bearer token-old");
			then.status(401).json_body(json!({ "error": "invalid_token" }));
		})
		.await;
	let created = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/applications").header("cookie", COOKIE);
			then.status(302).header("location", "/oauth/applications/7").body(CREATED_PAGE);
		})
		.await;
	let granted = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/oauth/token")
				.query_param("client_id", "u-7")
				.query_param("client_secret", "s-7");
			then.status(200).json_body(json!({ "access_token": "token-new" }));
		})
		.await;
	let accepted = server
		.mock_async(|when, then| {
			when.method(GET).path("/v2/campus").header("authorization", "Bearer token-new");
			then.status(200).json_body(json!([{ "id": 1, "name": "Paris" }]));
		})
		.await;
	let deleted = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/applications/3");
			then.status(302).header("location", "/oauth/applications");
		})
		.await;
	let campuses: Vec<Value> = executor
		.execute(&ApiRequest::new("/v2/campus").authenticated())
		.await
		.expect("Request should succeed with the rotated credential.");
	let stored = store.list_credentials().await.expect("Store should list.");

	assert_eq!(campuses[0]["name"], "Paris");
	assert_eq!(stored.len(), 1);
	assert_eq!(stored[0].app_id, 7);
	assert_eq!(stored[0].uid, "u-7");
	assert_eq!(
		client.access_token().map(|token| token.expose().to_owned()).as_deref(),
		Some("token-new")
	);
	assert_ne!(client.credential_id(), Some(old.id));
	assert!(!client.is_busy());

	rejected.assert_calls_async(2).await;
	created.assert_calls_async(1).await;
	granted.assert_calls_async(1).await;
	accepted.assert_calls_async(1).await;
	deleted.assert_calls_async(1).await;
}

#[tokio::test]
async fn bootstrap_mints_when_store_is_empty() {
	let Harness { server, store, lifecycle, executor } = harness().await;

	mock_portal_pages(&server).await;
	server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/applications");
			then.status(302).header("location", "/oauth/applications/7");
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).json_body(json!({ "access_token": "token-7" }));
		})
		.await;

	let pooled = lifecycle.bootstrap(&executor, 1).await.expect("Bootstrap should mint.");

	assert_eq!(pooled, 1);
	assert_eq!(executor.pool().class_len("oauth"), 1);
	assert_eq!(store.list_credentials().await.expect("Store should list.").len(), 1);
}

#[tokio::test]
async fn bootstrap_loads_stored_credentials() {
	let Harness { server, store, lifecycle, executor } = harness().await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).json_body(json!({ "access_token": "token-stored" }));
		})
		.await;

	for app_id in [1, 2] {
		store
			.insert_credential(NewCredential {
				app_id,
				name: format!("app-{app_id}"),
				uid: format!("u-{app_id}"),
				secret: Secret::new(format!("s-{app_id}")),
				redirect_uri: "http://localhost:8080".into(),
			})
			.await
			.expect("Credential should be stored.");
	}

	let pooled = lifecycle.bootstrap(&executor, 42).await.expect("Bootstrap should load.");

	assert_eq!(pooled, 2);
	assert_eq!(executor.pool().len(), 2);

	token.assert_calls_async(2).await;
}

#[tokio::test]
async fn delete_all_removes_listed_applications() {
	let Harness { server, store, lifecycle, .. } = harness().await;

	mock_portal_pages(&server).await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/oauth/applications/").header("cookie", COOKIE);
			then.status(200).body(APPLICATIONS_PAGE);
		})
		.await;

	let first = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/applications/3");
			then.status(302);
		})
		.await;
	let second = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/applications/4");
			then.status(302);
		})
		.await;

	store
		.insert_credential(NewCredential {
			app_id: 3,
			name: "old".into(),
			uid: "u-3".into(),
			secret: Secret::new("s-3"),
			redirect_uri: "http://localhost:8080".into(),
		})
		.await
		.expect("Credential should be stored.");

	let deleted = lifecycle.delete_all().await.expect("Deletion should succeed.");

	assert_eq!(deleted, 2);
	assert!(store.list_credentials().await.expect("Store should list.").is_empty());

	first.assert_calls_async(1).await;
	second.assert_calls_async(1).await;
}

#[tokio::test]
async fn rejected_form_fetches_a_fresh_csrf_token_next_time() {
	let Harness { server, lifecycle, .. } = harness().await;
	let listing = server
		.mock_async(|when, then| {
			when.method(GET).path("/oauth/applications").header("cookie", COOKIE);
			then.status(200).body(APPLICATIONS_PAGE);
		})
		.await;
	let create = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/applications");
			then.status(422).body("Invalid authenticity token");
		})
		.await;

	for _ in 0..2 {
		let err = lifecycle.mint_one().await.expect_err("Rejected form should fail the mint.");

		assert!(err.to_string().contains("422"), "Unexpected error: {err}.");
	}

	listing.assert_calls_async(2).await;
	create.assert_calls_async(2).await;
}

#[tokio::test]
async fn portal_error_status_is_reported() {
	let Harness { server, lifecycle, .. } = harness().await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/oauth/applications");
			then.status(403).body("Forbidden");
		})
		.await;

	let err = lifecycle.mint_one().await.expect_err("Forbidden portal should fail.");

	assert!(err.to_string().contains("403"), "Unexpected error: {err}.");
}
