//! OAuth grants accepted by the origin token endpoint.

// self
use crate::{_prelude::*, auth::Credential};

/// Path of the origin token endpoint.
pub const TOKEN_PATH: &str = "/oauth/token";

/// Grant exchanged for an access token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenGrant {
	/// Application-level token for pooled API calls.
	ClientCredentials,
	/// User login: exchanges an authorization code obtained through the redirect URI.
	AuthorizationCode {
		/// Code returned to the redirect URI.
		code: String,
		/// Path the user should land on after login, appended as `?next=`.
		next: String,
	},
}
impl TokenGrant {
	/// Wire value of `grant_type`.
	pub fn grant_type(&self) -> &'static str {
		match self {
			Self::ClientCredentials => "client_credentials",
			Self::AuthorizationCode { .. } => "authorization_code",
		}
	}

	/// Query parameters sent to [`TOKEN_PATH`] for `credential`.
	pub fn params(&self, credential: &Credential) -> BTreeMap<String, String> {
		let mut params = BTreeMap::from([
			("grant_type".to_owned(), self.grant_type().to_owned()),
			("client_id".to_owned(), credential.uid.clone()),
			("client_secret".to_owned(), credential.secret.expose().to_owned()),
		]);

		if let Self::AuthorizationCode { code, next } = self {
			params.insert("code".into(), code.clone());
			params.insert("redirect_uri".into(), format!("{}?next={next}", credential.redirect_uri));
		}

		params
	}
}

/// Token endpoint payload; only the access token is consumed.
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct TokenResponse {
	#[serde(default)]
	pub(crate) access_token: String,
}
