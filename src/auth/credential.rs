//! Origin application credentials and the identity an RLC carries.

// self
use crate::{_prelude::*, auth::Secret};

/// Application registered at the origin, persisted by the harvester.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	/// Stable storage identifier.
	pub id: u64,
	/// Application identifier at the origin.
	pub app_id: u64,
	/// Display name used when the application was created.
	pub name: String,
	/// Public client identifier (UID).
	pub uid: String,
	/// Client secret.
	pub secret: Secret,
	/// Redirect URI registered for the application.
	pub redirect_uri: String,
	/// Instant the record was stored.
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}

/// Freshly minted application awaiting a storage identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCredential {
	/// Application identifier at the origin.
	pub app_id: u64,
	/// Display name used when the application was created.
	pub name: String,
	/// Public client identifier (UID).
	pub uid: String,
	/// Client secret.
	pub secret: Secret,
	/// Redirect URI registered for the application.
	pub redirect_uri: String,
}
impl NewCredential {
	/// Attaches the storage identifier and creation instant.
	pub fn into_credential(self, id: u64, created_at: OffsetDateTime) -> Credential {
		Credential {
			id,
			app_id: self.app_id,
			name: self.name,
			uid: self.uid,
			secret: self.secret,
			redirect_uri: self.redirect_uri,
			created_at,
		}
	}
}

/// Credential plus the access token currently granted for it.
#[derive(Clone, Debug)]
pub struct Identity {
	/// Credential the token was granted for.
	pub credential: Credential,
	/// Bearer token sent with every pooled request.
	pub access_token: Secret,
}
impl Identity {
	/// Pairs a credential with its current access token.
	pub fn new(credential: Credential, access_token: Secret) -> Self {
		Self { credential, access_token }
	}
}
