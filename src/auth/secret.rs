//! Redacted wrapper for client secrets and bearer tokens.

// self
use crate::_prelude::*;

/// Secret string (client secret or access token) that never renders in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);
impl Secret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Returns `true` when the wrapped value is empty.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Renders the value as an `Authorization` header payload.
	pub(crate) fn bearer(&self) -> String {
		format!("Bearer {}", self.0)
	}
}
impl Debug for Secret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("Secret").field(&"<redacted>").finish()
	}
}
impl Display for Secret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn formatters_redact() {
		let secret = Secret::new("s-4c0ffee");

		assert_eq!(format!("{secret:?}"), "Secret(\"<redacted>\")");
		assert_eq!(format!("{secret}"), "<redacted>");
		assert_eq!(secret.bearer(), "Bearer s-4c0ffee");
	}

	#[test]
	fn serializes_as_plain_string() {
		let payload = serde_json::to_string(&Secret::new("token"))
			.expect("Secret should serialize to JSON.");

		assert_eq!(payload, "\"token\"");
	}
}
