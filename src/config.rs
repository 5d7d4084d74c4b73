//! Process environment read at startup.

// std
use std::env;
// self
use crate::{
	_prelude::*,
	auth::Secret,
	error::ConfigError,
	obs::DebugTap,
	schedule::DisabledJobs,
};
#[cfg(feature = "reqwest")] use crate::lifecycle::PortalSession;

/// Portal session cookie variable.
pub const INTRA_SESSION_ENV: &str = "INTRA_SESSION_TOKEN";
/// Portal user id cookie variable.
pub const USER_ID_ENV: &str = "USER_ID_TOKEN";
/// Redirect URI variable.
pub const REDIRECT_URI_ENV: &str = "REDIRECT_URI";
/// Redirect URI used when [`REDIRECT_URI_ENV`] is unset.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080";

/// Harvester settings sourced from environment variables.
#[derive(Clone, Debug, Default)]
pub struct HarvestEnv {
	/// Portal session cookie.
	pub intra_session: Option<Secret>,
	/// Portal user id cookie.
	pub user_id: Option<Secret>,
	/// Redirect URI registered on minted applications.
	pub redirect_uri: String,
	/// Exchanges dumped to standard error.
	pub debug: DebugTap,
	/// Jobs suppressed at startup.
	pub disabled_jobs: DisabledJobs,
}
impl HarvestEnv {
	/// Reads every variable from the process environment.
	pub fn from_env() -> Self {
		Self::from_lookup(|name| env::var(name).ok())
	}

	/// Reads every variable through `lookup`.
	pub fn from_lookup<F>(lookup: F) -> Self
	where
		F: Fn(&str) -> Option<String>,
	{
		let secret = |name| lookup(name).filter(|value| !value.is_empty()).map(Secret::new);

		Self {
			intra_session: secret(INTRA_SESSION_ENV),
			user_id: secret(USER_ID_ENV),
			redirect_uri: lookup(REDIRECT_URI_ENV)
				.filter(|value| !value.is_empty())
				.unwrap_or_else(|| DEFAULT_REDIRECT_URI.into()),
			debug: lookup(crate::obs::DEBUG_ENV).map(|raw| DebugTap::parse(&raw)).unwrap_or_default(),
			disabled_jobs: lookup(crate::schedule::DISABLED_JOBS_ENV)
				.map(|raw| DisabledJobs::parse(&raw))
				.unwrap_or_default(),
		}
	}

	/// Portal session built from the cookies; both must be set.
	#[cfg(feature = "reqwest")]
	pub fn portal_session(&self) -> Result<PortalSession, ConfigError> {
		let intra_session = self
			.intra_session
			.clone()
			.ok_or(ConfigError::MissingEnv { name: INTRA_SESSION_ENV })?;
		let user_id = self.user_id.clone().ok_or(ConfigError::MissingEnv { name: USER_ID_ENV })?;

		Ok(PortalSession::new(intra_session, user_id).redirect_uri(self.redirect_uri.clone()))
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn env_of(pairs: &'static [(&'static str, &'static str)]) -> HarvestEnv {
		HarvestEnv::from_lookup(|name| {
			pairs.iter().find(|(key, _)| *key == name).map(|(_, value)| (*value).to_owned())
		})
	}

	#[test]
	fn defaults_apply_when_unset() {
		let env = env_of(&[]);

		assert!(env.intra_session.is_none());
		assert_eq!(env.redirect_uri, DEFAULT_REDIRECT_URI);
		assert_eq!(env.debug, DebugTap::Off);
		assert_eq!(env.disabled_jobs, DisabledJobs::None);
		assert!(matches!(
			env.portal_session(),
			Err(ConfigError::MissingEnv { name: INTRA_SESSION_ENV })
		));
	}

	#[test]
	fn reads_every_variable() {
		let env = env_of(&[
			(INTRA_SESSION_ENV, "sess"),
			(USER_ID_ENV, "uid"),
			(REDIRECT_URI_ENV, "https://example.org/cb"),
			("httpdebug", "/v2/campus"),
			("disabledjobs", "*"),
		]);
		let session = env.portal_session().expect("Both cookies are set.");

		assert_eq!(session.redirect_uri, "https://example.org/cb");
		assert_eq!(session.intra_session.expose(), "sess");
		assert!(env.debug.selects("/v2/campus/1"));
		assert!(env.disabled_jobs.is_disabled("users"));
	}
}
