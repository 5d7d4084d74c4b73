//! Slug names for endpoint classes and scheduler jobs.
//!
//! Both kinds of name are typed by operators (`disabledjobs`, class tables) and end up in
//! log fields and metric labels, so they share one shape: a lowercase ASCII slug starting
//! with a letter, made of `a-z`, `0-9`, `_` and `-`.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

/// Longest accepted name, in bytes.
pub const NAME_MAX_LEN: usize = 32;

/// Why a class or job name was rejected.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum NameError {
	/// The name was empty.
	#[error("{kind} name cannot be empty.")]
	Empty {
		/// `class` or `job`.
		kind: &'static str,
	},
	/// The name was longer than [`NAME_MAX_LEN`].
	#[error("{kind} name `{name}` exceeds {NAME_MAX_LEN} characters.")]
	TooLong {
		/// `class` or `job`.
		kind: &'static str,
		/// Rejected name.
		name: String,
	},
	/// The name did not start with a lowercase letter.
	#[error("{kind} name `{name}` must start with a lowercase letter.")]
	LeadingCharacter {
		/// `class` or `job`.
		kind: &'static str,
		/// Rejected name.
		name: String,
	},
	/// The name contained a character outside the slug alphabet.
	#[error("{kind} name `{name}` contains `{found}`; only a-z, 0-9, `_` and `-` are allowed.")]
	InvalidCharacter {
		/// `class` or `job`.
		kind: &'static str,
		/// Rejected name.
		name: String,
		/// First offending character.
		found: char,
	},
}

macro_rules! def_slug {
	($(#[$meta:meta])* $name:ident, $kind:literal) => {
		$(#[$meta])*
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Validates `value` as a slug.
			pub fn new(value: impl AsRef<str>) -> Result<Self, NameError> {
				check_slug($kind, value.as_ref()).map(Self)
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = NameError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				Self::new(value)
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, "{}:{}", $kind, self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

def_slug! {
	/// Endpoint class, i.e. the credential partition a path is routed to.
	ClassId, "class"
}
def_slug! {
	/// Scheduled job, as named in `disabledjobs`.
	JobName, "job"
}

fn check_slug(kind: &'static str, name: &str) -> Result<String, NameError> {
	let mut chars = name.chars();

	match chars.next() {
		None => return Err(NameError::Empty { kind }),
		Some(first) if !first.is_ascii_lowercase() =>
			return Err(NameError::LeadingCharacter { kind, name: name.into() }),
		Some(_) => {},
	}

	if name.len() > NAME_MAX_LEN {
		return Err(NameError::TooLong { kind, name: name.into() });
	}
	if let Some(found) =
		chars.find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-')))
	{
		return Err(NameError::InvalidCharacter { kind, name: name.into(), found });
	}

	Ok(name.to_owned())
}
