//! Endpoint classes and the longest-prefix router that maps request paths onto them.

// self
use crate::{_prelude::*, auth::ClassId};

/// Identifier of the class reserved for token acquisition.
pub const OAUTH_CLASS: &str = "oauth";

const SHARE_EPSILON: f64 = 1e-9;

/// Errors raised while constructing or validating a [`ClassTable`].
#[derive(Debug, PartialEq, ThisError)]
pub enum ClassTableError {
	/// The table must contain at least one class.
	#[error("Class table must contain at least one class.")]
	Empty,
	/// A class identifier failed validation.
	#[error("Class identifier `{id}` is invalid.")]
	InvalidId {
		/// Rejected identifier.
		id: String,
	},
	/// The same class identifier appears twice.
	#[error("Class `{id}` is declared more than once.")]
	DuplicateClass {
		/// Duplicated class.
		id: ClassId,
	},
	/// A class declared no prefixes, or an empty one.
	#[error("Class `{id}` must declare non-empty URL prefixes.")]
	EmptyPrefix {
		/// Offending class.
		id: ClassId,
	},
	/// A share was outside `(0, 1]`.
	#[error("Class `{id}` has share {share}, expected a value in (0, 1].")]
	InvalidShare {
		/// Offending class.
		id: ClassId,
		/// Rejected share.
		share: f64,
	},
	/// Shares add up to more than one.
	#[error("Class shares add up to {total}, which exceeds 1.")]
	SharesExceedOne {
		/// Sum of all shares.
		total: f64,
	},
	/// A class referenced by the caller is not declared.
	#[error("Class `{id}` is not declared in the table.")]
	UnknownClass {
		/// Missing class.
		id: ClassId,
	},
	/// The token acquisition class is missing.
	#[error("Class table must contain the `oauth` class.")]
	MissingOauthClass,
}

/// Named partition of origin URL prefixes with its fraction of the credential budget.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndpointClass {
	/// Class identifier.
	pub id: ClassId,
	/// Path prefixes routed to this class.
	pub prefixes: Vec<String>,
	/// Fraction of the credential budget, in `(0, 1]`.
	pub share: f64,
}
impl EndpointClass {
	/// Minimum number of credentials this class holds out of `total`.
	pub fn quota(&self, total: usize) -> usize {
		((total as f64 * self.share).floor() as usize).max(1)
	}

	fn longest_match(&self, path: &str) -> Option<usize> {
		self.prefixes
			.iter()
			.filter(|prefix| path.starts_with(prefix.as_str()))
			.map(String::len)
			.max()
	}
}

/// Immutable, validated set of endpoint classes.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassTable {
	classes: Vec<EndpointClass>,
}
impl ClassTable {
	/// Starts an empty builder.
	pub fn builder() -> ClassTableBuilder {
		ClassTableBuilder::default()
	}

	/// Partition layout used against the 42 intra API.
	pub fn intra() -> Result<Self, ClassTableError> {
		Self::builder()
			.class(OAUTH_CLASS, ["/oauth"], 0.05)
			.class("campus", ["/v2/campus"], 0.05)
			.class("locations", ["/v2/locations"], 0.3)
			.class(
				"users",
				[
					"/v2/cursus_users",
					"/v2/coalitions",
					"/v2/coalitions_users",
					"/v2/titles",
					"/v2/titles_users",
					"/v2/groups_users",
					"/v2/me",
				],
				0.3,
			)
			.class("projects", ["/v2/projects_users"], 0.3)
			.build()
	}

	/// Classes in declaration order.
	pub fn classes(&self) -> &[EndpointClass] {
		&self.classes
	}

	/// Looks up one class.
	pub fn get(&self, id: &str) -> Option<&EndpointClass> {
		self.classes.iter().find(|class| class.id.as_ref() == id)
	}

	/// The class reserved for token acquisition.
	pub fn oauth(&self) -> &EndpointClass {
		// Presence is enforced by the builder.
		self.get(OAUTH_CLASS).unwrap_or(&self.classes[0])
	}

	/// Routes `path` to the class owning its longest matching prefix.
	///
	/// Ties between classes resolve to the one declared first.
	pub fn class_for(&self, path: &str) -> Result<&ClassId> {
		let mut best: Option<(&EndpointClass, usize)> = None;

		for class in &self.classes {
			if let Some(len) = class.longest_match(path)
				&& best.is_none_or(|(_, best_len)| len > best_len)
			{
				best = Some((class, len));
			}
		}

		best.map(|(class, _)| &class.id).ok_or_else(|| Error::NoRoute { path: path.into() })
	}

	/// First class, in declaration order, holding fewer credentials than its quota of
	/// `total`; the first class when every quota is met.
	pub fn class_in_need<F>(&self, total: usize, held: F) -> &ClassId
	where
		F: Fn(&ClassId) -> usize,
	{
		self.classes
			.iter()
			.find(|class| held(&class.id) < class.quota(total))
			.map(|class| &class.id)
			.unwrap_or(&self.classes[0].id)
	}
}

/// Builder for [`ClassTable`] values.
#[derive(Debug, Default)]
pub struct ClassTableBuilder {
	classes: Vec<(String, Vec<String>, f64)>,
}
impl ClassTableBuilder {
	/// Declares one class.
	pub fn class<I, P>(mut self, id: impl Into<String>, prefixes: I, share: f64) -> Self
	where
		I: IntoIterator<Item = P>,
		P: Into<String>,
	{
		self.classes.push((id.into(), prefixes.into_iter().map(Into::into).collect(), share));

		self
	}

	/// Validates and freezes the table.
	pub fn build(self) -> Result<ClassTable, ClassTableError> {
		if self.classes.is_empty() {
			return Err(ClassTableError::Empty);
		}

		let mut classes = Vec::with_capacity(self.classes.len());
		let mut total = 0.;

		for (raw_id, prefixes, share) in self.classes {
			let id = ClassId::new(&raw_id).map_err(|_| ClassTableError::InvalidId { id: raw_id })?;

			if classes.iter().any(|class: &EndpointClass| class.id == id) {
				return Err(ClassTableError::DuplicateClass { id });
			}
			if prefixes.is_empty() || prefixes.iter().any(String::is_empty) {
				return Err(ClassTableError::EmptyPrefix { id });
			}
			if !(share > 0. && share <= 1.) {
				return Err(ClassTableError::InvalidShare { id, share });
			}

			total += share;

			classes.push(EndpointClass { id, prefixes, share });
		}

		if total > 1. + SHARE_EPSILON {
			return Err(ClassTableError::SharesExceedOne { total });
		}
		if !classes.iter().any(|class| class.id.as_ref() == OAUTH_CLASS) {
			return Err(ClassTableError::MissingOauthClass);
		}

		Ok(ClassTable { classes })
	}
}
