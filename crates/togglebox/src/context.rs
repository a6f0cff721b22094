// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Building evaluation contexts from the host application.
//!
//! The host supplies a [`UserResolver`] (who is the current user) and a
//! [`LocaleResolver`] (what locale is the current request in). Plain closures
//! implement both traits.
//!
//! ```
//! use togglebox::{LocaleResolver, UserResolver};
//!
//! let user = || Some("user-42".to_string());
//! let locale = || Some("fr_CA".to_string());
//! assert_eq!(user.resolve_user_id().as_deref(), Some("user-42"));
//! assert_eq!(locale.resolve_locale().as_deref(), Some("fr_CA"));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use togglebox_core::{normalize_language, EvaluationContext};

/// Resolves the id of the current user, if any.
pub trait UserResolver: Send + Sync {
	fn resolve_user_id(&self) -> Option<String>;
}

impl<F> UserResolver for F
where
	F: Fn() -> Option<String> + Send + Sync,
{
	fn resolve_user_id(&self) -> Option<String> {
		self()
	}
}

/// Resolves the locale of the current request, e.g. `en_US`.
pub trait LocaleResolver: Send + Sync {
	fn resolve_locale(&self) -> Option<String>;
}

impl<F> LocaleResolver for F
where
	F: Fn() -> Option<String> + Send + Sync,
{
	fn resolve_locale(&self) -> Option<String> {
		self()
	}
}

/// Never resolves a user; events are attributed to the anonymous id.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousUser;

impl UserResolver for AnonymousUser {
	fn resolve_user_id(&self) -> Option<String> {
		None
	}
}

/// Always resolves the same user. Useful for CLIs and background jobs.
#[derive(Debug, Clone)]
pub struct FixedUser(String);

impl FixedUser {
	pub fn new(user_id: impl Into<String>) -> Self {
		Self(user_id.into())
	}
}

impl UserResolver for FixedUser {
	fn resolve_user_id(&self) -> Option<String> {
		Some(self.0.clone())
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocale;

impl LocaleResolver for NoLocale {
	fn resolve_locale(&self) -> Option<String> {
		None
	}
}

/// Builds an [`EvaluationContext`]. Explicit values win over the resolvers.
#[must_use]
pub struct ContextBuilder {
	user: Arc<dyn UserResolver>,
	locale: Arc<dyn LocaleResolver>,
	user_id: Option<String>,
	country: Option<String>,
	language: Option<String>,
	attributes: HashMap<String, serde_json::Value>,
}

impl ContextBuilder {
	pub fn new(user: Arc<dyn UserResolver>, locale: Arc<dyn LocaleResolver>) -> Self {
		Self {
			user,
			locale,
			user_id: None,
			country: None,
			language: None,
			attributes: HashMap::new(),
		}
	}

	pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	pub fn country(mut self, country: impl Into<String>) -> Self {
		self.country = Some(country.into());
		self
	}

	/// A language code or a full locale string.
	pub fn language(mut self, locale: impl Into<String>) -> Self {
		self.language = Some(locale.into());
		self
	}

	pub fn attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}

	pub fn build(self) -> EvaluationContext {
		let user_id = self
			.user_id
			.or_else(|| self.user.resolve_user_id())
			.filter(|id| !id.trim().is_empty());
		let language = self
			.language
			.or_else(|| self.locale.resolve_locale())
			.and_then(|locale| normalize_language(&locale));

		EvaluationContext {
			user_id,
			country: self.country.filter(|c| !c.trim().is_empty()),
			language,
			attributes: self.attributes,
		}
	}
}
