// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Subject id used for events when no user could be resolved.
pub const ANONYMOUS_ID: &str = "anonymous";

/// Context passed in by the caller for flag evaluation and variant assignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
	pub user_id: Option<String>,
	/// ISO 3166 country code.
	pub country: Option<String>,
	/// Two-letter language code.
	pub language: Option<String>,
	#[serde(default, skip_serializing_if = "HashMap::is_empty")]
	pub attributes: HashMap<String, serde_json::Value>,
}

impl EvaluationContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	pub fn with_country(mut self, country: impl Into<String>) -> Self {
		self.country = Some(country.into());
		self
	}

	/// Sets the language from a language code or a full locale string.
	pub fn with_language(mut self, locale: impl AsRef<str>) -> Self {
		self.language = normalize_language(locale.as_ref());
		self
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}

	/// The id events are attributed to and experiments bucket on.
	pub fn distinct_id(&self) -> &str {
		self.user_id.as_deref().unwrap_or(ANONYMOUS_ID)
	}

	/// Resolves an attribute for targeting. `userId`, `country` and `language`
	/// read the built-in fields; anything else reads `attributes`.
	pub fn attribute(&self, name: &str) -> Option<serde_json::Value> {
		match name {
			"userId" => self.user_id.clone().map(serde_json::Value::String),
			"country" => self.country.clone().map(serde_json::Value::String),
			"language" => self.language.clone().map(serde_json::Value::String),
			other => self.attributes.get(other).cloned(),
		}
	}
}

/// Normalises a locale string to a language code by keeping its first two
/// characters (`en_US` becomes `en`). Shorter strings are kept as they are;
/// blank input yields `None`.
pub fn normalize_language(locale: &str) -> Option<String> {
	let trimmed = locale.trim();
	if trimmed.is_empty() {
		return None;
	}
	Some(trimmed.chars().take(2).collect())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_evaluation_context_builder() {
		let ctx = EvaluationContext::new()
			.with_user_id("user123")
			.with_country("US")
			.with_language("en_US")
			.with_attribute("plan", serde_json::json!("enterprise"));

		assert_eq!(ctx.user_id, Some("user123".to_string()));
		assert_eq!(ctx.country, Some("US".to_string()));
		assert_eq!(ctx.language, Some("en".to_string()));
		assert_eq!(
			ctx.attributes.get("plan"),
			Some(&serde_json::json!("enterprise"))
		);
	}

	#[test]
	fn test_normalize_language() {
		assert_eq!(normalize_language("en_US"), Some("en".to_string()));
		assert_eq!(normalize_language("fr"), Some("fr".to_string()));
		assert_eq!(normalize_language("de-AT"), Some("de".to_string()));
		assert_eq!(normalize_language("x"), Some("x".to_string()));
		assert_eq!(normalize_language("  "), None);
	}

	#[test]
	fn test_distinct_id_falls_back_to_anonymous() {
		assert_eq!(EvaluationContext::new().distinct_id(), ANONYMOUS_ID);
		assert_eq!(
			EvaluationContext::new().with_user_id("u1").distinct_id(),
			"u1"
		);
	}

	#[test]
	fn test_builtin_attribute_lookup() {
		let ctx = EvaluationContext::new()
			.with_user_id("u1")
			.with_attribute("userId", serde_json::json!("shadowed"));
		assert_eq!(ctx.attribute("userId"), Some(serde_json::json!("u1")));
		assert_eq!(ctx.attribute("country"), None);
	}

	#[test]
	fn test_context_serializes_camel_case() {
		let ctx = EvaluationContext::new().with_user_id("u1");
		let json = serde_json::to_value(&ctx).unwrap();
		assert_eq!(json["userId"], "u1");
		assert!(json.get("attributes").is_none());
	}
}
