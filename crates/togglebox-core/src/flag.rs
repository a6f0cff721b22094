// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

use crate::targeting::Condition;

/// Maximum length of a flag, experiment or config key.
pub const MAX_KEY_LEN: usize = 200;

/// A boolean feature flag with ordered targeting rules and a rollout percentage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
	/// e.g., "checkout.new_flow"
	pub key: String,
	#[serde(default)]
	pub default_value: bool,
	/// Walked in declaration order; the first matching rule decides.
	#[serde(default)]
	pub rules: Vec<TargetingRule>,
	/// 0-100
	#[serde(default)]
	pub rollout_percentage: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
}

impl Flag {
	pub fn new(key: impl Into<String>, default_value: bool) -> Self {
		Self {
			key: key.into(),
			default_value,
			rules: Vec::new(),
			rollout_percentage: 0,
			version: None,
			description: None,
		}
	}

	pub fn with_rule(mut self, rule: TargetingRule) -> Self {
		self.rules.push(rule);
		self
	}

	pub fn with_rollout(mut self, percentage: u32) -> Self {
		self.rollout_percentage = percentage;
		self
	}

	pub fn with_version(mut self, version: impl Into<String>) -> Self {
		self.version = Some(version.into());
		self
	}

	/// Validates a definition key.
	///
	/// Keys are assigned by the backend, so only the shape that would break
	/// hashing or cache addressing is rejected: empty keys, keys longer than
	/// [`MAX_KEY_LEN`], and keys containing whitespace or control characters.
	pub fn validate_key(key: &str) -> bool {
		!key.is_empty()
			&& key.len() <= MAX_KEY_LEN
			&& !key.chars().any(|c| c.is_whitespace() || c.is_control())
	}
}

/// A targeting rule: when every condition matches, the flag resolves to `value`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetingRule {
	#[serde(default)]
	pub conditions: Vec<Condition>,
	pub value: bool,
}

impl TargetingRule {
	pub fn new(conditions: Vec<Condition>, value: bool) -> Self {
		Self { conditions, value }
	}
}
