// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::targeting::Condition;

/// Lifecycle state of an experiment. Only running experiments assign variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
	#[default]
	Draft,
	Running,
	Stopped,
}

impl ExperimentStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			ExperimentStatus::Draft => "draft",
			ExperimentStatus::Running => "running",
			ExperimentStatus::Stopped => "stopped",
		}
	}
}

impl std::fmt::Display for ExperimentStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A multi-variant experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
	pub key: String,
	#[serde(default)]
	pub status: ExperimentStatus,
	/// Order matters: cumulative weight ranges follow declaration order.
	#[serde(default)]
	pub variations: Vec<Variation>,
	/// Audience conditions, all of which must match.
	#[serde(default)]
	pub targeting: Vec<Condition>,
	/// userId -> variation key
	#[serde(default, skip_serializing_if = "HashMap::is_empty")]
	pub overrides: HashMap<String, String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
}

impl Experiment {
	pub fn new(key: impl Into<String>, status: ExperimentStatus) -> Self {
		Self {
			key: key.into(),
			status,
			variations: Vec::new(),
			targeting: Vec::new(),
			overrides: HashMap::new(),
			version: None,
		}
	}

	pub fn with_variation(mut self, variation: Variation) -> Self {
		self.variations.push(variation);
		self
	}

	pub fn with_targeting(mut self, condition: Condition) -> Self {
		self.targeting.push(condition);
		self
	}

	pub fn with_override(mut self, user_id: impl Into<String>, variation_key: impl Into<String>) -> Self {
		self.overrides.insert(user_id.into(), variation_key.into());
		self
	}

	pub fn is_running(&self) -> bool {
		self.status == ExperimentStatus::Running
	}

	/// Gets a variation by key.
	pub fn get_variation(&self, key: &str) -> Option<&Variation> {
		self.variations.iter().find(|v| v.key == key)
	}

	/// Sum of all variation weights, saturating.
	pub fn total_weight(&self) -> u32 {
		self
			.variations
			.iter()
			.fold(0u32, |acc, v| acc.saturating_add(v.weight))
	}
}

/// One arm of an experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
	/// e.g., "control", "treatment_a"
	pub key: String,
	#[serde(default)]
	pub weight: u32,
	#[serde(default)]
	pub value: serde_json::Value,
}

impl Variation {
	pub fn new(key: impl Into<String>, weight: u32, value: serde_json::Value) -> Self {
		Self {
			key: key.into(),
			weight,
			value,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_get_variation_and_total_weight() {
		let exp = Experiment::new("checkout_cta", ExperimentStatus::Running)
			.with_variation(Variation::new("control", 50, json!("Buy")))
			.with_variation(Variation::new("treatment", 30, json!("Buy now")));

		assert_eq!(exp.total_weight(), 80);
		assert_eq!(exp.get_variation("treatment").unwrap().value, json!("Buy now"));
		assert!(exp.get_variation("missing").is_none());
	}

	#[test]
	fn test_total_weight_saturates() {
		let exp = Experiment::new("big", ExperimentStatus::Running)
			.with_variation(Variation::new("a", u32::MAX, json!(null)))
			.with_variation(Variation::new("b", 10, json!(null)));
		assert_eq!(exp.total_weight(), u32::MAX);
	}

	#[test]
	fn test_status_wire_format() {
		let exp: Experiment = serde_json::from_value(json!({
			"key": "exp",
			"status": "running",
			"variations": [{"key": "a", "weight": 1, "value": true}],
			"overrides": {"user-1": "a"}
		}))
		.unwrap();
		assert!(exp.is_running());
		assert_eq!(exp.overrides.get("user-1").map(String::as_str), Some("a"));
		assert_eq!(ExperimentStatus::Stopped.to_string(), "stopped");
	}

	#[test]
	fn test_status_defaults_to_draft() {
		let exp: Experiment = serde_json::from_value(json!({"key": "exp"})).unwrap();
		assert_eq!(exp.status, ExperimentStatus::Draft);
		assert!(!exp.is_running());
	}
}
