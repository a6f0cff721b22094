// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Definition payloads and the validated snapshot built from them.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PayloadError, Result};
use crate::evaluation::{self, FlagResult, VariantAssignment};
use crate::targeting::RULES_SCHEMA_VERSION;
use crate::{EvaluationContext, Experiment, Flag};

/// The definition set as served by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionPayload {
	/// Rules schema version the payload was written against. Absent means 1.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub schema_version: Option<u32>,
	/// Config version label, e.g. "stable" or "v12".
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	#[serde(default)]
	pub configs: BTreeMap<String, serde_json::Value>,
	#[serde(default)]
	pub flags: Vec<Flag>,
	#[serde(default)]
	pub experiments: Vec<Experiment>,
}

impl DefinitionPayload {
	/// Parses raw payload bytes without validating them.
	pub fn from_slice(bytes: &[u8]) -> Result<Self> {
		Ok(serde_json::from_slice(bytes)?)
	}

	/// Checks the whole payload. Nothing is adopted unless every check passes.
	pub fn validate(&self) -> Result<()> {
		let schema = self.schema_version.unwrap_or(RULES_SCHEMA_VERSION);
		if schema > RULES_SCHEMA_VERSION {
			return Err(PayloadError::UnsupportedSchema {
				found: schema,
				supported: RULES_SCHEMA_VERSION,
			});
		}

		for key in self.configs.keys() {
			if key.is_empty() {
				return Err(PayloadError::InvalidKey(key.clone()));
			}
		}

		let mut flag_keys = HashSet::new();
		for flag in &self.flags {
			if !Flag::validate_key(&flag.key) {
				return Err(PayloadError::InvalidKey(flag.key.clone()));
			}
			if !flag_keys.insert(flag.key.as_str()) {
				return Err(PayloadError::DuplicateFlagKey(flag.key.clone()));
			}
			if flag.rollout_percentage > 100 {
				return Err(PayloadError::RolloutOutOfRange {
					flag_key: flag.key.clone(),
					percentage: flag.rollout_percentage,
				});
			}
		}

		let mut experiment_keys = HashSet::new();
		for experiment in &self.experiments {
			validate_experiment(experiment)?;
			if !experiment_keys.insert(experiment.key.as_str()) {
				return Err(PayloadError::DuplicateExperimentKey(experiment.key.clone()));
			}
		}

		Ok(())
	}
}

fn validate_experiment(experiment: &Experiment) -> Result<()> {
	if !Flag::validate_key(&experiment.key) {
		return Err(PayloadError::InvalidKey(experiment.key.clone()));
	}

	let mut variation_keys = HashSet::new();
	for variation in &experiment.variations {
		if !Flag::validate_key(&variation.key) {
			return Err(PayloadError::InvalidKey(variation.key.clone()));
		}
		if !variation_keys.insert(variation.key.as_str()) {
			return Err(PayloadError::DuplicateVariationKey {
				experiment_key: experiment.key.clone(),
				variation_key: variation.key.clone(),
			});
		}
	}

	for (user_id, variation_key) in &experiment.overrides {
		if !variation_keys.contains(variation_key.as_str()) {
			return Err(PayloadError::UnknownOverrideVariation {
				experiment_key: experiment.key.clone(),
				user_id: user_id.clone(),
				variation_key: variation_key.clone(),
			});
		}
	}

	Ok(())
}

/// An immutable, validated view of one definition payload.
///
/// Exactly one snapshot is active in a client at a time; refreshes build a
/// new one and swap it in whole.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
	version: Option<String>,
	schema_version: u32,
	configs: BTreeMap<String, serde_json::Value>,
	flags: BTreeMap<String, Flag>,
	experiments: BTreeMap<String, Experiment>,
	fetched_at: Option<DateTime<Utc>>,
}

impl Default for Snapshot {
	fn default() -> Self {
		Self::empty()
	}
}

impl Snapshot {
	/// The snapshot a client holds before its first successful load.
	pub fn empty() -> Self {
		Self {
			version: None,
			schema_version: RULES_SCHEMA_VERSION,
			configs: BTreeMap::new(),
			flags: BTreeMap::new(),
			experiments: BTreeMap::new(),
			fetched_at: None,
		}
	}

	/// Validates a payload and builds a snapshot from it.
	pub fn from_payload(payload: DefinitionPayload, fetched_at: DateTime<Utc>) -> Result<Self> {
		payload.validate()?;

		Ok(Self {
			version: payload.version,
			schema_version: payload.schema_version.unwrap_or(RULES_SCHEMA_VERSION),
			configs: payload.configs,
			flags: payload
				.flags
				.into_iter()
				.map(|f| (f.key.clone(), f))
				.collect(),
			experiments: payload
				.experiments
				.into_iter()
				.map(|e| (e.key.clone(), e))
				.collect(),
			fetched_at: Some(fetched_at),
		})
	}

	/// Parses and validates raw payload bytes.
	pub fn parse(bytes: &[u8], fetched_at: DateTime<Utc>) -> Result<Self> {
		Self::from_payload(DefinitionPayload::from_slice(bytes)?, fetched_at)
	}

	/// Rebuilds the payload this snapshot was made from, for caching.
	pub fn to_payload(&self) -> DefinitionPayload {
		DefinitionPayload {
			schema_version: Some(self.schema_version),
			version: self.version.clone(),
			configs: self.configs.clone(),
			flags: self.flags.values().cloned().collect(),
			experiments: self.experiments.values().cloned().collect(),
		}
	}

	pub fn version(&self) -> Option<&str> {
		self.version.as_deref()
	}

	pub fn schema_version(&self) -> u32 {
		self.schema_version
	}

	/// When the payload behind this snapshot was fetched. `None` for the empty snapshot.
	pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
		self.fetched_at
	}

	pub fn is_empty(&self) -> bool {
		self.fetched_at.is_none()
	}

	pub fn config(&self, key: &str) -> Option<&serde_json::Value> {
		self.configs.get(key)
	}

	pub fn configs(&self) -> &BTreeMap<String, serde_json::Value> {
		&self.configs
	}

	pub fn flag(&self, key: &str) -> Option<&Flag> {
		self.flags.get(key)
	}

	/// Flags ordered by key.
	pub fn flags(&self) -> impl Iterator<Item = &Flag> {
		self.flags.values()
	}

	pub fn experiment(&self, key: &str) -> Option<&Experiment> {
		self.experiments.get(key)
	}

	/// Experiments ordered by key.
	pub fn experiments(&self) -> impl Iterator<Item = &Experiment> {
		self.experiments.values()
	}

	/// Evaluates a flag. Unknown keys return `default` with source `fallback`.
	pub fn evaluate(&self, flag_key: &str, context: &EvaluationContext, default: bool) -> FlagResult {
		match self.flag(flag_key) {
			Some(flag) => evaluation::evaluate_flag(flag, context),
			None => FlagResult::fallback(flag_key, default),
		}
	}

	/// Assigns a variation. Unknown keys, inactive experiments and unmatched
	/// audiences yield `None`.
	pub fn assign(&self, experiment_key: &str, context: &EvaluationContext) -> Option<VariantAssignment> {
		self
			.experiment(experiment_key)
			.and_then(|e| evaluation::assign_variant(e, context))
	}
}
