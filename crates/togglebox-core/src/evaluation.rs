// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deterministic flag evaluation and variant assignment.
//!
//! Nothing in here performs I/O. Both paths hash with murmur3 (x86, 32-bit,
//! seed 0) over `"{key}.{subject}"`. Changing the hash or the input format
//! reshuffles every existing rollout and assignment.

use std::io::Cursor;

use chrono::{DateTime, Utc};
use murmur3::murmur3_32;
use serde::{Deserialize, Serialize};

use crate::targeting::all_match;
use crate::{EvaluationContext, Experiment, Flag, Variation};

/// Why a flag resolved the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSource {
	/// No rule matched and the user fell outside the rollout.
	Default,
	/// A targeting rule decided.
	Rule,
	/// The user's bucket fell inside the rollout percentage.
	Rollout,
	/// The flag is unknown; the caller's default was returned.
	Fallback,
}

impl FlagSource {
	pub fn as_str(&self) -> &'static str {
		match self {
			FlagSource::Default => "default",
			FlagSource::Rule => "rule",
			FlagSource::Rollout => "rollout",
			FlagSource::Fallback => "fallback",
		}
	}
}

/// Result of evaluating a flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagResult {
	pub flag_key: String,
	pub enabled: bool,
	pub source: FlagSource,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rule_index: Option<usize>,
	pub evaluated_at: DateTime<Utc>,
}

impl FlagResult {
	pub fn new(flag_key: impl Into<String>, enabled: bool, source: FlagSource) -> Self {
		Self {
			flag_key: flag_key.into(),
			enabled,
			source,
			rule_index: None,
			evaluated_at: Utc::now(),
		}
	}

	/// Result for a flag that is not in the snapshot.
	pub fn fallback(flag_key: impl Into<String>, default: bool) -> Self {
		Self::new(flag_key, default, FlagSource::Fallback)
	}

	fn with_rule_index(mut self, index: usize) -> Self {
		self.rule_index = Some(index);
		self
	}
}

/// How a variation was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMethod {
	HashBucket,
	Override,
}

impl AssignmentMethod {
	pub fn as_str(&self) -> &'static str {
		match self {
			AssignmentMethod::HashBucket => "hash_bucket",
			AssignmentMethod::Override => "override",
		}
	}
}

/// A user's variation in a running experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantAssignment {
	pub experiment_key: String,
	pub variation_key: String,
	pub value: serde_json::Value,
	pub method: AssignmentMethod,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub experiment_version: Option<String>,
}

impl VariantAssignment {
	fn new(experiment: &Experiment, variation: &Variation, method: AssignmentMethod) -> Self {
		Self {
			experiment_key: experiment.key.clone(),
			variation_key: variation.key.clone(),
			value: variation.value.clone(),
			method,
			experiment_version: experiment.version.clone(),
		}
	}
}

/// Evaluates a flag for a given context.
///
/// The evaluation order is:
/// 1. Targeting rules in declaration order; the first whose conditions all match wins
/// 2. Rollout bucketing on the user id when the percentage is non-zero
/// 3. The flag's default value
pub fn evaluate_flag(flag: &Flag, context: &EvaluationContext) -> FlagResult {
	for (index, rule) in flag.rules.iter().enumerate() {
		if all_match(&rule.conditions, context) {
			return FlagResult::new(&flag.key, rule.value, FlagSource::Rule).with_rule_index(index);
		}
	}

	if flag.rollout_percentage > 0 {
		if let Some(user_id) = context.user_id.as_deref() {
			if in_rollout(&flag.key, user_id, flag.rollout_percentage) {
				return FlagResult::new(&flag.key, true, FlagSource::Rollout);
			}
		}
	}

	FlagResult::new(&flag.key, flag.default_value, FlagSource::Default)
}

/// Assigns a variation of an experiment to the context's subject.
///
/// Returns `None` when the experiment is not running, the audience does not
/// match, or no variation carries weight. An override for the user wins over
/// both targeting and bucketing.
pub fn assign_variant(experiment: &Experiment, context: &EvaluationContext) -> Option<VariantAssignment> {
	if !experiment.is_running() {
		return None;
	}

	if let Some(user_id) = context.user_id.as_deref() {
		if let Some(variation) = experiment
			.overrides
			.get(user_id)
			.and_then(|key| experiment.get_variation(key))
		{
			return Some(VariantAssignment::new(
				experiment,
				variation,
				AssignmentMethod::Override,
			));
		}
	}

	if !all_match(&experiment.targeting, context) {
		return None;
	}

	let variation = select_variation(experiment, context.distinct_id())?;
	Some(VariantAssignment::new(
		experiment,
		variation,
		AssignmentMethod::HashBucket,
	))
}

/// Selects a variation by cumulative weight.
fn select_variation<'a>(experiment: &'a Experiment, subject: &str) -> Option<&'a Variation> {
	let total_weight = experiment.total_weight();
	if total_weight == 0 {
		return None;
	}

	let bucket = hash_key(&experiment.key, subject) % total_weight;
	let mut cumulative = 0u32;

	for variation in &experiment.variations {
		cumulative = cumulative.saturating_add(variation.weight);
		if bucket < cumulative {
			return Some(variation);
		}
	}

	None
}

/// Bucket in `0..100` for a flag rollout.
pub fn rollout_bucket(flag_key: &str, user_id: &str) -> u32 {
	hash_key(flag_key, user_id) % 100
}

/// Evaluates percentage-based rollout using consistent hashing.
pub fn in_rollout(flag_key: &str, user_id: &str, percentage: u32) -> bool {
	rollout_bucket(flag_key, user_id) < percentage
}

/// murmur3_32 over `"{key}.{subject}"` with seed 0.
pub fn hash_key(key: &str, subject: &str) -> u32 {
	let input = format!("{}.{}", key, subject);
	murmur3_32(&mut Cursor::new(input.as_bytes()), 0).unwrap_or(0)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		AttributeOperator, Condition, ExperimentStatus, ListOperator, TargetingRule,
	};
	use serde_json::json;

	fn pro_plan_rule(value: bool) -> TargetingRule {
		TargetingRule::new(
			vec![Condition::Attribute {
				attribute: "plan".to_string(),
				operator: AttributeOperator::Equals,
				value: json!("pro"),
			}],
			value,
		)
	}

	fn ab_experiment() -> Experiment {
		Experiment::new("checkout_cta", ExperimentStatus::Running)
			.with_variation(Variation::new("control", 50, json!("Buy")))
			.with_variation(Variation::new("treatment", 50, json!("Buy now")))
	}

	#[test]
	fn test_murmur3_compatibility_vector() {
		let hash = murmur3_32(&mut Cursor::new("hello".as_bytes()), 0).unwrap();
		assert_eq!(hash, 0x248b_fa47);
		assert_eq!(hash_key("a", "b"), murmur3_32(&mut Cursor::new("a.b".as_bytes()), 0).unwrap());
	}

	#[test]
	fn test_first_matching_rule_wins() {
		let flag = Flag::new("beta", false)
			.with_rule(pro_plan_rule(true))
			.with_rule(TargetingRule::new(vec![], false));

		let pro = EvaluationContext::new().with_attribute("plan", json!("pro"));
		let result = evaluate_flag(&flag, &pro);
		assert!(result.enabled);
		assert_eq!(result.source, FlagSource::Rule);
		assert_eq!(result.rule_index, Some(0));

		let free = EvaluationContext::new().with_attribute("plan", json!("free"));
		let result = evaluate_flag(&flag, &free);
		assert!(!result.enabled);
		assert_eq!(result.rule_index, Some(1));
	}

	#[test]
	fn test_empty_rule_matches_everyone() {
		let flag = Flag::new("beta", false).with_rule(TargetingRule::new(vec![], true));
		assert!(evaluate_flag(&flag, &EvaluationContext::new()).enabled);
	}

	#[test]
	fn test_rollout_requires_user_id() {
		let flag = Flag::new("beta", false).with_rollout(100);
		let result = evaluate_flag(&flag, &EvaluationContext::new());
		assert!(!result.enabled);
		assert_eq!(result.source, FlagSource::Default);

		let result = evaluate_flag(&flag, &EvaluationContext::new().with_user_id("u1"));
		assert!(result.enabled);
		assert_eq!(result.source, FlagSource::Rollout);
	}

	#[test]
	fn test_percentage_consistent_hashing() {
		let results: Vec<bool> = (0..1000)
			.map(|i| in_rollout("test.feature", &format!("user{}", i), 50))
			.collect();

		let true_count = results.iter().filter(|&&r| r).count();
		assert!(true_count > 400 && true_count < 600, "got {true_count}");
	}

	#[test]
	fn test_stopped_and_draft_experiments_never_assign() {
		let ctx = EvaluationContext::new().with_user_id("u1");
		for status in [ExperimentStatus::Draft, ExperimentStatus::Stopped] {
			let mut exp = ab_experiment();
			exp.status = status;
			assert!(assign_variant(&exp, &ctx).is_none());
		}
	}

	#[test]
	fn test_override_wins_over_targeting_and_bucketing() {
		let exp = ab_experiment()
			.with_targeting(Condition::Country {
				operator: ListOperator::In,
				values: vec!["US".to_string()],
			})
			.with_override("qa-user", "treatment");

		let ctx = EvaluationContext::new().with_user_id("qa-user").with_country("FR");
		let assignment = assign_variant(&exp, &ctx).unwrap();
		assert_eq!(assignment.variation_key, "treatment");
		assert_eq!(assignment.method, AssignmentMethod::Override);
	}

	#[test]
	fn test_targeting_miss_yields_none() {
		let exp = ab_experiment().with_targeting(Condition::Country {
			operator: ListOperator::In,
			values: vec!["US".to_string()],
		});
		let ctx = EvaluationContext::new().with_user_id("u1").with_country("FR");
		assert!(assign_variant(&exp, &ctx).is_none());
	}

	#[test]
	fn test_zero_weight_yields_none() {
		let exp = Experiment::new("exp", ExperimentStatus::Running)
			.with_variation(Variation::new("a", 0, json!(null)))
			.with_variation(Variation::new("b", 0, json!(null)));
		assert!(assign_variant(&exp, &EvaluationContext::new().with_user_id("u1")).is_none());
	}

	#[test]
	fn test_zero_weight_variation_is_never_selected() {
		let exp = Experiment::new("exp", ExperimentStatus::Running)
			.with_variation(Variation::new("never", 0, json!(null)))
			.with_variation(Variation::new("always", 10, json!(null)));
		for i in 0..200 {
			let ctx = EvaluationContext::new().with_user_id(format!("user{i}"));
			assert_eq!(assign_variant(&exp, &ctx).unwrap().variation_key, "always");
		}
	}

	#[test]
	fn test_anonymous_subjects_share_a_bucket() {
		let exp = ab_experiment();
		let a = assign_variant(&exp, &EvaluationContext::new()).unwrap();
		let b = assign_variant(&exp, &EvaluationContext::new()).unwrap();
		assert_eq!(a.variation_key, b.variation_key);
		assert_eq!(a.method, AssignmentMethod::HashBucket);
	}
}

#[cfg(test)]
mod proptest_tests {
	use super::*;
	use crate::ExperimentStatus;
	use proptest::prelude::*;
	use serde_json::json;

	proptest! {
		#[test]
		fn percentage_monotonic(user_id in "[a-zA-Z0-9]{1,50}", flag_key in "[a-z][a-z0-9_.]{2,49}") {
			let bucket = rollout_bucket(&flag_key, &user_id);
			for pct in 0..=100u32 {
				prop_assert_eq!(in_rollout(&flag_key, &user_id, pct), bucket < pct);
			}
		}

		#[test]
		fn rollout_zero_returns_default(user_id in "[a-zA-Z0-9]{1,50}", default in any::<bool>()) {
			let flag = Flag::new("beta", default);
			let result = evaluate_flag(&flag, &EvaluationContext::new().with_user_id(user_id));
			prop_assert_eq!(result.enabled, default);
			prop_assert_eq!(result.source, FlagSource::Default);
		}

		#[test]
		fn rollout_hundred_enables_everyone(user_id in "[a-zA-Z0-9]{1,50}", flag_key in "[a-z][a-z0-9_.]{2,49}") {
			let flag = Flag::new(flag_key, false).with_rollout(100);
			let result = evaluate_flag(&flag, &EvaluationContext::new().with_user_id(user_id));
			prop_assert!(result.enabled);
		}

		#[test]
		fn assignment_is_deterministic(
			user_id in "[a-zA-Z0-9]{1,50}",
			weights in proptest::collection::vec(1u32..100, 1..6),
		) {
			let mut exp = Experiment::new("exp", ExperimentStatus::Running);
			for (i, w) in weights.iter().enumerate() {
				exp = exp.with_variation(Variation::new(format!("v{i}"), *w, json!(i)));
			}
			let ctx = EvaluationContext::new().with_user_id(user_id);
			let first = assign_variant(&exp, &ctx).unwrap();
			let second = assign_variant(&exp.clone(), &ctx).unwrap();
			prop_assert_eq!(first.variation_key, second.variation_key);
		}
	}
}
