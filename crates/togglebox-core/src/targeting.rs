// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Targeting predicate language (rules schema version 1).
//!
//! A condition is a predicate over the [`EvaluationContext`]. Rules and
//! experiment audiences combine conditions with AND; an empty list matches
//! every context.

use serde::{Deserialize, Serialize};

use crate::EvaluationContext;

/// Highest rules schema version this crate understands.
pub const RULES_SCHEMA_VERSION: u32 = 1;

/// A single targeting predicate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
	Attribute {
		/// `userId`, `country`, `language` or a custom attribute name.
		attribute: String,
		operator: AttributeOperator,
		value: serde_json::Value,
	},
	Country {
		operator: ListOperator,
		/// e.g., ["US", "CA", "GB"]
		values: Vec<String>,
	},
	Language {
		operator: ListOperator,
		values: Vec<String>,
	},
	User {
		operator: ListOperator,
		values: Vec<String>,
	},
}

impl Condition {
	/// Returns true if the context satisfies this condition.
	///
	/// A condition over an attribute the context does not carry never matches,
	/// including `not_in` and `not_equals`.
	pub fn matches(&self, context: &EvaluationContext) -> bool {
		match self {
			Condition::Attribute {
				attribute,
				operator,
				value,
			} => match context.attribute(attribute) {
				Some(actual) => operator.evaluate(&actual, value),
				None => false,
			},
			Condition::Country { operator, values } => match context.country.as_deref() {
				Some(country) => operator.evaluate_ignore_case(country, values),
				None => false,
			},
			Condition::Language { operator, values } => match context.language.as_deref() {
				Some(language) => operator.evaluate_ignore_case(language, values),
				None => false,
			},
			Condition::User { operator, values } => match context.user_id.as_deref() {
				Some(user_id) => operator.evaluate(user_id, values),
				None => false,
			},
		}
	}
}

/// Returns true when every condition matches.
pub fn all_match(conditions: &[Condition], context: &EvaluationContext) -> bool {
	conditions.iter().all(|c| c.matches(context))
}

/// Operators for attribute conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeOperator {
	Equals,
	NotEquals,
	Contains,
	StartsWith,
	EndsWith,
	GreaterThan,
	LessThan,
	GreaterThanOrEquals,
	LessThanOrEquals,
	In,
	NotIn,
}

impl AttributeOperator {
	/// Evaluates this operator against two JSON values.
	pub fn evaluate(&self, actual: &serde_json::Value, expected: &serde_json::Value) -> bool {
		match self {
			AttributeOperator::Equals => actual == expected,
			AttributeOperator::NotEquals => actual != expected,
			AttributeOperator::Contains => {
				if let (Some(actual_str), Some(expected_str)) = (actual.as_str(), expected.as_str()) {
					actual_str.contains(expected_str)
				} else if let Some(actual_arr) = actual.as_array() {
					actual_arr.contains(expected)
				} else {
					false
				}
			}
			AttributeOperator::StartsWith => match (actual.as_str(), expected.as_str()) {
				(Some(a), Some(e)) => a.starts_with(e),
				_ => false,
			},
			AttributeOperator::EndsWith => match (actual.as_str(), expected.as_str()) {
				(Some(a), Some(e)) => a.ends_with(e),
				_ => false,
			},
			AttributeOperator::GreaterThan => compare(actual, expected, |o| o.is_gt()),
			AttributeOperator::LessThan => compare(actual, expected, |o| o.is_lt()),
			AttributeOperator::GreaterThanOrEquals => compare(actual, expected, |o| o.is_ge()),
			AttributeOperator::LessThanOrEquals => compare(actual, expected, |o| o.is_le()),
			AttributeOperator::In => expected
				.as_array()
				.map(|arr| arr.contains(actual))
				.unwrap_or(false),
			AttributeOperator::NotIn => expected
				.as_array()
				.map(|arr| !arr.contains(actual))
				.unwrap_or(true),
		}
	}
}

/// Numbers compare numerically, strings lexicographically (ISO dates, semver-less
/// version labels). Mixed types never match.
fn compare<F>(actual: &serde_json::Value, expected: &serde_json::Value, accept: F) -> bool
where
	F: Fn(std::cmp::Ordering) -> bool,
{
	if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
		return a.partial_cmp(&b).map(accept).unwrap_or(false);
	}
	match (actual.as_str(), expected.as_str()) {
		(Some(a), Some(b)) => accept(a.cmp(b)),
		_ => false,
	}
}

/// Membership operator for list conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOperator {
	In,
	NotIn,
}

impl ListOperator {
	/// Exact membership test.
	pub fn evaluate(&self, actual: &str, values: &[String]) -> bool {
		let is_in = values.iter().any(|v| v == actual);
		match self {
			ListOperator::In => is_in,
			ListOperator::NotIn => !is_in,
		}
	}

	/// ASCII case-insensitive membership test, used for country and language codes.
	pub fn evaluate_ignore_case(&self, actual: &str, values: &[String]) -> bool {
		let is_in = values.iter().any(|v| v.eq_ignore_ascii_case(actual));
		match self {
			ListOperator::In => is_in,
			ListOperator::NotIn => !is_in,
		}
	}
}
