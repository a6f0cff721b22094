// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EvaluationContext, FlagResult, VariantAssignment};

/// Kind of a telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
	Evaluation,
	Conversion,
	Custom,
}

/// A telemetry event queued for delivery to the stats endpoint.
///
/// The id is generated once, so a batch that is resent after a failed flush
/// carries the same ids and the backend can deduplicate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
	pub id: Uuid,
	pub kind: EventKind,
	/// Flag, experiment or custom event name.
	pub subject_key: String,
	pub context: EvaluationContext,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<f64>,
	#[serde(default)]
	pub properties: serde_json::Value,
	pub timestamp: DateTime<Utc>,
}

impl Event {
	pub fn new(kind: EventKind, subject_key: impl Into<String>, context: EvaluationContext) -> Self {
		Self {
			id: Uuid::new_v4(),
			kind,
			subject_key: subject_key.into(),
			context,
			value: None,
			properties: serde_json::Value::Object(Default::default()),
			timestamp: Utc::now(),
		}
	}

	pub fn with_value(mut self, value: f64) -> Self {
		self.value = Some(value);
		self
	}

	pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
		self.properties = properties;
		self
	}

	/// Event for a flag evaluation.
	pub fn flag_evaluation(result: &FlagResult, context: &EvaluationContext) -> Self {
		Self::new(EventKind::Evaluation, &result.flag_key, context.clone()).with_properties(
			serde_json::json!({
				"type": "flag",
				"enabled": result.enabled,
				"source": result.source.as_str(),
				"ruleIndex": result.rule_index,
			}),
		)
	}

	/// Event for a variant assignment (an exposure).
	pub fn exposure(assignment: &VariantAssignment, context: &EvaluationContext) -> Self {
		Self::new(
			EventKind::Evaluation,
			&assignment.experiment_key,
			context.clone(),
		)
		.with_properties(serde_json::json!({
			"type": "experiment",
			"variationKey": assignment.variation_key,
			"method": assignment.method.as_str(),
			"experimentVersion": assignment.experiment_version,
		}))
	}

	/// Event for an experiment evaluation that assigned nothing: the
	/// experiment is unknown, not running, or the context missed its targeting.
	pub fn unassigned(experiment_key: impl Into<String>, context: &EvaluationContext) -> Self {
		Self::new(EventKind::Evaluation, experiment_key, context.clone()).with_properties(
			serde_json::json!({
				"type": "experiment",
				"variationKey": null,
			}),
		)
	}

	/// Conversion event for an experiment metric.
	pub fn conversion(
		experiment_key: impl Into<String>,
		context: &EvaluationContext,
		data: &ConversionData,
	) -> Self {
		let mut event = Self::new(EventKind::Conversion, experiment_key, context.clone())
			.with_properties(serde_json::json!({
				"metricName": data.metric_name,
				"variationKey": data.variation_key,
			}));
		event.value = data.value;
		event
	}

	/// Custom named event with arbitrary data.
	pub fn custom(
		event_name: impl Into<String>,
		context: &EvaluationContext,
		data: serde_json::Value,
	) -> Self {
		Self::new(EventKind::Custom, event_name, context.clone()).with_properties(data)
	}
}

/// Caller-supplied details of a conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionData {
	pub metric_name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<f64>,
	/// Set when the caller already knows the assigned variation.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub variation_key: Option<String>,
}

impl ConversionData {
	pub fn new(metric_name: impl Into<String>) -> Self {
		Self {
			metric_name: metric_name.into(),
			value: None,
			variation_key: None,
		}
	}

	pub fn with_value(mut self, value: f64) -> Self {
		self.value = Some(value);
		self
	}

	pub fn with_variation(mut self, variation_key: impl Into<String>) -> Self {
		self.variation_key = Some(variation_key.into());
		self
	}
}
