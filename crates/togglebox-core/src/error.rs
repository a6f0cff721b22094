// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Errors raised while turning a definition payload into a [`crate::Snapshot`].
///
/// Every variant means the payload was rejected as a whole; callers keep
/// whatever snapshot they already had.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
	#[error("definition payload is not valid JSON: {0}")]
	Parse(String),

	#[error("unsupported rules schema version {found} (supported up to {supported})")]
	UnsupportedSchema { found: u32, supported: u32 },

	#[error("invalid key: {0:?}")]
	InvalidKey(String),

	#[error("duplicate flag key: {0}")]
	DuplicateFlagKey(String),

	#[error("duplicate experiment key: {0}")]
	DuplicateExperimentKey(String),

	#[error("flag {flag_key}: rollout percentage {percentage} is out of range 0-100")]
	RolloutOutOfRange { flag_key: String, percentage: u32 },

	#[error("experiment {experiment_key}: duplicate variation key {variation_key}")]
	DuplicateVariationKey {
		experiment_key: String,
		variation_key: String,
	},

	#[error("experiment {experiment_key}: override for user {user_id} targets unknown variation {variation_key}")]
	UnknownOverrideVariation {
		experiment_key: String,
		user_id: String,
		variation_key: String,
	},
}

impl From<serde_json::Error> for PayloadError {
	fn from(err: serde_json::Error) -> Self {
		PayloadError::Parse(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, PayloadError>;
