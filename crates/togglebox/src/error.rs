// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the ToggleBox SDK.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use togglebox_common_http::{is_transient_status, RetryableError};
use togglebox_core::PayloadError;

/// Result type alias for the SDK.
pub type Result<T> = std::result::Result<T, ToggleBoxError>;

/// Errors that can occur in the ToggleBox SDK.
///
/// Evaluation and tracking never return these; only the explicit operations
/// (`refresh`, `check_connection`, `flush_stats`, `config_versions`,
/// `clear_cache`) and client construction do.
#[derive(Error, Debug)]
pub enum ToggleBoxError {
	#[error("invalid configuration: {0}")]
	Config(#[from] ConfigError),

	/// Network failure, timeout, or an unreadable response body.
	#[error("HTTP request failed: {0}")]
	RequestFailed(#[source] reqwest::Error),

	#[error("server returned an error: {status} - {message}")]
	ServerError { status: u16, message: String },

	#[error("rate limited, retry after {retry_after_secs:?} seconds")]
	RateLimited { retry_after_secs: Option<u64> },

	#[error("API key authentication failed (status {status})")]
	AuthenticationFailed { status: u16 },

	/// The definition payload failed parsing or validation.
	#[error("invalid definition payload: {0}")]
	InvalidPayload(#[from] PayloadError),

	#[error("cache error: {0}")]
	Cache(#[from] CacheError),

	#[error("stats flush failed ({requeued} requeued, {dropped} dropped): {source}")]
	StatsFlushFailed {
		requeued: usize,
		dropped: usize,
		#[source]
		source: Box<ToggleBoxError>,
	},

	#[error("background task failed: {0}")]
	TaskFailed(String),

	#[error("client has been closed")]
	ClientClosed,

	/// One outcome delivered to every caller that joined a single-flight refresh.
	#[error(transparent)]
	Shared(Arc<ToggleBoxError>),
}

impl ToggleBoxError {
	/// Network, timeout, 5xx and rate-limit failures.
	pub fn is_transient(&self) -> bool {
		match self {
			ToggleBoxError::RequestFailed(_)
			| ToggleBoxError::RateLimited { .. }
			| ToggleBoxError::TaskFailed(_) => true,
			ToggleBoxError::ServerError { status, .. } => *status >= 500 || *status == 408,
			ToggleBoxError::StatsFlushFailed { source, .. } => source.is_transient(),
			ToggleBoxError::Shared(inner) => inner.is_transient(),
			_ => false,
		}
	}

	/// Malformed or schema-invalid definition payloads.
	pub fn is_validation(&self) -> bool {
		match self {
			ToggleBoxError::InvalidPayload(_) => true,
			ToggleBoxError::Shared(inner) => inner.is_validation(),
			_ => false,
		}
	}

	/// Unwraps a shared error when this caller holds the last reference.
	pub(crate) fn from_shared(err: Arc<ToggleBoxError>) -> Self {
		match Arc::try_unwrap(err) {
			Ok(inner) => inner,
			Err(shared) => ToggleBoxError::Shared(shared),
		}
	}
}

impl RetryableError for ToggleBoxError {
	fn is_retryable(&self) -> bool {
		match self {
			ToggleBoxError::RequestFailed(e) => e.is_retryable(),
			ToggleBoxError::ServerError { status, .. } => reqwest::StatusCode::from_u16(*status)
				.map(is_transient_status)
				.unwrap_or(false),
			ToggleBoxError::RateLimited { .. } => true,
			ToggleBoxError::Shared(inner) => inner.is_retryable(),
			_ => false,
		}
	}

	fn retry_after(&self) -> Option<Duration> {
		match self {
			ToggleBoxError::RateLimited {
				retry_after_secs: Some(secs),
			} => Some(Duration::from_secs(*secs)),
			_ => None,
		}
	}
}

/// Invalid client configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
	#[error("no API address configured: set api_url or tenant_subdomain")]
	MissingAddress,

	#[error("api_url and tenant_subdomain are mutually exclusive")]
	ConflictingAddress,

	#[error("invalid value for {name}: {message}")]
	InvalidValue { name: String, message: String },
}

impl ConfigError {
	pub(crate) fn invalid(name: &str, message: impl Into<String>) -> Self {
		ConfigError::InvalidValue {
			name: name.to_string(),
			message: message.into(),
		}
	}
}

impl From<togglebox_common_config::EnvError> for ConfigError {
	fn from(err: togglebox_common_config::EnvError) -> Self {
		match err {
			togglebox_common_config::EnvError::InvalidValue { name, message } => {
				ConfigError::InvalidValue { name, message }
			}
		}
	}
}

/// Cache backend failures.
#[derive(Error, Debug)]
pub enum CacheError {
	#[error("cache I/O error at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("corrupt cache entry {key}: {message}")]
	Corrupt { key: String, message: String },

	#[error("cache backend error: {0}")]
	Backend(String),
}
