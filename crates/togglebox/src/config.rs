// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client configuration.
//!
//! [`ClientOptions`] carries everything the client needs at construction. It
//! can be built in code or loaded from `TOGGLEBOX_*` environment variables
//! with [`ClientOptions::from_env`].

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use togglebox_common_config::{
	load_secret_env_with, optional_env, optional_env_bool, optional_env_parse, process_env,
	SecretString,
};

use crate::error::ConfigError;

pub const DEFAULT_PLATFORM: &str = "web";
pub const DEFAULT_ENVIRONMENT: &str = "production";
pub const DEFAULT_CONFIG_VERSION: &str = "stable";
pub const DEFAULT_CACHE_PREFIX: &str = "togglebox";
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Hosted tenants live at `https://{subdomain}.togglebox.io`.
pub const CLOUD_DOMAIN: &str = "togglebox.io";

/// Definition cache settings.
#[derive(Debug, Clone)]
pub struct CacheOptions {
	/// When false, definitions are never written to or read from the cache store.
	pub enabled: bool,
	/// How long fetched definitions are considered fresh.
	pub ttl: Duration,
	/// Namespace prefix for every cache key.
	pub prefix: String,
	/// Directory for a file-backed cache. `None` keeps the cache in memory.
	pub dir: Option<PathBuf>,
}

impl Default for CacheOptions {
	fn default() -> Self {
		Self {
			enabled: true,
			ttl: DEFAULT_CACHE_TTL,
			prefix: DEFAULT_CACHE_PREFIX.to_string(),
			dir: None,
		}
	}
}

/// Telemetry settings.
#[derive(Debug, Clone)]
pub struct StatsOptions {
	pub enabled: bool,
	/// Queue length that triggers a background flush.
	pub batch_size: usize,
	/// Flush queued events when the client shuts down.
	pub flush_on_terminate: bool,
	/// Queue bound; the oldest events are dropped past it.
	pub max_queue_size: usize,
	/// Periodic flush interval. `None` flushes on batch size and shutdown only.
	pub flush_interval: Option<Duration>,
	/// Upper bound on the final flush during shutdown.
	pub shutdown_grace: Duration,
}

impl Default for StatsOptions {
	fn default() -> Self {
		Self {
			enabled: true,
			batch_size: DEFAULT_BATCH_SIZE,
			flush_on_terminate: true,
			max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
			flush_interval: None,
			shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
		}
	}
}

/// Configuration for a [`crate::ToggleBoxClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
	pub platform: String,
	pub environment: String,
	/// Self-hosted API base URL. Mutually exclusive with `tenant_subdomain`.
	pub api_url: Option<String>,
	/// ToggleBox Cloud tenant. Mutually exclusive with `api_url`.
	pub tenant_subdomain: Option<String>,
	pub api_key: Option<SecretString>,
	/// `stable`, `latest`, or a specific version label.
	pub config_version: String,
	pub cache: CacheOptions,
	pub stats: StatsOptions,
	pub request_timeout: Duration,
}

impl Default for ClientOptions {
	fn default() -> Self {
		Self {
			platform: DEFAULT_PLATFORM.to_string(),
			environment: DEFAULT_ENVIRONMENT.to_string(),
			api_url: None,
			tenant_subdomain: None,
			api_key: None,
			config_version: DEFAULT_CONFIG_VERSION.to_string(),
			cache: CacheOptions::default(),
			stats: StatsOptions::default(),
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
		}
	}
}

impl ClientOptions {
	/// Options for a self-hosted API.
	pub fn with_api_url(url: impl Into<String>) -> Self {
		Self {
			api_url: Some(url.into()),
			..Self::default()
		}
	}

	/// Options for a ToggleBox Cloud tenant.
	pub fn with_tenant_subdomain(subdomain: impl Into<String>) -> Self {
		Self {
			tenant_subdomain: Some(subdomain.into()),
			..Self::default()
		}
	}

	/// Loads options from the process environment.
	///
	/// | Variable | Default |
	/// |----------|---------|
	/// | `TOGGLEBOX_PLATFORM` | `web` |
	/// | `TOGGLEBOX_ENVIRONMENT`, then `APP_ENV` | `production` |
	/// | `TOGGLEBOX_API_URL` / `TOGGLEBOX_TENANT_SUBDOMAIN` | one required |
	/// | `TOGGLEBOX_API_KEY` / `TOGGLEBOX_API_KEY_FILE` | none |
	/// | `TOGGLEBOX_CONFIG_VERSION` | `stable` |
	/// | `TOGGLEBOX_CACHE_ENABLED` / `_TTL` (seconds) / `_PREFIX` / `_DIR` | `true` / `300` / `togglebox` / memory |
	/// | `TOGGLEBOX_STATS_ENABLED` / `_BATCH_SIZE` / `_FLUSH_ON_TERMINATE` | `true` / `20` / `true` |
	/// | `TOGGLEBOX_STATS_FLUSH_INTERVAL_MS` | off |
	/// | `TOGGLEBOX_REQUEST_TIMEOUT_MS` | `5000` |
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(&process_env)
	}

	/// Loads options through an arbitrary variable lookup.
	pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let defaults = Self::default();

		let environment = optional_env(lookup, "TOGGLEBOX_ENVIRONMENT")
			.or_else(|| optional_env(lookup, "APP_ENV"))
			.unwrap_or(defaults.environment);

		let api_key = load_secret_env_with(lookup, "TOGGLEBOX_API_KEY")
			.map_err(|e| ConfigError::invalid("TOGGLEBOX_API_KEY", e.to_string()))?;

		let cache = CacheOptions {
			enabled: optional_env_bool(lookup, "TOGGLEBOX_CACHE_ENABLED")?
				.unwrap_or(defaults.cache.enabled),
			ttl: optional_env_parse::<_, u64>(lookup, "TOGGLEBOX_CACHE_TTL")?
				.map(Duration::from_secs)
				.unwrap_or(defaults.cache.ttl),
			prefix: optional_env(lookup, "TOGGLEBOX_CACHE_PREFIX").unwrap_or(defaults.cache.prefix),
			dir: optional_env(lookup, "TOGGLEBOX_CACHE_DIR").map(PathBuf::from),
		};

		let stats = StatsOptions {
			enabled: optional_env_bool(lookup, "TOGGLEBOX_STATS_ENABLED")?
				.unwrap_or(defaults.stats.enabled),
			batch_size: optional_env_parse(lookup, "TOGGLEBOX_STATS_BATCH_SIZE")?
				.unwrap_or(defaults.stats.batch_size),
			flush_on_terminate: optional_env_bool(lookup, "TOGGLEBOX_STATS_FLUSH_ON_TERMINATE")?
				.unwrap_or(defaults.stats.flush_on_terminate),
			flush_interval: optional_env_parse::<_, u64>(lookup, "TOGGLEBOX_STATS_FLUSH_INTERVAL_MS")?
				.filter(|ms| *ms > 0)
				.map(Duration::from_millis),
			..defaults.stats
		};

		let options = Self {
			platform: optional_env(lookup, "TOGGLEBOX_PLATFORM").unwrap_or(defaults.platform),
			environment,
			api_url: optional_env(lookup, "TOGGLEBOX_API_URL"),
			tenant_subdomain: optional_env(lookup, "TOGGLEBOX_TENANT_SUBDOMAIN"),
			api_key,
			config_version: optional_env(lookup, "TOGGLEBOX_CONFIG_VERSION")
				.unwrap_or(defaults.config_version),
			cache,
			stats,
			request_timeout: optional_env_parse::<_, u64>(lookup, "TOGGLEBOX_REQUEST_TIMEOUT_MS")?
				.map(Duration::from_millis)
				.unwrap_or(defaults.request_timeout),
		};

		options.validate()?;
		Ok(options)
	}

	/// Resolves the API base URL from `api_url` or `tenant_subdomain`.
	pub fn base_url(&self) -> Result<Url, ConfigError> {
		match (self.api_url.as_deref(), self.tenant_subdomain.as_deref()) {
			(Some(_), Some(_)) => Err(ConfigError::ConflictingAddress),
			(None, None) => Err(ConfigError::MissingAddress),
			(Some(url), None) => parse_api_url(url),
			(None, Some(subdomain)) => {
				validate_subdomain(subdomain)?;
				parse_api_url(&format!("https://{subdomain}.{CLOUD_DOMAIN}"))
			}
		}
	}

	/// Checks the whole configuration.
	pub fn validate(&self) -> Result<(), ConfigError> {
		self.base_url()?;

		if self.platform.trim().is_empty() {
			return Err(ConfigError::invalid("platform", "must not be empty"));
		}
		if self.environment.trim().is_empty() {
			return Err(ConfigError::invalid("environment", "must not be empty"));
		}
		if self.config_version.trim().is_empty() {
			return Err(ConfigError::invalid("config_version", "must not be empty"));
		}
		if self.cache.ttl.is_zero() {
			return Err(ConfigError::invalid("cache.ttl", "must be at least one second"));
		}
		if self.cache.prefix.is_empty() || self.cache.prefix.contains(':') {
			return Err(ConfigError::invalid(
				"cache.prefix",
				"must be non-empty and must not contain ':'",
			));
		}
		if self.stats.batch_size == 0 {
			return Err(ConfigError::invalid("stats.batch_size", "must be at least 1"));
		}
		if self.stats.max_queue_size < self.stats.batch_size {
			return Err(ConfigError::invalid(
				"stats.max_queue_size",
				"must not be smaller than stats.batch_size",
			));
		}
		if self.request_timeout.is_zero() {
			return Err(ConfigError::invalid("request_timeout", "must be non-zero"));
		}

		Ok(())
	}
}

fn parse_api_url(raw: &str) -> Result<Url, ConfigError> {
	let url = Url::parse(raw.trim_end_matches('/'))
		.map_err(|e| ConfigError::invalid("api_url", e.to_string()))?;

	match url.scheme() {
		"http" | "https" => Ok(url),
		other => Err(ConfigError::invalid(
			"api_url",
			format!("unsupported scheme {other:?}"),
		)),
	}
}

/// Subdomains are lowercase alphanumerics and inner dashes.
fn validate_subdomain(subdomain: &str) -> Result<(), ConfigError> {
	let valid = !subdomain.is_empty()
		&& subdomain.len() <= 63
		&& !subdomain.starts_with('-')
		&& !subdomain.ends_with('-')
		&& subdomain
			.chars()
			.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

	if valid {
		Ok(())
	} else {
		Err(ConfigError::invalid(
			"tenant_subdomain",
			format!("{subdomain:?} must be lowercase letters, digits and dashes"),
		))
	}
}
