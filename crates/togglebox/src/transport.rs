// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP transport to the ToggleBox API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use togglebox_common_config::SecretString;
use togglebox_common_http::RetryConfig;
use togglebox_core::{Event, PayloadError};
use tracing::{debug, error};

use crate::config::ClientOptions;
use crate::error::{ConfigError, Result, ToggleBoxError};

const API_KEY_HEADER: &str = "X-API-Key";

/// Response of the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
	pub status: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub uptime: Option<u64>,
}

impl HealthStatus {
	pub fn is_healthy(&self) -> bool {
		matches!(self.status.as_str(), "ok" | "healthy")
	}
}

/// A published configuration version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigVersion {
	pub version: String,
	#[serde(default)]
	pub is_stable: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_at: Option<String>,
}

/// The backend operations the SDK depends on.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Raw definition payload for `version` (`stable`, `latest`, or a label).
	async fn fetch_definitions(
		&self,
		platform: &str,
		environment: &str,
		version: &str,
	) -> Result<Vec<u8>>;

	/// Delivers one batch of telemetry events.
	async fn post_events(&self, platform: &str, environment: &str, events: &[Event]) -> Result<()>;

	async fn check_health(&self) -> Result<HealthStatus>;

	async fn fetch_config_versions(
		&self,
		platform: &str,
		environment: &str,
	) -> Result<Vec<ConfigVersion>>;
}

#[derive(Serialize)]
struct EventBatch<'a> {
	events: &'a [Event],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VersionsResponse {
	List(Vec<ConfigVersion>),
	Wrapped { versions: Vec<ConfigVersion> },
}

/// [`Transport`] over HTTPS with `reqwest`.
///
/// Definition and version fetches are retried with backoff. Event posts and
/// health checks are single attempt.
pub struct HttpTransport {
	http: Client,
	base_url: Url,
	api_key: Option<SecretString>,
	retry_config: RetryConfig,
}

impl HttpTransport {
	pub fn new(base_url: Url, api_key: Option<SecretString>, timeout: Duration) -> Result<Self> {
		let http = togglebox_common_http::new_client_with_timeout(timeout)
			.map_err(ToggleBoxError::RequestFailed)?;

		Ok(Self {
			http,
			base_url,
			api_key,
			retry_config: RetryConfig::default(),
		})
	}

	pub fn from_options(options: &ClientOptions) -> Result<Self> {
		Self::new(
			options.base_url()?,
			options.api_key.clone(),
			options.request_timeout,
		)
	}

	pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
		self.retry_config = retry_config;
		self
	}

	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Appends percent-encoded path segments to the base URL.
	fn endpoint(&self, segments: &[&str]) -> Result<Url> {
		let mut url = self.base_url.clone();
		url.path_segments_mut()
			.map_err(|_| ConfigError::invalid("api_url", "URL cannot carry a path"))?
			.pop_if_empty()
			.extend(segments);
		Ok(url)
	}

	fn environment_endpoint(&self, platform: &str, environment: &str, tail: &[&str]) -> Result<Url> {
		let mut segments = vec!["api", "v1", "platforms", platform, "environments", environment];
		segments.extend_from_slice(tail);
		self.endpoint(&segments)
	}

	fn request(&self, method: Method, url: Url) -> RequestBuilder {
		let builder = self.http.request(method, url);
		match &self.api_key {
			Some(key) => builder.header(API_KEY_HEADER, key.expose().as_str()),
			None => builder,
		}
	}

	async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>> {
		let response = self
			.request(Method::GET, url.clone())
			.send()
			.await
			.map_err(ToggleBoxError::RequestFailed)?;
		let response = check_status(response).await?;
		let body = response.bytes().await.map_err(ToggleBoxError::RequestFailed)?;
		Ok(body.to_vec())
	}
}

/// Maps non-success statuses onto SDK errors.
async fn check_status(response: Response) -> Result<Response> {
	let status = response.status();
	if status.is_success() {
		return Ok(response);
	}

	match status {
		StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
			Err(ToggleBoxError::AuthenticationFailed {
				status: status.as_u16(),
			})
		}
		StatusCode::TOO_MANY_REQUESTS => {
			let retry_after = response
				.headers()
				.get("Retry-After")
				.and_then(|v| v.to_str().ok())
				.and_then(|s| s.trim().parse().ok());
			Err(ToggleBoxError::RateLimited {
				retry_after_secs: retry_after,
			})
		}
		_ => {
			let status = status.as_u16();
			let message = response.text().await.unwrap_or_default();
			error!(status, message = %message, "ToggleBox API request failed");
			Err(ToggleBoxError::ServerError { status, message })
		}
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn fetch_definitions(
		&self,
		platform: &str,
		environment: &str,
		version: &str,
	) -> Result<Vec<u8>> {
		let mut url = self.environment_endpoint(platform, environment, &["definitions"])?;
		url.query_pairs_mut().append_pair("version", version);

		debug!(url = %url, "Fetching definitions");

		let body = togglebox_common_http::retry(&self.retry_config, || self.get_bytes(&url)).await?;

		debug!(bytes = body.len(), "Fetched definitions");
		Ok(body)
	}

	async fn post_events(&self, platform: &str, environment: &str, events: &[Event]) -> Result<()> {
		let url = self.environment_endpoint(platform, environment, &["stats", "events"])?;

		debug!(url = %url, count = events.len(), "Posting events");

		let response = self
			.request(Method::POST, url)
			.json(&EventBatch { events })
			.send()
			.await
			.map_err(ToggleBoxError::RequestFailed)?;
		check_status(response).await?;

		Ok(())
	}

	async fn check_health(&self) -> Result<HealthStatus> {
		let url = self.endpoint(&["health"])?;
		let body = self.get_bytes(&url).await?;
		let health = serde_json::from_slice(&body).map_err(PayloadError::from)?;
		Ok(health)
	}

	async fn fetch_config_versions(
		&self,
		platform: &str,
		environment: &str,
	) -> Result<Vec<ConfigVersion>> {
		let url = self.environment_endpoint(platform, environment, &["versions"])?;

		debug!(url = %url, "Fetching config versions");

		let body = togglebox_common_http::retry(&self.retry_config, || self.get_bytes(&url)).await?;
		let response: VersionsResponse = serde_json::from_slice(&body).map_err(PayloadError::from)?;
		let versions = match response {
			VersionsResponse::List(versions) => versions,
			VersionsResponse::Wrapped { versions } => versions,
		};
		Ok(versions)
	}
}
