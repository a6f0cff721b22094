// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP client with a consistent User-Agent header.

use reqwest::{Client, ClientBuilder};
use std::time::Duration;

/// Client builder preset with the SDK User-Agent.
///
/// ```ignore
/// let client = togglebox_common_http::builder()
///     .pool_idle_timeout(Duration::from_secs(90))
///     .build()?;
/// ```
pub fn builder() -> ClientBuilder {
	Client::builder().user_agent(user_agent())
}

/// Creates a new HTTP client with a request timeout and the SDK User-Agent.
///
/// The timeout bounds the whole request, connect through body.
pub fn new_client_with_timeout(timeout: Duration) -> reqwest::Result<Client> {
	builder().timeout(timeout).connect_timeout(timeout).build()
}

/// `togglebox-rust/{version} ({os}-{arch})`, e.g. `togglebox-rust/0.1.0 (linux-x86_64)`.
pub fn user_agent() -> String {
	format!(
		"togglebox-rust/{} ({}-{})",
		env!("CARGO_PKG_VERSION"),
		std::env::consts::OS,
		std::env::consts::ARCH
	)
}
