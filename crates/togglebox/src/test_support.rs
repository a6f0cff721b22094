// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory [`Transport`] for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use togglebox_core::Event;

use crate::error::{Result, ToggleBoxError};
use crate::transport::{ConfigVersion, HealthStatus, Transport};

pub(crate) const PAYLOAD: &str = r#"{
	"version": "v7",
	"configs": {"theme": "dark", "maxItems": 25},
	"flags": [
		{"key": "new-checkout", "defaultValue": false, "rolloutPercentage": 100},
		{
			"key": "beta-banner",
			"defaultValue": false,
			"rules": [{"conditions": [{"type": "country", "operator": "in", "values": ["NZ"]}], "value": true}]
		}
	],
	"experiments": [{
		"key": "pricing-page",
		"status": "running",
		"variations": [
			{"key": "control", "weight": 50, "value": "old"},
			{"key": "treatment", "weight": 50, "value": "new"}
		],
		"overrides": {"qa-user": "treatment"}
	}]
}"#;

pub(crate) struct MockTransport {
	body: Mutex<std::result::Result<Vec<u8>, u16>>,
	fetches: AtomicUsize,
	fetch_delay: Duration,
	batches: Mutex<Vec<Vec<Event>>>,
	fail_posts: AtomicBool,
	hang_posts: AtomicBool,
}

impl MockTransport {
	pub(crate) fn serving(body: &str) -> Self {
		Self {
			body: Mutex::new(Ok(body.as_bytes().to_vec())),
			fetches: AtomicUsize::new(0),
			fetch_delay: Duration::from_millis(20),
			batches: Mutex::new(Vec::new()),
			fail_posts: AtomicBool::new(false),
			hang_posts: AtomicBool::new(false),
		}
	}

	pub(crate) fn set_body(&self, body: &str) {
		*self.body.lock() = Ok(body.as_bytes().to_vec());
	}

	pub(crate) fn fail_fetches_with(&self, status: u16) {
		*self.body.lock() = Err(status);
	}

	pub(crate) fn fetches(&self) -> usize {
		self.fetches.load(Ordering::SeqCst)
	}

	pub(crate) fn set_fail_posts(&self, fail: bool) {
		self.fail_posts.store(fail, Ordering::SeqCst);
	}

	pub(crate) fn set_hang_posts(&self, hang: bool) {
		self.hang_posts.store(hang, Ordering::SeqCst);
	}

	/// Every batch that reached the transport, including failed ones.
	pub(crate) fn batches(&self) -> Vec<Vec<Event>> {
		self.batches.lock().clone()
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn fetch_definitions(&self, _: &str, _: &str, _: &str) -> Result<Vec<u8>> {
		self.fetches.fetch_add(1, Ordering::SeqCst);
		tokio::time::sleep(self.fetch_delay).await;
		let body = self.body.lock().clone();
		body.map_err(|status| ToggleBoxError::ServerError {
			status,
			message: "mock failure".to_string(),
		})
	}

	async fn post_events(&self, _: &str, _: &str, events: &[Event]) -> Result<()> {
		if self.hang_posts.load(Ordering::SeqCst) {
			std::future::pending::<()>().await;
		}
		self.batches.lock().push(events.to_vec());
		if self.fail_posts.load(Ordering::SeqCst) {
			return Err(ToggleBoxError::ServerError {
				status: 503,
				message: "mock failure".to_string(),
			});
		}
		Ok(())
	}

	async fn check_health(&self) -> Result<HealthStatus> {
		Ok(HealthStatus {
			status: "ok".to_string(),
			uptime: Some(3600),
		})
	}

	async fn fetch_config_versions(&self, _: &str, _: &str) -> Result<Vec<ConfigVersion>> {
		Ok(vec![ConfigVersion {
			version: "v7".to_string(),
			is_stable: true,
			created_at: None,
		}])
	}
}
