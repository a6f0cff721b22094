// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Definition store: owns the active [`Snapshot`] and refreshes it.
//!
//! Readers clone an `Arc<Snapshot>` out of a read lock and evaluate without
//! holding it. A refresh builds a complete new snapshot and swaps the `Arc`,
//! so readers see either the old or the new definition set, never a mix.
//!
//! Concurrent [`DefinitionStore::refresh`] calls share one spawned fetch. The
//! fetch runs to completion even if every caller is dropped, and a failure
//! leaves the active snapshot untouched.
//!
//! After a failed fetch, background refreshes back off exponentially from
//! one second, capped at the TTL. Explicit refreshes are never held back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use togglebox_core::{DefinitionPayload, Snapshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{ClearOutcome, NamespacedCache};
use crate::config::ClientOptions;
use crate::error::{Result, ToggleBoxError};
use crate::transport::Transport;

const BACKGROUND_RETRY_BASE: Duration = Duration::from_secs(1);

type SharedRefresh =
	Shared<BoxFuture<'static, std::result::Result<Arc<Snapshot>, Arc<ToggleBoxError>>>>;

/// Which definitions to fetch and how long they stay fresh.
#[derive(Debug, Clone)]
pub struct StoreConfig {
	pub platform: String,
	pub environment: String,
	pub config_version: String,
	pub ttl: Duration,
}

impl StoreConfig {
	pub fn from_options(options: &ClientOptions) -> Self {
		Self {
			platform: options.platform.clone(),
			environment: options.environment.clone(),
			config_version: options.config_version.clone(),
			ttl: options.cache.ttl,
		}
	}

	fn cache_key(&self) -> String {
		format!(
			"definitions:{}:{}:{}",
			self.platform, self.environment, self.config_version
		)
	}
}

/// Cached definitions with the time they were fetched.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEnvelope {
	cached_at: DateTime<Utc>,
	payload: DefinitionPayload,
}

/// Consecutive failed fetches and when background loads may try again.
#[derive(Debug, Clone, Copy)]
struct FailureBackoff {
	failures: u32,
	retry_at: Instant,
}

struct StoreInner {
	transport: Arc<dyn Transport>,
	cache: Option<NamespacedCache>,
	config: StoreConfig,
	snapshot: RwLock<Arc<Snapshot>>,
	inflight: Mutex<Option<SharedRefresh>>,
	background_pending: AtomicBool,
	backoff: Mutex<Option<FailureBackoff>>,
}

/// Holds the active snapshot. Cheap to clone.
#[derive(Clone)]
pub struct DefinitionStore {
	inner: Arc<StoreInner>,
}

impl DefinitionStore {
	pub fn new(
		transport: Arc<dyn Transport>,
		config: StoreConfig,
		cache: Option<NamespacedCache>,
	) -> Self {
		Self {
			inner: Arc::new(StoreInner {
				transport,
				cache,
				config,
				snapshot: RwLock::new(Arc::new(Snapshot::empty())),
				inflight: Mutex::new(None),
				background_pending: AtomicBool::new(false),
				backoff: Mutex::new(None),
			}),
		}
	}

	/// The active snapshot.
	pub fn snapshot(&self) -> Arc<Snapshot> {
		Arc::clone(&self.inner.snapshot.read())
	}

	/// True when nothing has been loaded or the snapshot is older than the TTL.
	pub fn is_stale(&self) -> bool {
		self.inner.is_stale()
	}

	/// Fetches, validates and installs fresh definitions.
	///
	/// Callers that arrive while a fetch is in flight wait for that fetch
	/// instead of starting another.
	pub async fn refresh(&self) -> Result<Arc<Snapshot>> {
		let refresh = {
			let mut slot = self.inner.inflight.lock();
			match slot.as_ref() {
				Some(refresh) => {
					debug!("Joining in-flight definition refresh");
					refresh.clone()
				}
				None => {
					let refresh = self.spawn_refresh();
					*slot = Some(refresh.clone());
					refresh
				}
			}
		};

		refresh.await.map_err(ToggleBoxError::from_shared)
	}

	fn spawn_refresh(&self) -> SharedRefresh {
		let inner = Arc::clone(&self.inner);
		let handle = tokio::spawn(async move {
			let result = inner.fetch_and_install().await.map_err(Arc::new);
			*inner.inflight.lock() = None;
			result
		});

		async move {
			match handle.await {
				Ok(result) => result,
				Err(e) => Err(Arc::new(ToggleBoxError::TaskFailed(e.to_string()))),
			}
		}
		.boxed()
		.shared()
	}

	/// Adopts a fresh cached snapshot if there is one, otherwise refreshes.
	pub async fn load(&self) -> Result<Arc<Snapshot>> {
		if let Some(snapshot) = self.inner.read_cache().await {
			self.inner.install(Arc::clone(&snapshot));
			return Ok(snapshot);
		}
		self.refresh().await
	}

	/// Schedules a [`DefinitionStore::load`] when the snapshot is stale.
	///
	/// Returns true when a task was spawned. Outside a Tokio runtime, while a
	/// background load is already pending, or while backing off after a failed
	/// fetch, this does nothing.
	pub fn refresh_in_background(&self) -> bool {
		if !self.is_stale() || self.inner.backing_off() {
			return false;
		}

		let Ok(handle) = tokio::runtime::Handle::try_current() else {
			debug!("No Tokio runtime; skipping background refresh");
			return false;
		};

		if self.inner.background_pending.swap(true, Ordering::SeqCst) {
			return false;
		}

		let store = self.clone();
		handle.spawn(async move {
			if let Err(e) = store.load().await {
				warn!(error = %e, "Background definition refresh failed; keeping current definitions");
			}
			store.inner.background_pending.store(false, Ordering::SeqCst);
		});
		true
	}

	/// Removes this store's cached entries. The active snapshot is kept.
	pub async fn clear_cache(&self) -> Result<ClearOutcome> {
		match &self.inner.cache {
			Some(cache) => Ok(cache.clear().await?),
			None => Ok(ClearOutcome::Cleared { removed: 0 }),
		}
	}
}

impl StoreInner {
	fn is_stale(&self) -> bool {
		match self.snapshot.read().fetched_at() {
			Some(fetched_at) => Utc::now()
				.signed_duration_since(fetched_at)
				.to_std()
				.map(|age| age >= self.config.ttl)
				.unwrap_or(false),
			None => true,
		}
	}

	fn install(&self, snapshot: Arc<Snapshot>) {
		*self.snapshot.write() = snapshot;
	}

	fn backing_off(&self) -> bool {
		self
			.backoff
			.lock()
			.is_some_and(|backoff| Instant::now() < backoff.retry_at)
	}

	fn record_failure(&self) {
		let mut backoff = self.backoff.lock();
		let failures = backoff.map_or(0, |b| b.failures).saturating_add(1);
		let delay = BACKGROUND_RETRY_BASE
			.saturating_mul(1u32 << (failures - 1).min(16))
			.min(self.config.ttl);
		*backoff = Some(FailureBackoff {
			failures,
			retry_at: Instant::now() + delay,
		});
		debug!(failures, delay_ms = delay.as_millis() as u64, "Backing off background refresh");
	}

	async fn fetch_and_install(&self) -> Result<Arc<Snapshot>> {
		let result = self.fetch_and_parse().await;
		match &result {
			Ok(_) => *self.backoff.lock() = None,
			Err(_) => self.record_failure(),
		}
		result
	}

	async fn fetch_and_parse(&self) -> Result<Arc<Snapshot>> {
		let config = &self.config;
		let bytes = self
			.transport
			.fetch_definitions(&config.platform, &config.environment, &config.config_version)
			.await
			.inspect_err(|e| {
				warn!(error = %e, "Definition fetch failed; keeping current definitions");
			})?;

		let snapshot = Snapshot::parse(&bytes, Utc::now()).map_err(|e| {
			warn!(error = %e, "Rejected definition payload; keeping current definitions");
			ToggleBoxError::from(e)
		})?;

		let snapshot = Arc::new(snapshot);
		self.install(Arc::clone(&snapshot));
		self.write_cache(&snapshot).await;

		info!(
			platform = %config.platform,
			environment = %config.environment,
			version = snapshot.version().unwrap_or(config.config_version.as_str()),
			flags = snapshot.flags().count(),
			experiments = snapshot.experiments().count(),
			"Installed definitions"
		);

		Ok(snapshot)
	}

	/// Best effort. A cache failure never fails the refresh.
	async fn write_cache(&self, snapshot: &Snapshot) {
		let Some(cache) = &self.cache else {
			return;
		};
		let Some(cached_at) = snapshot.fetched_at() else {
			return;
		};

		let envelope = CacheEnvelope {
			cached_at,
			payload: snapshot.to_payload(),
		};
		let bytes = match serde_json::to_vec(&envelope) {
			Ok(bytes) => bytes,
			Err(e) => {
				warn!(error = %e, "Failed to encode definitions for the cache");
				return;
			}
		};

		if let Err(e) = cache.set(&self.config.cache_key(), bytes, self.config.ttl).await {
			warn!(error = %e, store = cache.store_name(), "Failed to write definitions to the cache");
		}
	}

	/// Misses, expired envelopes and unreadable entries all return `None`.
	async fn read_cache(&self) -> Option<Arc<Snapshot>> {
		let cache = self.cache.as_ref()?;
		let key = self.config.cache_key();

		let bytes = match cache.get(&key).await {
			Ok(Some(bytes)) => bytes,
			Ok(None) => return None,
			Err(e) => {
				warn!(error = %e, store = cache.store_name(), "Cache read failed; treating as a miss");
				return None;
			}
		};

		let snapshot = serde_json::from_slice::<CacheEnvelope>(&bytes)
			.map_err(|e| e.to_string())
			.and_then(|envelope| {
				let age = Utc::now().signed_duration_since(envelope.cached_at);
				let fresh = age
					.to_std()
					.map(|age| age < self.config.ttl)
					.unwrap_or(true);
				if !fresh {
					return Ok(None);
				}
				Snapshot::from_payload(envelope.payload, envelope.cached_at)
					.map(Some)
					.map_err(|e| e.to_string())
			});

		match snapshot {
			Ok(Some(snapshot)) => {
				debug!(key = %key, "Loaded definitions from cache");
				Some(Arc::new(snapshot))
			}
			Ok(None) => {
				debug!(key = %key, "Cached definitions expired");
				None
			}
			Err(message) => {
				warn!(key = %key, error = %message, "Discarding invalid cached definitions");
				if let Err(e) = cache.delete(&key).await {
					warn!(error = %e, "Failed to delete invalid cache entry");
				}
				None
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cache::{CacheStore, MemoryCacheStore};
	use crate::test_support::{MockTransport, PAYLOAD};
	use togglebox_core::{EvaluationContext, FlagSource};

	fn store_config(ttl: Duration) -> StoreConfig {
		StoreConfig {
			platform: "web".to_string(),
			environment: "production".to_string(),
			config_version: "stable".to_string(),
			ttl,
		}
	}

	fn store_with(
		transport: Arc<MockTransport>,
		cache: Option<NamespacedCache>,
	) -> DefinitionStore {
		DefinitionStore::new(transport, store_config(Duration::from_secs(300)), cache)
	}

	#[tokio::test]
	async fn test_starts_empty_and_stale() {
		let store = store_with(Arc::new(MockTransport::serving(PAYLOAD)), None);
		assert!(store.snapshot().is_empty());
		assert!(store.is_stale());
	}

	#[tokio::test]
	async fn test_refresh_installs_snapshot() {
		let transport = Arc::new(MockTransport::serving(PAYLOAD));
		let store = store_with(transport.clone(), None);

		let snapshot = store.refresh().await.unwrap();
		assert_eq!(snapshot.version(), Some("v7"));
		assert!(!store.is_stale());

		let ctx = EvaluationContext::new().with_user_id("user-1");
		let result = store.snapshot().evaluate("new-checkout", &ctx, false);
		assert!(result.enabled);
		assert_eq!(result.source, FlagSource::Rollout);
	}

	#[tokio::test]
	async fn test_concurrent_refreshes_share_one_fetch() {
		let transport = Arc::new(MockTransport::serving(PAYLOAD));
		let store = store_with(transport.clone(), None);

		let refreshes = (0..50).map(|_| store.refresh());
		let results = futures::future::join_all(refreshes).await;

		assert_eq!(transport.fetches(), 1);
		let first = results[0].as_ref().unwrap();
		for result in &results {
			assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
		}

		store.refresh().await.unwrap();
		assert_eq!(transport.fetches(), 2);
	}

	#[tokio::test]
	async fn test_concurrent_failures_share_one_error() {
		let transport = Arc::new(MockTransport::serving(PAYLOAD));
		transport.fail_fetches_with(503);
		let store = store_with(transport.clone(), None);

		let results = futures::future::join_all((0..10).map(|_| store.refresh())).await;
		assert_eq!(transport.fetches(), 1);
		for result in results {
			let err = result.unwrap_err();
			assert!(err.is_transient(), "{err:?}");
		}
	}

	#[tokio::test]
	async fn test_malformed_payload_keeps_current_snapshot() {
		let transport = Arc::new(MockTransport::serving(PAYLOAD));
		let store = store_with(transport.clone(), None);
		let before = store.refresh().await.unwrap();

		transport.set_body("{ not json");
		let err = store.refresh().await.unwrap_err();
		assert!(err.is_validation(), "{err:?}");
		assert!(!err.is_transient());
		assert!(Arc::ptr_eq(&before, &store.snapshot()));

		transport.set_body(
			r#"{"flags": [{"key": "a", "defaultValue": true}, {"key": "a", "defaultValue": false}]}"#,
		);
		let err = store.refresh().await.unwrap_err();
		assert!(err.is_validation());
		assert_eq!(store.snapshot().version(), Some("v7"));
	}

	#[tokio::test]
	async fn test_transport_failure_keeps_current_snapshot() {
		let transport = Arc::new(MockTransport::serving(PAYLOAD));
		let store = store_with(transport.clone(), None);
		store.refresh().await.unwrap();

		transport.fail_fetches_with(500);
		assert!(store.refresh().await.is_err());
		assert_eq!(store.snapshot().config("theme"), Some(&serde_json::json!("dark")));
	}

	#[tokio::test]
	async fn test_load_prefers_fresh_cache() {
		let cache_store = Arc::new(MemoryCacheStore::new());
		let cache = NamespacedCache::new(cache_store.clone(), "togglebox");

		let first = Arc::new(MockTransport::serving(PAYLOAD));
		store_with(first.clone(), Some(cache.clone()))
			.refresh()
			.await
			.unwrap();
		assert_eq!(cache_store.len(), 1);

		let second = Arc::new(MockTransport::serving(PAYLOAD));
		let store = store_with(second.clone(), Some(cache));
		let snapshot = store.load().await.unwrap();

		assert_eq!(second.fetches(), 0);
		assert_eq!(snapshot.version(), Some("v7"));
		assert!(snapshot.flag("new-checkout").is_some());
	}

	#[tokio::test]
	async fn test_invalid_cache_entry_is_discarded() {
		let cache_store = Arc::new(MemoryCacheStore::new());
		cache_store
			.set(
				"togglebox:definitions:web:production:stable",
				b"garbage".to_vec(),
				Duration::from_secs(60),
			)
			.await
			.unwrap();

		let transport = Arc::new(MockTransport::serving(PAYLOAD));
		let store = store_with(
			transport.clone(),
			Some(NamespacedCache::new(cache_store.clone(), "togglebox")),
		);

		let snapshot = store.load().await.unwrap();
		assert_eq!(transport.fetches(), 1);
		assert_eq!(snapshot.version(), Some("v7"));

		let cached = cache_store
			.get("togglebox:definitions:web:production:stable")
			.await
			.unwrap()
			.unwrap();
		assert_ne!(cached, b"garbage".to_vec());
	}

	#[tokio::test]
	async fn test_expired_envelope_is_a_miss() {
		let cache_store = Arc::new(MemoryCacheStore::new());
		let envelope = CacheEnvelope {
			cached_at: Utc::now() - chrono::Duration::hours(1),
			payload: DefinitionPayload::from_slice(PAYLOAD.as_bytes()).unwrap(),
		};
		cache_store
			.set(
				"togglebox:definitions:web:production:stable",
				serde_json::to_vec(&envelope).unwrap(),
				Duration::from_secs(3600),
			)
			.await
			.unwrap();

		let transport = Arc::new(MockTransport::serving(PAYLOAD));
		let store = store_with(
			transport.clone(),
			Some(NamespacedCache::new(cache_store, "togglebox")),
		);
		store.load().await.unwrap();
		assert_eq!(transport.fetches(), 1);
	}

	#[tokio::test]
	async fn test_background_refresh_collapses_duplicates() {
		let transport = Arc::new(MockTransport::serving(PAYLOAD));
		let store = store_with(transport.clone(), None);

		assert!(store.refresh_in_background());
		assert!(!store.refresh_in_background());

		tokio::time::sleep(Duration::from_millis(100)).await;
		assert_eq!(transport.fetches(), 1);
		assert!(!store.is_stale());
		assert!(!store.refresh_in_background());
	}

	#[tokio::test(start_paused = true)]
	async fn test_background_refresh_backs_off_after_failures() {
		let transport = Arc::new(MockTransport::serving(PAYLOAD));
		transport.fail_fetches_with(503);
		let store = store_with(transport.clone(), None);

		assert!(store.refresh_in_background());
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert_eq!(transport.fetches(), 1);

		// First retry waits one second.
		assert!(!store.refresh_in_background());
		tokio::time::sleep(Duration::from_millis(900)).await;
		assert!(!store.refresh_in_background());
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert!(store.refresh_in_background());
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert_eq!(transport.fetches(), 2);

		// The second waits two.
		tokio::time::sleep(Duration::from_millis(1500)).await;
		assert!(!store.refresh_in_background());
		tokio::time::sleep(Duration::from_millis(500)).await;
		assert!(store.refresh_in_background());
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert_eq!(transport.fetches(), 3);

		// An explicit refresh ignores the backoff and a success clears it.
		transport.set_body(PAYLOAD);
		store.refresh().await.unwrap();
		assert_eq!(transport.fetches(), 4);
		assert!(store.inner.backoff.lock().is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn test_backoff_is_capped_at_ttl() {
		let transport = Arc::new(MockTransport::serving(PAYLOAD));
		transport.fail_fetches_with(500);
		let store = DefinitionStore::new(
			transport.clone(),
			store_config(Duration::from_millis(1500)),
			None,
		);

		for _ in 0..4 {
			assert!(store.refresh().await.is_err());
		}
		assert!(!store.refresh_in_background());
		tokio::time::sleep(Duration::from_millis(1600)).await;
		assert!(store.refresh_in_background());
	}

	#[test]
	fn test_background_refresh_without_runtime_is_noop() {
		let store = store_with(Arc::new(MockTransport::serving(PAYLOAD)), None);
		assert!(!store.refresh_in_background());
	}

	#[tokio::test]
	async fn test_clear_cache_keeps_snapshot() {
		let cache_store = Arc::new(MemoryCacheStore::new());
		let transport = Arc::new(MockTransport::serving(PAYLOAD));
		let store = store_with(
			transport,
			Some(NamespacedCache::new(cache_store.clone(), "togglebox")),
		);
		store.refresh().await.unwrap();

		let outcome = store.clear_cache().await.unwrap();
		assert_eq!(outcome, ClearOutcome::Cleared { removed: 1 });
		assert!(cache_store.is_empty());
		assert_eq!(store.snapshot().version(), Some("v7"));
	}
}
