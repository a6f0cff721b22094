// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{CacheStore, ClearOutcome, PrefixDeletion};
use crate::error::CacheError;

/// Prefixes every key with `"{prefix}:"` over a shared [`CacheStore`].
#[derive(Clone)]
pub struct NamespacedCache {
	store: Arc<dyn CacheStore>,
	prefix: String,
}

impl NamespacedCache {
	pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
		Self {
			store,
			prefix: prefix.into(),
		}
	}

	pub fn store_name(&self) -> &'static str {
		self.store.name()
	}

	fn namespaced(&self, key: &str) -> String {
		format!("{}:{key}", self.prefix)
	}

	pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
		self.store.get(&self.namespaced(key)).await
	}

	pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
		self.store.set(&self.namespaced(key), value, ttl).await
	}

	pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
		self.store.delete(&self.namespaced(key)).await
	}

	/// Removes every entry under this namespace.
	///
	/// Never falls back to flushing the whole store. When the store cannot
	/// delete by prefix, nothing is removed and [`ClearOutcome::Degraded`] is
	/// returned.
	pub async fn clear(&self) -> Result<ClearOutcome, CacheError> {
		let scope = format!("{}:", self.prefix);
		match self.store.delete_prefix(&scope).await? {
			PrefixDeletion::Deleted(removed) => {
				debug!(prefix = %self.prefix, store = self.store.name(), removed, "cleared cache namespace");
				Ok(ClearOutcome::Cleared { removed })
			}
			PrefixDeletion::Unsupported => {
				warn!(
					prefix = %self.prefix,
					store = self.store.name(),
					"Cache store cannot delete by prefix; clear skipped to protect unrelated keys"
				);
				Ok(ClearOutcome::Degraded)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cache::MemoryCacheStore;
	use async_trait::async_trait;
	use parking_lot::Mutex;
	use std::collections::HashMap;

	/// A store like a plain key/value server without key scanning.
	#[derive(Default)]
	struct FlatStore {
		entries: Mutex<HashMap<String, Vec<u8>>>,
	}

	#[async_trait]
	impl CacheStore for FlatStore {
		async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
			Ok(self.entries.lock().get(key).cloned())
		}

		async fn set(&self, key: &str, value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
			self.entries.lock().insert(key.to_string(), value);
			Ok(())
		}

		async fn delete(&self, key: &str) -> Result<(), CacheError> {
			self.entries.lock().remove(key);
			Ok(())
		}

		fn name(&self) -> &'static str {
			"flat"
		}
	}

	#[tokio::test]
	async fn test_keys_are_prefixed() {
		let store = Arc::new(MemoryCacheStore::new());
		let cache = NamespacedCache::new(store.clone(), "togglebox");

		cache
			.set("definitions", b"x".to_vec(), Duration::from_secs(60))
			.await
			.unwrap();

		assert_eq!(
			store.get("togglebox:definitions").await.unwrap(),
			Some(b"x".to_vec())
		);
		assert_eq!(cache.get("definitions").await.unwrap(), Some(b"x".to_vec()));

		cache.delete("definitions").await.unwrap();
		assert!(store.get("togglebox:definitions").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_clear_is_scoped_to_namespace() {
		let store = Arc::new(MemoryCacheStore::new());
		let cache = NamespacedCache::new(store.clone(), "togglebox");
		let ttl = Duration::from_secs(60);

		cache.set("a", b"1".to_vec(), ttl).await.unwrap();
		cache.set("b", b"2".to_vec(), ttl).await.unwrap();
		store.set("togglebox-other:a", b"3".to_vec(), ttl).await.unwrap();
		store.set("users:42", b"4".to_vec(), ttl).await.unwrap();

		assert_eq!(cache.clear().await.unwrap(), ClearOutcome::Cleared { removed: 2 });
		assert!(store.get("togglebox-other:a").await.unwrap().is_some());
		assert!(store.get("users:42").await.unwrap().is_some());
	}

	#[tokio::test]
	async fn test_clear_without_prefix_support_is_degraded() {
		let store = Arc::new(FlatStore::default());
		store
			.set("users:42", b"unrelated".to_vec(), Duration::from_secs(60))
			.await
			.unwrap();

		let cache = NamespacedCache::new(store.clone(), "togglebox");
		cache
			.set("definitions", b"x".to_vec(), Duration::from_secs(60))
			.await
			.unwrap();

		assert_eq!(cache.clear().await.unwrap(), ClearOutcome::Degraded);
		assert_eq!(
			store.get("users:42").await.unwrap(),
			Some(b"unrelated".to_vec())
		);
	}
}
