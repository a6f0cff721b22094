// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pluggable cache for fetched definitions.
//!
//! The SDK only depends on the [`CacheStore`] capability set. Stores are
//! shared with other applications, so the trait deliberately has no global
//! flush; [`NamespacedCache::clear`] scopes deletion to the SDK's prefix or
//! reports [`ClearOutcome::Degraded`].

mod file;
mod memory;
mod namespaced;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;

pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;
pub use namespaced::NamespacedCache;

/// Result of a prefix-scoped deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixDeletion {
	/// Number of entries removed.
	Deleted(usize),
	/// The store cannot enumerate keys by prefix.
	Unsupported,
}

/// Result of [`NamespacedCache::clear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
	Cleared { removed: usize },
	/// The store could not scope the clear, so nothing was removed.
	Degraded,
}

/// A key/value byte store with per-entry TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
	/// Returns `None` for missing or expired entries.
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

	async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

	async fn delete(&self, key: &str) -> Result<(), CacheError>;

	/// Deletes every entry whose key starts with `prefix`.
	async fn delete_prefix(&self, _prefix: &str) -> Result<PrefixDeletion, CacheError> {
		Ok(PrefixDeletion::Unsupported)
	}

	/// Short backend name for logs.
	fn name(&self) -> &'static str;
}
