// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{CacheStore, PrefixDeletion};
use crate::error::CacheError;

/// Cap for TTLs that would overflow the clock.
const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

struct Entry {
	value: Vec<u8>,
	expires_at: Instant,
}

/// In-process cache store. Expired entries are evicted lazily on read.
#[derive(Default)]
pub struct MemoryCacheStore {
	entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCacheStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of live entries.
	pub fn len(&self) -> usize {
		let now = Instant::now();
		self.entries
			.lock()
			.values()
			.filter(|e| e.expires_at > now)
			.count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
		let mut entries = self.entries.lock();
		match entries.get(key) {
			Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
			Some(_) => {
				entries.remove(key);
				Ok(None)
			}
			None => Ok(None),
		}
	}

	async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
		let now = Instant::now();
		let entry = Entry {
			value,
			expires_at: now.checked_add(ttl).unwrap_or(now + MAX_TTL),
		};
		self.entries.lock().insert(key.to_string(), entry);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), CacheError> {
		self.entries.lock().remove(key);
		Ok(())
	}

	async fn delete_prefix(&self, prefix: &str) -> Result<PrefixDeletion, CacheError> {
		let mut entries = self.entries.lock();
		let before = entries.len();
		entries.retain(|key, _| !key.starts_with(prefix));
		Ok(PrefixDeletion::Deleted(before - entries.len()))
	}

	fn name(&self) -> &'static str {
		"memory"
	}
}
