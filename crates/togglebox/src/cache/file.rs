// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use super::{CacheStore, PrefixDeletion};
use crate::error::CacheError;

const ENTRY_SUFFIX: &str = ".cache";
const HASHED_PREFIX: &str = "sha256-";

/// Longest hex stem used as a file name. Leaves room for the temp file
/// suffix within the common 255 byte name limit.
const MAX_HEX_STEM: usize = 200;

/// One file per key under a directory.
///
/// Short keys are stored under their hex encoding, so prefix deletion can
/// recover the key from the name. Keys whose encoding would not fit in a file
/// name are stored under `sha256-<digest>` instead.
///
/// Each file starts with a header line holding the expiry (unix milliseconds)
/// and the hex-encoded key, followed by the raw value. Writes go to a uniquely
/// named temp file and are renamed into place, so concurrent writers never
/// leave a torn entry.
pub struct FileCacheStore {
	dir: PathBuf,
}

enum FileKey {
	Plain(String),
	Hashed,
}

impl FileCacheStore {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn file_stem(key: &str) -> String {
		let encoded = hex::encode(key);
		if encoded.len() <= MAX_HEX_STEM {
			encoded
		} else {
			format!("{HASHED_PREFIX}{}", hex::encode(Sha256::digest(key.as_bytes())))
		}
	}

	fn entry_path(&self, key: &str) -> PathBuf {
		self.dir.join(format!("{}{ENTRY_SUFFIX}", Self::file_stem(key)))
	}

	fn key_from_file_name(name: &str) -> Option<FileKey> {
		let stem = name.strip_suffix(ENTRY_SUFFIX)?;
		if stem.starts_with(HASHED_PREFIX) {
			return Some(FileKey::Hashed);
		}
		let bytes = hex::decode(stem).ok()?;
		String::from_utf8(bytes).ok().map(FileKey::Plain)
	}

	/// Key recorded in an entry's header. `None` if the file is gone or unreadable.
	async fn stored_key(path: &Path) -> Result<Option<String>, CacheError> {
		let raw = match tokio::fs::read(path).await {
			Ok(raw) => raw,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(io_error(path, e)),
		};
		Ok(decode_entry("", &raw).ok().map(|entry| entry.key))
	}

	async fn remove(path: &Path) -> Result<bool, CacheError> {
		match tokio::fs::remove_file(path).await {
			Ok(()) => Ok(true),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
			Err(e) => Err(io_error(path, e)),
		}
	}
}

fn io_error(path: &Path, source: std::io::Error) -> CacheError {
	CacheError::Io {
		path: path.to_path_buf(),
		source,
	}
}

struct Entry {
	expires_at_ms: i64,
	key: String,
	value: Vec<u8>,
}

fn encode_entry(key: &str, value: &[u8], expires_at_ms: i64) -> Vec<u8> {
	let mut buf = format!("{expires_at_ms} {}\n", hex::encode(key)).into_bytes();
	buf.extend_from_slice(value);
	buf
}

fn decode_entry(key: &str, raw: &[u8]) -> Result<Entry, CacheError> {
	let corrupt = |message: &str| CacheError::Corrupt {
		key: key.to_string(),
		message: message.to_string(),
	};

	let newline = raw
		.iter()
		.position(|b| *b == b'\n')
		.ok_or_else(|| corrupt("missing expiry header"))?;
	let header = std::str::from_utf8(&raw[..newline]).map_err(|_| corrupt("header is not UTF-8"))?;
	let (expiry, encoded_key) = header
		.trim()
		.split_once(' ')
		.ok_or_else(|| corrupt("header has no key"))?;
	let expires_at_ms = expiry
		.parse::<i64>()
		.map_err(|_| corrupt("expiry header is not a timestamp"))?;
	let stored_key = hex::decode(encoded_key)
		.ok()
		.and_then(|bytes| String::from_utf8(bytes).ok())
		.ok_or_else(|| corrupt("header key is not hex-encoded UTF-8"))?;

	Ok(Entry {
		expires_at_ms,
		key: stored_key,
		value: raw[newline + 1..].to_vec(),
	})
}

#[async_trait]
impl CacheStore for FileCacheStore {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
		let path = self.entry_path(key);
		let raw = match tokio::fs::read(&path).await {
			Ok(raw) => raw,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(io_error(&path, e)),
		};

		let entry = decode_entry(key, &raw)?;
		if entry.key != key {
			return Err(CacheError::Corrupt {
				key: key.to_string(),
				message: format!("entry belongs to key {:?}", entry.key),
			});
		}
		if entry.expires_at_ms <= Utc::now().timestamp_millis() {
			debug!(key, path = %path.display(), "cache entry expired");
			Self::remove(&path).await?;
			return Ok(None);
		}

		Ok(Some(entry.value))
	}

	async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
		tokio::fs::create_dir_all(&self.dir)
			.await
			.map_err(|e| io_error(&self.dir, e))?;

		let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
		let expires_at_ms = Utc::now().timestamp_millis().saturating_add(ttl_ms);

		let path = self.entry_path(key);
		let tmp_path = self
			.dir
			.join(format!("{}.{}.tmp", Self::file_stem(key), Uuid::new_v4()));

		tokio::fs::write(&tmp_path, encode_entry(key, &value, expires_at_ms))
			.await
			.map_err(|e| io_error(&tmp_path, e))?;
		if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
			let _ = tokio::fs::remove_file(&tmp_path).await;
			return Err(io_error(&path, e));
		}

		debug!(key, path = %path.display(), bytes = value.len(), "wrote cache entry");
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), CacheError> {
		Self::remove(&self.entry_path(key)).await.map(|_| ())
	}

	async fn delete_prefix(&self, prefix: &str) -> Result<PrefixDeletion, CacheError> {
		let mut entries = match tokio::fs::read_dir(&self.dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PrefixDeletion::Deleted(0)),
			Err(e) => return Err(io_error(&self.dir, e)),
		};

		let mut removed = 0;
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| io_error(&self.dir, e))?
		{
			let file_name = entry.file_name();
			let key = match file_name.to_str().and_then(Self::key_from_file_name) {
				Some(FileKey::Plain(key)) => key,
				Some(FileKey::Hashed) => match Self::stored_key(&entry.path()).await? {
					Some(key) => key,
					None => continue,
				},
				None => continue,
			};
			if key.starts_with(prefix) && Self::remove(&entry.path()).await? {
				removed += 1;
			}
		}

		Ok(PrefixDeletion::Deleted(removed))
	}

	fn name(&self) -> &'static str {
		"file"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_round_trip_and_delete() {
		let dir = TempDir::new().unwrap();
		let store = FileCacheStore::new(dir.path());

		store
			.set("togglebox:web:production", b"{\"flags\":[]}".to_vec(), Duration::from_secs(60))
			.await
			.unwrap();
		assert_eq!(
			store.get("togglebox:web:production").await.unwrap(),
			Some(b"{\"flags\":[]}".to_vec())
		);

		store.delete("togglebox:web:production").await.unwrap();
		assert_eq!(store.get("togglebox:web:production").await.unwrap(), None);
		store.delete("togglebox:web:production").await.unwrap();
	}

	#[tokio::test]
	async fn test_missing_directory_is_a_miss() {
		let dir = TempDir::new().unwrap();
		let store = FileCacheStore::new(dir.path().join("not-created"));
		assert_eq!(store.get("anything").await.unwrap(), None);
		assert_eq!(
			store.delete_prefix("togglebox:").await.unwrap(),
			PrefixDeletion::Deleted(0)
		);
	}

	#[tokio::test]
	async fn test_expired_entry_is_removed() {
		let dir = TempDir::new().unwrap();
		let store = FileCacheStore::new(dir.path());
		store.set("k", b"v".to_vec(), Duration::ZERO).await.unwrap();

		assert_eq!(store.get("k").await.unwrap(), None);
		assert!(!store.entry_path("k").exists());
	}

	#[tokio::test]
	async fn test_corrupt_entry_is_reported() {
		let dir = TempDir::new().unwrap();
		let store = FileCacheStore::new(dir.path());
		std::fs::write(store.entry_path("k"), b"not a header").unwrap();

		let err = store.get("k").await.unwrap_err();
		assert!(matches!(err, CacheError::Corrupt { ref key, .. } if key == "k"));
	}

	#[tokio::test]
	async fn test_delete_prefix_leaves_foreign_files() {
		let dir = TempDir::new().unwrap();
		let store = FileCacheStore::new(dir.path());
		let ttl = Duration::from_secs(60);
		store.set("togglebox:a", b"1".to_vec(), ttl).await.unwrap();
		store.set("togglebox:b", b"2".to_vec(), ttl).await.unwrap();
		store.set("app:session", b"3".to_vec(), ttl).await.unwrap();
		std::fs::write(dir.path().join("README"), b"unrelated").unwrap();

		let deleted = store.delete_prefix("togglebox:").await.unwrap();
		assert_eq!(deleted, PrefixDeletion::Deleted(2));
		assert_eq!(store.get("app:session").await.unwrap(), Some(b"3".to_vec()));
		assert!(dir.path().join("README").exists());
	}

	#[tokio::test]
	async fn test_long_keys_are_hashed_into_file_names() {
		let dir = TempDir::new().unwrap();
		let store = FileCacheStore::new(dir.path());
		let ttl = Duration::from_secs(60);
		let long_key = format!("togglebox:definitions:web:production:{}", "release-".repeat(40));
		let other_long_key = format!("app:{}", "x".repeat(300));

		store.set(&long_key, b"defs".to_vec(), ttl).await.unwrap();
		store.set(&other_long_key, b"other".to_vec(), ttl).await.unwrap();
		store.set("togglebox:short", b"s".to_vec(), ttl).await.unwrap();
		assert_eq!(store.get(&long_key).await.unwrap(), Some(b"defs".to_vec()));

		let names: Vec<String> = std::fs::read_dir(store.dir())
			.unwrap()
			.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
			.collect();
		assert_eq!(names.len(), 3);
		assert!(names.iter().all(|name| name.len() <= 255));
		assert_eq!(names.iter().filter(|n| n.starts_with(HASHED_PREFIX)).count(), 2);

		let deleted = store.delete_prefix("togglebox:").await.unwrap();
		assert_eq!(deleted, PrefixDeletion::Deleted(2));
		assert_eq!(store.get(&long_key).await.unwrap(), None);
		assert_eq!(store.get(&other_long_key).await.unwrap(), Some(b"other".to_vec()));
	}

	#[tokio::test]
	async fn test_entry_under_wrong_key_is_corrupt() {
		let dir = TempDir::new().unwrap();
		let store = FileCacheStore::new(dir.path());
		store.set("a", b"1".to_vec(), Duration::from_secs(60)).await.unwrap();
		std::fs::rename(store.entry_path("a"), store.entry_path("b")).unwrap();

		let err = store.get("b").await.unwrap_err();
		assert!(matches!(err, CacheError::Corrupt { ref key, .. } if key == "b"));
	}

	#[tokio::test]
	async fn test_concurrent_writers_never_tear_entries() {
		let dir = TempDir::new().unwrap();
		let store = Arc::new(FileCacheStore::new(dir.path()));

		let handles: Vec<_> = (0..16u8)
			.map(|i| {
				let store = Arc::clone(&store);
				tokio::spawn(async move {
					let value = vec![i; 4096];
					store
						.set("shared", value, Duration::from_secs(60))
						.await
						.unwrap();
				})
			})
			.collect();
		for handle in handles {
			handle.await.unwrap();
		}

		let value = store.get("shared").await.unwrap().unwrap();
		assert_eq!(value.len(), 4096);
		assert!(value.iter().all(|b| *b == value[0]));

		let leftovers = std::fs::read_dir(dir.path())
			.unwrap()
			.filter_map(|e| e.ok())
			.filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
			.count();
		assert_eq!(leftovers, 0);
	}
}
