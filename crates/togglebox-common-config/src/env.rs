// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Environment variable helpers.
//!
//! Every reader takes a lookup function instead of reading the process
//! environment directly; [`process_env`] is the lookup for `std::env`. Empty
//! values count as unset.

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::Secret;

/// Errors that can occur when loading secrets from environment variables.
#[derive(Debug, Error)]
pub enum SecretEnvError {
	#[error("failed to read secret file at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("secret file path in {var} is empty")]
	EmptyPath { var: String },
}

/// Errors from typed environment readers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
	#[error("invalid value for {name}: {message}")]
	InvalidValue { name: String, message: String },
}

/// Lookup over the process environment.
pub fn process_env(name: &str) -> Option<String> {
	std::env::var(name).ok()
}

/// Reads a variable, treating empty and whitespace-only values as unset.
pub fn optional_env<F>(lookup: &F, name: &str) -> Option<String>
where
	F: Fn(&str) -> Option<String>,
{
	lookup(name)
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty())
}

/// Reads and parses a variable.
pub fn optional_env_parse<F, T>(lookup: &F, name: &str) -> Result<Option<T>, EnvError>
where
	F: Fn(&str) -> Option<String>,
	T: FromStr,
	T::Err: std::fmt::Display,
{
	match optional_env(lookup, name) {
		Some(val) => val
			.parse()
			.map(Some)
			.map_err(|e: T::Err| EnvError::InvalidValue {
				name: name.to_string(),
				message: e.to_string(),
			}),
		None => Ok(None),
	}
}

/// Reads a boolean variable. See [`parse_bool`] for the accepted spellings.
pub fn optional_env_bool<F>(lookup: &F, name: &str) -> Result<Option<bool>, EnvError>
where
	F: Fn(&str) -> Option<String>,
{
	optional_env(lookup, name)
		.map(|v| parse_bool(name, &v))
		.transpose()
}

/// Parses `true/false/1/0/yes/no/on/off`, case-insensitively.
pub fn parse_bool(name: &str, value: &str) -> Result<bool, EnvError> {
	match value.trim().to_ascii_lowercase().as_str() {
		"true" | "1" | "yes" | "on" => Ok(true),
		"false" | "0" | "no" | "off" => Ok(false),
		other => Err(EnvError::InvalidValue {
			name: name.to_string(),
			message: format!("expected a boolean, got {other:?}"),
		}),
	}
}

/// Load a secret using the `VAR` / `VAR_FILE` convention.
///
/// # Precedence
///
/// 1. If `{var}_FILE` is set, read the secret from that file path
/// 2. Otherwise, if `{var}` is set, use its value directly
/// 3. Otherwise, return `Ok(None)`
///
/// A single trailing newline is stripped from file contents.
pub fn load_secret_env_with<F>(lookup: &F, var: &str) -> Result<Option<Secret<String>>, SecretEnvError>
where
	F: Fn(&str) -> Option<String>,
{
	let file_var = format!("{var}_FILE");

	if let Some(path_str) = lookup(&file_var) {
		if path_str.trim().is_empty() {
			return Err(SecretEnvError::EmptyPath { var: file_var });
		}

		let path = PathBuf::from(&path_str);
		let content = fs::read_to_string(&path).map_err(|e| SecretEnvError::Io {
			path: path.clone(),
			source: e,
		})?;

		let secret = content.strip_suffix('\n').unwrap_or(&content).to_string();
		return Ok(Some(Secret::new(secret)));
	}

	Ok(optional_env(lookup, var).map(Secret::new))
}

/// [`load_secret_env_with`] over the process environment.
///
/// ```no_run
/// use togglebox_common_config::load_secret_env;
///
/// if let Some(key) = load_secret_env("TOGGLEBOX_API_KEY")? {
///     println!("API key configured: {}", key); // prints "[REDACTED]"
/// }
/// # Ok::<(), togglebox_common_config::SecretEnvError>(())
/// ```
pub fn load_secret_env(var: &str) -> Result<Option<Secret<String>>, SecretEnvError> {
	load_secret_env_with(&process_env, var)
}
