// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Configuration primitives for the ToggleBox SDK.
//!
//! - [`Secret<T>`]: a wrapper that keeps the API key out of logs and dumps
//! - [`load_secret_env`]: loads a secret from `VAR` or the file named by `VAR_FILE`
//! - typed environment readers ([`optional_env`], [`optional_env_parse`],
//!   [`optional_env_bool`]) over any lookup function, so configuration can be
//!   loaded from the process environment or from a map in tests

pub mod env;
pub mod secret;

pub use env::{
	load_secret_env, load_secret_env_with, optional_env, optional_env_bool, optional_env_parse,
	parse_bool, process_env, EnvError, SecretEnvError,
};
pub use secret::{Secret, SecretString, REDACTED};
