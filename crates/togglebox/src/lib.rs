// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Remote config, feature flag and experiment SDK for ToggleBox.
//!
//! The client fetches a definitions payload for one platform and environment,
//! evaluates flags and experiments locally against it, and batches telemetry
//! back to the server.
//!
//! # Features
//!
//! - **Local Evaluation**: flags and experiments never block on the network
//! - **Single-flight Refresh**: concurrent refreshes share one fetch
//! - **Pluggable Cache**: in-memory or on-disk, scoped to the SDK's key prefix
//! - **Stats Batching**: bounded event queue with retry-once and a graceful flush
//!
//! # Example
//!
//! ```ignore
//! use togglebox::{ClientOptions, ConversionData, ToggleBoxClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ToggleBoxClient::builder()
//!         .options(ClientOptions::with_tenant_subdomain("acme"))
//!         .build()
//!         .await?;
//!
//!     let ctx = client.context().user_id("user123").country("NZ").build();
//!
//!     let theme: String = client.get_config_value("theme", "light".to_string());
//!     if client.is_flag_enabled("checkout.new_flow", &ctx, false) {
//!         // ...
//!     }
//!     if let Some(variant) = client.get_variant("pricing-page", &ctx) {
//!         println!("{} -> {}", variant.variation_key, variant.value);
//!     }
//!     client.track_conversion("pricing-page", &ctx, ConversionData::new("purchase"));
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

mod cache;
mod client;
mod config;
mod context;
mod error;
mod stats;
mod store;
mod transport;

#[cfg(test)]
mod test_support;

pub use cache::{
	CacheStore, ClearOutcome, FileCacheStore, MemoryCacheStore, NamespacedCache, PrefixDeletion,
};
pub use client::{ToggleBoxClient, ToggleBoxClientBuilder};
pub use config::{
	CacheOptions, ClientOptions, StatsOptions, CLOUD_DOMAIN, DEFAULT_BATCH_SIZE, DEFAULT_CACHE_PREFIX,
	DEFAULT_CACHE_TTL, DEFAULT_CONFIG_VERSION, DEFAULT_ENVIRONMENT, DEFAULT_MAX_QUEUE_SIZE,
	DEFAULT_PLATFORM, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SHUTDOWN_GRACE,
};
pub use context::{
	AnonymousUser, ContextBuilder, FixedUser, LocaleResolver, NoLocale, UserResolver,
};
pub use error::{CacheError, ConfigError, Result, ToggleBoxError};
pub use stats::{FlushReport, ShutdownOutcome, StatsBatcher, StatsConfig};
pub use store::{DefinitionStore, StoreConfig};
pub use transport::{ConfigVersion, HealthStatus, HttpTransport, Transport};

pub use togglebox_common_config::SecretString;
pub use togglebox_common_http::RetryConfig;

// Re-export core types for convenience
pub use togglebox_core::{
	AssignmentMethod, Condition, ConversionData, DefinitionPayload, EvaluationContext, Event,
	EventKind, Experiment, ExperimentStatus, Flag, FlagResult, FlagSource, PayloadError, Snapshot,
	TargetingRule, VariantAssignment, Variation,
};
