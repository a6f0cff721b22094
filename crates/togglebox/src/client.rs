// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The ToggleBox client.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use togglebox_common_http::RetryConfig;
use togglebox_core::{
	ConversionData, EvaluationContext, Event, Experiment, Flag, FlagResult, Snapshot,
	VariantAssignment,
};
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, ClearOutcome, FileCacheStore, MemoryCacheStore, NamespacedCache};
use crate::config::ClientOptions;
use crate::context::{AnonymousUser, ContextBuilder, LocaleResolver, NoLocale, UserResolver};
use crate::error::{Result, ToggleBoxError};
use crate::stats::{FlushReport, ShutdownOutcome, StatsBatcher, StatsConfig};
use crate::store::{DefinitionStore, StoreConfig};
use crate::transport::{ConfigVersion, HealthStatus, HttpTransport, Transport};

/// SDK version for identification.
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builder for constructing a [`ToggleBoxClient`].
pub struct ToggleBoxClientBuilder {
	options: ClientOptions,
	transport: Option<Arc<dyn Transport>>,
	cache_store: Option<Arc<dyn CacheStore>>,
	user: Arc<dyn UserResolver>,
	locale: Arc<dyn LocaleResolver>,
	retry_config: Option<RetryConfig>,
	strict_init: bool,
}

impl ToggleBoxClientBuilder {
	pub fn new() -> Self {
		Self {
			options: ClientOptions::default(),
			transport: None,
			cache_store: None,
			user: Arc::new(AnonymousUser),
			locale: Arc::new(NoLocale),
			retry_config: None,
			strict_init: false,
		}
	}

	pub fn options(mut self, options: ClientOptions) -> Self {
		self.options = options;
		self
	}

	/// Replaces the HTTP transport, e.g. with an in-process fake.
	pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Backing store for the definition cache.
	///
	/// Defaults to a file store when `cache.dir` is set and to an in-memory
	/// store otherwise.
	pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
		self.cache_store = Some(store);
		self
	}

	pub fn user_resolver(mut self, resolver: impl UserResolver + 'static) -> Self {
		self.user = Arc::new(resolver);
		self
	}

	pub fn locale_resolver(mut self, resolver: impl LocaleResolver + 'static) -> Self {
		self.locale = Arc::new(resolver);
		self
	}

	/// Retry policy for definition and version fetches over HTTP.
	pub fn retry_config(mut self, config: RetryConfig) -> Self {
		self.retry_config = Some(config);
		self
	}

	/// Fail `build` when the initial definition load fails.
	///
	/// Off by default: the client then starts with no definitions, every
	/// evaluation returns the caller's default, and the next evaluation
	/// retries the load in the background.
	pub fn strict_init(mut self, strict: bool) -> Self {
		self.strict_init = strict;
		self
	}

	/// Builds the client and performs the initial definition load.
	pub async fn build(self) -> Result<ToggleBoxClient> {
		let options = self.options;
		options.validate()?;

		let transport: Arc<dyn Transport> = match self.transport {
			Some(transport) => transport,
			None => {
				let http = HttpTransport::from_options(&options)?;
				debug!(api_url = %http.base_url(), "Using HTTP transport");
				Arc::new(match self.retry_config {
					Some(retry) => http.with_retry_config(retry),
					None => http,
				})
			}
		};

		let cache = options.cache.enabled.then(|| {
			let store: Arc<dyn CacheStore> = match (self.cache_store, &options.cache.dir) {
				(Some(store), _) => store,
				(None, Some(dir)) => {
					let file = FileCacheStore::new(dir.clone());
					debug!(dir = %file.dir().display(), "Using file cache");
					Arc::new(file)
				}
				(None, None) => Arc::new(MemoryCacheStore::new()),
			};
			NamespacedCache::new(store, options.cache.prefix.clone())
		});
		let cache_backend = cache.as_ref().map(|c| c.store_name()).unwrap_or("disabled");

		let store = DefinitionStore::new(
			Arc::clone(&transport),
			StoreConfig::from_options(&options),
			cache,
		);
		let stats = StatsBatcher::spawn(StatsConfig::from_options(&options), Arc::clone(&transport));

		match store.load().await {
			Ok(snapshot) => {
				debug!(version = ?snapshot.version(), "Initial definitions loaded");
			}
			Err(e) if self.strict_init => {
				stats.shutdown(options.stats.shutdown_grace).await;
				return Err(e);
			}
			Err(e) => {
				warn!(error = %e, "Initial definition load failed; evaluations use defaults until a refresh succeeds");
			}
		}

		info!(
			platform = %options.platform,
			environment = %options.environment,
			config_version = %options.config_version,
			cache = cache_backend,
			stats_enabled = options.stats.enabled,
			sdk_version = SDK_VERSION,
			"ToggleBox client initialized"
		);

		Ok(ToggleBoxClient {
			inner: Arc::new(ClientInner {
				options,
				transport,
				store,
				stats,
				user: self.user,
				locale: self.locale,
				closed: AtomicBool::new(false),
			}),
		})
	}
}

impl Default for ToggleBoxClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct ClientInner {
	options: ClientOptions,
	transport: Arc<dyn Transport>,
	store: DefinitionStore,
	stats: Arc<StatsBatcher>,
	user: Arc<dyn UserResolver>,
	locale: Arc<dyn LocaleResolver>,
	closed: AtomicBool,
}

/// Client for remote config, feature flags and experiments.
///
/// Evaluation runs locally against the last fetched definitions and never
/// fails or blocks on the network. Stale definitions are refreshed in the
/// background. Only [`refresh`](Self::refresh),
/// [`check_connection`](Self::check_connection),
/// [`flush_stats`](Self::flush_stats),
/// [`config_versions`](Self::config_versions) and
/// [`clear_cache`](Self::clear_cache) return errors.
///
/// # Example
///
/// ```ignore
/// use togglebox::{ClientOptions, ToggleBoxClient};
///
/// let client = ToggleBoxClient::builder()
///     .options(ClientOptions::from_env()?)
///     .build()
///     .await?;
///
/// let ctx = client.context().user_id("user-42").country("NZ").build();
/// if client.is_flag_enabled("new-checkout", &ctx, false) {
///     // ...
/// }
///
/// client.shutdown().await;
/// ```
#[derive(Clone)]
pub struct ToggleBoxClient {
	inner: Arc<ClientInner>,
}

impl ToggleBoxClient {
	pub fn builder() -> ToggleBoxClientBuilder {
		ToggleBoxClientBuilder::new()
	}

	pub fn options(&self) -> &ClientOptions {
		&self.inner.options
	}

	/// Starts a context from the configured user and locale resolvers.
	pub fn context(&self) -> ContextBuilder {
		ContextBuilder::new(Arc::clone(&self.inner.user), Arc::clone(&self.inner.locale))
	}

	/// The active definitions. Schedules a background refresh when stale.
	pub fn snapshot(&self) -> Arc<Snapshot> {
		if !self.is_closed() {
			self.inner.store.refresh_in_background();
		}
		self.inner.store.snapshot()
	}

	// Remote config

	/// A config value decoded as `T`, or `default` when it is missing or has
	/// another shape.
	pub fn get_config_value<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
		let snapshot = self.snapshot();
		let Some(value) = snapshot.config(key) else {
			return default;
		};

		match T::deserialize(value) {
			Ok(decoded) => decoded,
			Err(e) => {
				debug!(key, error = %e, "Config value has an unexpected shape; using default");
				default
			}
		}
	}

	pub fn get_all_configs(&self) -> BTreeMap<String, serde_json::Value> {
		self.snapshot().configs().clone()
	}

	/// Published config versions for this platform and environment.
	pub async fn config_versions(&self) -> Result<Vec<ConfigVersion>> {
		self.check_closed()?;
		let options = &self.inner.options;
		self.inner
			.transport
			.fetch_config_versions(&options.platform, &options.environment)
			.await
	}

	// Feature flags

	/// Evaluates a flag and records the evaluation.
	pub fn evaluate(&self, flag_key: &str, context: &EvaluationContext, default: bool) -> FlagResult {
		let result = self.snapshot().evaluate(flag_key, context, default);
		debug!(
			flag_key,
			enabled = result.enabled,
			source = result.source.as_str(),
			"Evaluated flag"
		);
		self.inner.stats.track(Event::flag_evaluation(&result, context));
		result
	}

	pub fn is_flag_enabled(&self, flag_key: &str, context: &EvaluationContext, default: bool) -> bool {
		self.evaluate(flag_key, context, default).enabled
	}

	/// Evaluates a known flag against its own default. `None` for unknown keys.
	pub fn get_flag(&self, flag_key: &str, context: &EvaluationContext) -> Option<FlagResult> {
		let default = self.snapshot().flag(flag_key)?.default_value;
		Some(self.evaluate(flag_key, context, default))
	}

	/// Whether flag-gated content should be shown. Unknown flags hide it.
	pub fn should_render(&self, flag_key: &str, context: &EvaluationContext) -> bool {
		self.is_flag_enabled(flag_key, context, false)
	}

	pub fn get_flags(&self) -> Vec<Flag> {
		self.snapshot().flags().cloned().collect()
	}

	pub fn get_flag_info(&self, flag_key: &str) -> Option<Flag> {
		self.snapshot().flag(flag_key).cloned()
	}

	// Experiments

	/// Assigns a variation and records the exposure.
	pub fn get_variant(
		&self,
		experiment_key: &str,
		context: &EvaluationContext,
	) -> Option<VariantAssignment> {
		let Some(assignment) = self.snapshot().assign(experiment_key, context) else {
			self.inner.stats.track(Event::unassigned(experiment_key, context));
			return None;
		};
		debug!(
			experiment_key,
			variation_key = %assignment.variation_key,
			method = assignment.method.as_str(),
			"Assigned variation"
		);
		self.inner.stats.track(Event::exposure(&assignment, context));
		Some(assignment)
	}

	pub fn in_variation(
		&self,
		experiment_key: &str,
		variation_key: &str,
		context: &EvaluationContext,
	) -> bool {
		self.get_variant(experiment_key, context)
			.is_some_and(|a| a.variation_key == variation_key)
	}

	pub fn get_experiments(&self) -> Vec<Experiment> {
		self.snapshot().experiments().cloned().collect()
	}

	pub fn get_experiment_info(&self, experiment_key: &str) -> Option<Experiment> {
		self.snapshot().experiment(experiment_key).cloned()
	}

	/// Records a conversion. The assigned variation is filled in when the
	/// caller did not supply one.
	pub fn track_conversion(
		&self,
		experiment_key: &str,
		context: &EvaluationContext,
		data: ConversionData,
	) {
		let data = match data.variation_key {
			Some(_) => data,
			None => match self.snapshot().assign(experiment_key, context) {
				Some(assignment) => data.with_variation(assignment.variation_key),
				None => data,
			},
		};
		self.inner
			.stats
			.track(Event::conversion(experiment_key, context, &data));
	}

	/// Records a custom event.
	pub fn track_event(&self, event_name: &str, context: &EvaluationContext, data: serde_json::Value) {
		self.inner.stats.track(Event::custom(event_name, context, data));
	}

	// Explicit operations

	/// Fetches definitions now. Concurrent callers share one fetch.
	pub async fn refresh(&self) -> Result<Arc<Snapshot>> {
		self.check_closed()?;
		self.inner.store.refresh().await
	}

	pub async fn flush_stats(&self) -> Result<FlushReport> {
		self.check_closed()?;
		self.inner.stats.flush().await
	}

	/// Removes cached definitions without touching unrelated cache entries.
	pub async fn clear_cache(&self) -> Result<ClearOutcome> {
		self.inner.store.clear_cache().await
	}

	pub async fn check_connection(&self) -> Result<HealthStatus> {
		self.check_closed()?;
		self.inner.transport.check_health().await
	}

	/// Stops tracking and flushes queued events within the configured grace
	/// period. Evaluation keeps working on the last definitions.
	pub async fn shutdown(&self) -> ShutdownOutcome {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return ShutdownOutcome::Skipped;
		}

		let outcome = self
			.inner
			.stats
			.shutdown(self.inner.options.stats.shutdown_grace)
			.await;
		info!(outcome = ?outcome, "ToggleBox client shutdown");
		outcome
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	fn check_closed(&self) -> Result<()> {
		if self.is_closed() {
			return Err(ToggleBoxError::ClientClosed);
		}
		Ok(())
	}
}
