// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `togglebox` command line client.
//!
//! Connection settings come from the `TOGGLEBOX_*` environment variables and
//! can be overridden per invocation. Results are printed as JSON on stdout;
//! logs go to stderr.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use togglebox::{ClientOptions, ConversionData, EvaluationContext, ToggleBoxClient};
use tracing_subscriber::EnvFilter;

/// Inspect ToggleBox configs, flags and experiments.
#[derive(Parser, Debug)]
#[command(name = "togglebox", about = "ToggleBox command line client", version)]
struct Cli {
	/// API base URL (overrides TOGGLEBOX_API_URL)
	#[arg(long, global = true)]
	api_url: Option<String>,

	/// Hosted tenant subdomain (overrides TOGGLEBOX_TENANT_SUBDOMAIN)
	#[arg(long, global = true)]
	tenant: Option<String>,

	#[arg(long, global = true)]
	platform: Option<String>,

	#[arg(long, global = true)]
	environment: Option<String>,

	/// Config version to fetch, e.g. `stable` or `latest`
	#[arg(long, global = true)]
	config_version: Option<String>,

	#[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
	log_format: LogFormat,

	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
	Pretty,
	Json,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Check that the API is reachable
	Check,
	/// Evaluate a feature flag
	Flag {
		key: String,
		#[command(flatten)]
		subject: SubjectArgs,
		/// Value returned when the flag is unknown
		#[arg(long)]
		default: bool,
	},
	/// Assign an experiment variation
	Variant {
		key: String,
		#[command(flatten)]
		subject: SubjectArgs,
	},
	/// Print one config value, or all of them
	Config { key: Option<String> },
	/// List flag definitions
	Flags,
	/// List experiment definitions
	Experiments,
	/// List published config versions
	Versions,
	/// Record a conversion for an experiment
	TrackConversion {
		experiment: String,
		metric: String,
		#[arg(long)]
		value: Option<f64>,
		#[command(flatten)]
		subject: SubjectArgs,
	},
}

#[derive(Args, Debug, Default)]
struct SubjectArgs {
	#[arg(long)]
	user: Option<String>,
	#[arg(long)]
	country: Option<String>,
	/// Language code or locale, e.g. `en_NZ`
	#[arg(long)]
	language: Option<String>,
}

impl Cli {
	/// Command line values shadow the matching `TOGGLEBOX_*` variables.
	fn lookup(&self, name: &str) -> Option<String> {
		let addressed = self.api_url.is_some() || self.tenant.is_some();
		let value = match name {
			"TOGGLEBOX_API_URL" if addressed => return self.api_url.clone(),
			"TOGGLEBOX_TENANT_SUBDOMAIN" if addressed => return self.tenant.clone(),
			"TOGGLEBOX_PLATFORM" => self.platform.clone(),
			"TOGGLEBOX_ENVIRONMENT" => self.environment.clone(),
			"TOGGLEBOX_CONFIG_VERSION" => self.config_version.clone(),
			_ => None,
		};
		value.or_else(|| std::env::var(name).ok())
	}

	fn client_options(&self) -> anyhow::Result<ClientOptions> {
		let mut options = ClientOptions::from_lookup(&|name: &str| self.lookup(name))
			.context("invalid ToggleBox configuration")?;

		// Events are flushed explicitly before exit.
		options.stats.flush_interval = None;
		Ok(options)
	}
}

fn context_for(client: &ToggleBoxClient, subject: &SubjectArgs) -> EvaluationContext {
	let mut builder = client.context();
	if let Some(user) = &subject.user {
		builder = builder.user_id(user);
	}
	if let Some(country) = &subject.country {
		builder = builder.country(country);
	}
	if let Some(language) = &subject.language {
		builder = builder.language(language);
	}
	builder.build()
}

fn init_logging(format: LogFormat) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let builder = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr);

	match format {
		LogFormat::Pretty => builder.init(),
		LogFormat::Json => builder.json().init(),
	}
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

async fn run(client: &ToggleBoxClient, command: Command) -> anyhow::Result<()> {
	match command {
		Command::Check => {
			let health = client.check_connection().await?;
			print_json(&health)?;
			if !health.is_healthy() {
				anyhow::bail!("API reported status {:?}", health.status);
			}
		}
		Command::Flag {
			key,
			subject,
			default,
		} => {
			let ctx = context_for(client, &subject);
			print_json(&client.evaluate(&key, &ctx, default))?;
		}
		Command::Variant { key, subject } => {
			let ctx = context_for(client, &subject);
			print_json(&client.get_variant(&key, &ctx))?;
		}
		Command::Config { key: Some(key) } => {
			let value: Option<serde_json::Value> = client.get_config_value(&key, None);
			print_json(&value)?;
		}
		Command::Config { key: None } => print_json(&client.get_all_configs())?,
		Command::Flags => print_json(&client.get_flags())?,
		Command::Experiments => print_json(&client.get_experiments())?,
		Command::Versions => print_json(&client.config_versions().await?)?,
		Command::TrackConversion {
			experiment,
			metric,
			value,
			subject,
		} => {
			let ctx = context_for(client, &subject);
			let data = match value {
				Some(value) => ConversionData::new(metric).with_value(value),
				None => ConversionData::new(metric),
			};
			client.track_conversion(&experiment, &ctx, data);
		}
	}
	Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	init_logging(cli.log_format);

	let options = cli.client_options()?;
	let client = ToggleBoxClient::builder()
		.options(options)
		.strict_init(!matches!(cli.command, Command::Check | Command::Versions))
		.build()
		.await
		.context("failed to start ToggleBox client")?;

	let result = run(&client, cli.command).await;
	let outcome = client.shutdown().await;
	tracing::debug!(outcome = ?outcome, "client shut down");
	result
}
