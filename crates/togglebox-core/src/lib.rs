// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types and the evaluation engine for the ToggleBox SDK.
//!
//! This crate holds the definition model (configs, flags, experiments), the
//! targeting rule language, payload validation and the pure evaluation engine.
//! It performs no I/O; the `togglebox` client crate fetches, caches and swaps
//! the [`Snapshot`] that evaluation reads from.
//!
//! # Overview
//!
//! - Boolean flags with ordered targeting rules and a percentage rollout
//! - Weighted multi-variant experiments with per-user overrides
//! - Deterministic bucketing with murmur3, stable across processes
//! - Telemetry [`Event`]s for evaluations, conversions and custom events
//!
//! # Example
//!
//! ```
//! use togglebox_core::{DefinitionPayload, EvaluationContext, Flag, FlagSource, Snapshot};
//!
//! let payload = DefinitionPayload {
//!     flags: vec![Flag::new("checkout.new_flow", false).with_rollout(100)],
//!     ..Default::default()
//! };
//! let snapshot = Snapshot::from_payload(payload, chrono::Utc::now()).unwrap();
//!
//! let ctx = EvaluationContext::new()
//!     .with_user_id("user123")
//!     .with_language("en_US");
//!
//! let result = snapshot.evaluate("checkout.new_flow", &ctx, false);
//! assert!(result.enabled);
//! assert_eq!(result.source, FlagSource::Rollout);
//! ```

pub mod context;
pub mod error;
pub mod evaluation;
pub mod event;
pub mod experiment;
pub mod flag;
pub mod snapshot;
pub mod targeting;

pub use context::{normalize_language, EvaluationContext, ANONYMOUS_ID};
pub use error::{PayloadError, Result};
pub use evaluation::{
	assign_variant, evaluate_flag, hash_key, in_rollout, rollout_bucket, AssignmentMethod,
	FlagResult, FlagSource, VariantAssignment,
};
pub use event::{ConversionData, Event, EventKind};
pub use experiment::{Experiment, ExperimentStatus, Variation};
pub use flag::{Flag, TargetingRule, MAX_KEY_LEN};
pub use snapshot::{DefinitionPayload, Snapshot};
pub use targeting::{AttributeOperator, Condition, ListOperator, RULES_SCHEMA_VERSION};
