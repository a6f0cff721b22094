// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Telemetry batching and background flush.
//!
//! [`StatsBatcher::track`] never blocks on I/O and never fails. Events wait in
//! a bounded queue until the batch size is reached, the optional flush
//! interval elapses, [`StatsBatcher::flush`] is called, or the batcher shuts
//! down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use togglebox_core::Event;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ClientOptions, StatsOptions};
use crate::error::{Result, ToggleBoxError};
use crate::transport::Transport;

/// Batcher settings plus the destination of the batches.
#[derive(Debug, Clone)]
pub struct StatsConfig {
	pub platform: String,
	pub environment: String,
	pub options: StatsOptions,
}

impl StatsConfig {
	pub fn from_options(options: &ClientOptions) -> Self {
		Self {
			platform: options.platform.clone(),
			environment: options.environment.clone(),
			options: options.stats.clone(),
		}
	}
}

/// Result of a successful flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
	pub sent: usize,
}

/// What happened to queued events during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
	Flushed(FlushReport),
	/// The final flush failed; the events are lost.
	FlushFailed,
	/// The final flush did not finish within the grace period.
	TimedOut,
	/// Stats are disabled, flush on terminate is off, or shutdown already ran.
	Skipped,
}

struct QueuedEvent {
	event: Event,
	/// Failed deliveries so far. Events get one retry.
	failures: u8,
}

pub struct StatsBatcher {
	config: StatsConfig,
	transport: Arc<dyn Transport>,
	queue: Mutex<VecDeque<QueuedEvent>>,
	flush_lock: tokio::sync::Mutex<()>,
	shutdown: AtomicBool,
	flush_notify: Notify,
	worker: Mutex<Option<JoinHandle<()>>>,
}

impl StatsBatcher {
	/// Creates a batcher without a background worker.
	///
	/// A zero batch size or queue bound is raised to one.
	pub fn new(mut config: StatsConfig, transport: Arc<dyn Transport>) -> Self {
		let options = &mut config.options;
		if options.max_queue_size == 0 || options.batch_size == 0 {
			warn!(
				batch_size = options.batch_size,
				max_queue_size = options.max_queue_size,
				"Zero stats bound raised to 1"
			);
			options.max_queue_size = options.max_queue_size.max(1);
			options.batch_size = options.batch_size.max(1);
		}

		Self {
			config,
			transport,
			queue: Mutex::new(VecDeque::new()),
			flush_lock: tokio::sync::Mutex::new(()),
			shutdown: AtomicBool::new(false),
			flush_notify: Notify::new(),
			worker: Mutex::new(None),
		}
	}

	/// Creates a batcher and spawns its flush worker on the current runtime.
	pub fn spawn(config: StatsConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
		let batcher = Arc::new(Self::new(config, transport));
		if !batcher.is_enabled() {
			return batcher;
		}

		match tokio::runtime::Handle::try_current() {
			Ok(handle) => {
				let worker = Arc::clone(&batcher);
				let join = handle.spawn(async move { worker.run().await });
				*batcher.worker.lock() = Some(join);
			}
			Err(_) => {
				debug!("No Tokio runtime; stats flush only on demand");
			}
		}
		batcher
	}

	pub fn is_enabled(&self) -> bool {
		self.config.options.enabled
	}

	pub fn is_shutdown(&self) -> bool {
		self.shutdown.load(Ordering::SeqCst)
	}

	/// Number of events waiting for delivery.
	pub fn pending(&self) -> usize {
		self.queue.lock().len()
	}

	/// Queues an event.
	pub fn track(&self, event: Event) {
		if !self.is_enabled() || self.is_shutdown() {
			return;
		}

		let mut queue = self.queue.lock();
		while queue.len() >= self.config.options.max_queue_size {
			if let Some(dropped) = queue.pop_front() {
				warn!(
					subject_key = %dropped.event.subject_key,
					kind = ?dropped.event.kind,
					"Dropped event due to queue overflow"
				);
			}
		}

		queue.push_back(QueuedEvent { event, failures: 0 });

		if queue.len() >= self.config.options.batch_size {
			drop(queue);
			self.flush_notify.notify_one();
		}
	}

	/// Sends everything queued as one batch.
	///
	/// On failure, events on their first attempt go back to the front of the
	/// queue and events that already failed once are dropped.
	pub async fn flush(&self) -> Result<FlushReport> {
		let _flushing = self.flush_lock.lock().await;

		let batch = std::mem::take(&mut *self.queue.lock());
		if batch.is_empty() {
			return Ok(FlushReport::default());
		}

		let (events, failures): (Vec<Event>, Vec<u8>) =
			batch.into_iter().map(|q| (q.event, q.failures)).unzip();

		debug!(count = events.len(), "Flushing event batch");

		let config = &self.config;
		match self
			.transport
			.post_events(&config.platform, &config.environment, &events)
			.await
		{
			Ok(()) => Ok(FlushReport { sent: events.len() }),
			Err(e) => {
				let total = events.len();
				let retry: Vec<QueuedEvent> = events
					.into_iter()
					.zip(failures)
					.filter(|(_, failures)| *failures == 0)
					.map(|(event, _)| QueuedEvent { event, failures: 1 })
					.collect();
				let retried = retry.len();
				let overflow = requeue_front(&self.queue, retry, config.options.max_queue_size);
				let requeued = retried.saturating_sub(overflow);
				let dropped = total - retried + overflow;

				warn!(error = %e, requeued, dropped, "Failed to flush event batch");

				Err(ToggleBoxError::StatsFlushFailed {
					requeued,
					dropped,
					source: Box::new(e),
				})
			}
		}
	}

	/// Stops accepting events and runs the final flush within `grace`.
	pub async fn shutdown(&self, grace: Duration) -> ShutdownOutcome {
		if self.shutdown.swap(true, Ordering::SeqCst) {
			return ShutdownOutcome::Skipped;
		}

		self.flush_notify.notify_one();
		drop(self.worker.lock().take());

		if !self.is_enabled() || !self.config.options.flush_on_terminate {
			return ShutdownOutcome::Skipped;
		}

		match tokio::time::timeout(grace, self.flush()).await {
			Ok(Ok(report)) => {
				info!(sent = report.sent, "Flushed events on shutdown");
				ShutdownOutcome::Flushed(report)
			}
			Ok(Err(e)) => {
				warn!(error = %e, "Final event flush failed");
				ShutdownOutcome::FlushFailed
			}
			Err(_) => {
				warn!(
					grace_ms = grace.as_millis() as u64,
					pending = self.pending(),
					"Final event flush timed out; abandoning queued events"
				);
				ShutdownOutcome::TimedOut
			}
		}
	}

	async fn run(&self) {
		let interval = self.config.options.flush_interval;
		info!(
			batch_size = self.config.options.batch_size,
			flush_interval_ms = interval.map(|d| d.as_millis() as u64),
			"Starting stats batch processor"
		);

		loop {
			let tick = async {
				match interval {
					Some(period) => tokio::time::sleep(period).await,
					None => std::future::pending::<()>().await,
				}
			};

			tokio::select! {
				_ = tick => {}
				_ = self.flush_notify.notified() => {}
			}

			if self.is_shutdown() {
				break;
			}

			if let Err(e) = self.flush().await {
				debug!(error = %e, "Background flush failed");
			}
		}

		debug!("Stats batch processor stopped");
	}
}

/// Puts retried events back at the front of the queue, oldest first, and
/// returns how many events the queue bound pushed out.
fn requeue_front(
	queue: &Mutex<VecDeque<QueuedEvent>>,
	retry: Vec<QueuedEvent>,
	max_queue_size: usize,
) -> usize {
	let mut queue = queue.lock();
	for event in retry.into_iter().rev() {
		queue.push_front(event);
	}

	let mut dropped = 0;
	while queue.len() > max_queue_size {
		queue.pop_front();
		dropped += 1;
	}
	dropped
}
