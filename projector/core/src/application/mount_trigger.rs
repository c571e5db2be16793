// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Mount Trigger
//!
//! Single-worker reconciliation loop in front of a [`MountService`]. Payload
//! events arrive on a channel; only the newest payload per key is kept; one
//! key is mounted at a time. A failed mount is requeued with per-key
//! exponential backoff, and requeues as a whole are throttled by a token
//! bucket. After `max_retries` requeues the key is dropped until a new event
//! for it arrives.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::mount_service::MountService;
use crate::domain::mounter_config::QueueConfig;
use crate::infrastructure::bundle_source::PayloadEvent;

pub const UPDATES_RECEIVED_TOTAL: &str = "projector_updates_received_total";
pub const MOUNT_FAILURES_TOTAL: &str = "projector_mount_failures_total";
pub const MOUNTS_DROPPED_TOTAL: &str = "projector_mounts_dropped_total";

/// Retry tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rate_per_second: NonZeroU32,
    pub burst: NonZeroU32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            rate_per_second: NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN),
            burst: NonZeroU32::new(100).unwrap_or(NonZeroU32::MIN),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Result<Self> {
        let rate_per_second = NonZeroU32::new(config.rate_per_second)
            .ok_or_else(|| anyhow::anyhow!("queue.rate_per_second must be greater than zero"))?;
        let burst = NonZeroU32::new(config.burst)
            .ok_or_else(|| anyhow::anyhow!("queue.burst must be greater than zero"))?;

        Ok(Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_secs(config.max_delay_secs),
            rate_per_second,
            burst,
        })
    }

    /// Delay before requeue number `requeues + 1`: `base * 2^requeues`,
    /// capped at `max_delay`.
    pub fn backoff(&self, requeues: u32) -> Duration {
        2u32.checked_pow(requeues)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// What a trigger did before its channel closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerReport {
    pub received: usize,
    /// Mounts that changed the directory
    pub mounted: usize,
    /// Mounts that found the directory already up to date
    pub unchanged: usize,
    pub failed_attempts: usize,
    /// Keys given up on, in the order they were dropped
    pub dropped: Vec<String>,
}

#[derive(Debug)]
struct PendingMount {
    event: PayloadEvent,
    requeues: u32,
    due: Instant,
    seq: u64,
}

pub struct MountTrigger {
    service: Arc<dyn MountService>,
    policy: RetryPolicy,
    limiter: DefaultDirectRateLimiter,
    queue: HashMap<String, PendingMount>,
    next_seq: u64,
    report: TriggerReport,
}

impl MountTrigger {
    pub fn new(service: Arc<dyn MountService>, policy: RetryPolicy) -> Self {
        let quota = Quota::per_second(policy.rate_per_second).allow_burst(policy.burst);
        Self {
            service,
            limiter: RateLimiter::direct(quota),
            policy,
            queue: HashMap::new(),
            next_seq: 0,
            report: TriggerReport::default(),
        }
    }

    /// Process events until `rx` is closed and every queued key has either
    /// been mounted or dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<PayloadEvent>) -> TriggerReport {
        info!(max_retries = self.policy.max_retries, "Mount trigger started");
        let mut open = true;

        loop {
            while open {
                match rx.try_recv() {
                    Ok(event) => self.enqueue(event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => open = false,
                }
            }

            let Some((key, due)) = self.next_due() else {
                if !open {
                    break;
                }
                match rx.recv().await {
                    Some(event) => self.enqueue(event),
                    None => open = false,
                }
                continue;
            };

            if due > Instant::now() {
                if open {
                    tokio::select! {
                        biased;
                        event = rx.recv() => match event {
                            Some(event) => self.enqueue(event),
                            None => open = false,
                        },
                        _ = tokio::time::sleep_until(due) => {}
                    }
                } else {
                    tokio::time::sleep_until(due).await;
                }
                continue;
            }

            if let Some(pending) = self.queue.remove(&key) {
                self.process(pending).await;
            }
        }

        info!(
            mounted = self.report.mounted,
            dropped = self.report.dropped.len(),
            "Mount trigger stopped"
        );
        self.report
    }

    fn enqueue(&mut self, event: PayloadEvent) {
        metrics::counter!(UPDATES_RECEIVED_TOTAL).increment(1);
        self.report.received += 1;

        if self.queue.contains_key(&event.key) {
            debug!(key = %event.key, "Replacing queued payload with newer one");
        }

        // A newer payload is a new desired state with a fresh retry budget
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert(
            event.key.clone(),
            PendingMount {
                event,
                requeues: 0,
                due: Instant::now(),
                seq,
            },
        );
    }

    fn next_due(&self) -> Option<(String, Instant)> {
        self.queue
            .iter()
            .min_by_key(|(_, pending)| (pending.due, pending.seq))
            .map(|(key, pending)| (key.clone(), pending.due))
    }

    async fn process(&mut self, mut pending: PendingMount) {
        let key = pending.event.key.clone();

        if pending.requeues > 0 {
            self.limiter.until_ready().await;
        }

        match self.service.mount(&key, pending.event.payload.clone()).await {
            Ok(outcome) => {
                if outcome.changed {
                    self.report.mounted += 1;
                } else {
                    self.report.unchanged += 1;
                }
            }
            Err(e) => {
                metrics::counter!(MOUNT_FAILURES_TOTAL).increment(1);
                self.report.failed_attempts += 1;

                if pending.requeues < self.policy.max_retries {
                    let delay = self.policy.backoff(pending.requeues);
                    warn!(
                        key = %key,
                        attempt = pending.requeues + 1,
                        retry_in_ms = delay.as_millis() as u64,
                        "Error syncing key: {:#}",
                        e
                    );
                    pending.requeues += 1;
                    pending.due = Instant::now() + delay;
                    self.queue.insert(key, pending);
                } else {
                    metrics::counter!(MOUNTS_DROPPED_TOTAL).increment(1);
                    error!(key = %key, "Dropping key out of the queue: {:#}", e);
                    self.report.dropped.push(key);
                }
            }
        }
    }
}
