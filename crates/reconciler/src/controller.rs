//! Work-queue controller with requeue backoff.
//!
//! Keys arrive from the store's watch channel and from [`Controller::enqueue`].
//! The queue deduplicates them, so a key is reconciled at most once per
//! round. Distinct keys in a round run concurrently; a key is never in two
//! reconciles at once.

use crate::engine::{Outcome, Reconciler};
use deployer::{CancelToken, ObjectKey};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};

/// Longest sleep between checks for cancellation and new events
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Exponential backoff for failed reconciles.
#[derive(Debug, Clone)]
pub struct RequeuePolicy {
    /// Attempts per key before it is reported as failed
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
    /// Upper bound on a single delay
    pub max_delay: Duration,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RequeuePolicy {
    /// Policy with the default delay cap
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// A policy that reports the first failure
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Result of [`Controller::run_until_idle`]
#[derive(Debug, Clone, Default)]
pub struct ControllerSummary {
    /// Successful reconcile passes
    pub reconciled: usize,
    /// Last outcome per key that reconciled successfully
    pub outcomes: BTreeMap<ObjectKey, Outcome>,
    /// Keys that exhausted their attempts, with the last error
    pub failed: BTreeMap<ObjectKey, String>,
    /// The run stopped because the token fired
    pub cancelled: bool,
}

impl ControllerSummary {
    /// No key failed and the run was not cancelled
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

/// Drives a [`Reconciler`] from a deduplicating work queue
#[derive(Debug)]
pub struct Controller {
    reconciler: Reconciler,
    policy: RequeuePolicy,
    timeout: Option<Duration>,
    pool: rayon::ThreadPool,
    events: Receiver<ObjectKey>,
    /// Pending keys and the earliest time each may run
    queue: BTreeMap<ObjectKey, Instant>,
    attempts: HashMap<ObjectKey, u32>,
    /// Earliest retry time of keys backing off after a failure
    retry_at: HashMap<ObjectKey, Instant>,
}

impl Controller {
    /// Create a controller running up to `jobs` reconciles at once
    ///
    /// Subscribes to the reconciler's store immediately, so writes made
    /// after this call are picked up by the next run.
    pub fn new(reconciler: Reconciler, jobs: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.max(1))
            .thread_name(|i| format!("reconcile-{i}"))
            .build()?;
        let events = reconciler.store().subscribe();
        Ok(Self {
            reconciler,
            policy: RequeuePolicy::default(),
            timeout: None,
            pool,
            events,
            queue: BTreeMap::new(),
            attempts: HashMap::new(),
            retry_at: HashMap::new(),
        })
    }

    /// Replace the requeue policy
    #[must_use]
    pub fn with_policy(mut self, policy: RequeuePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound each reconcile pass by `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Queue `key` to run as soon as possible
    pub fn enqueue(&mut self, key: ObjectKey) {
        self.schedule(key, Instant::now());
    }

    /// Queue every key in `keys`
    pub fn enqueue_all(&mut self, keys: impl IntoIterator<Item = ObjectKey>) {
        for key in keys {
            self.enqueue(key);
        }
    }

    /// Number of keys waiting, including those backing off
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Process the queue until it is empty or `cancel` fires
    ///
    /// Writes made by the reconciles themselves feed back through the watch
    /// channel, so this returns once every queued object has settled.
    pub fn run_until_idle(&mut self, cancel: &CancelToken) -> ControllerSummary {
        let mut summary = ControllerSummary::default();

        loop {
            self.drain_events();
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let now = Instant::now();
            let batch = self.take_ready(now);
            if batch.is_empty() {
                match self.queue.values().min() {
                    Some(due) => thread::sleep(due.saturating_duration_since(now).min(IDLE_POLL)),
                    None => break,
                }
                continue;
            }

            log::debug!("Reconciling {} object(s)", batch.len());
            for (key, result) in self.run_batch(batch, cancel) {
                match result {
                    Ok(outcome) => {
                        self.attempts.remove(&key);
                        self.retry_at.remove(&key);
                        summary.failed.remove(&key);
                        summary.reconciled += 1;
                        summary.outcomes.insert(key, outcome);
                    }
                    Err(e) => {
                        let attempt = self.attempts.entry(key.clone()).or_insert(0);
                        *attempt += 1;
                        let attempt = *attempt;

                        if e.category().is_retryable() && attempt < self.policy.max_attempts {
                            let delay = self.policy.delay_for_attempt(attempt - 1);
                            log::warn!(
                                "Attempt {attempt}/{} for {key} failed: {e}. Retrying in {delay:?}",
                                self.policy.max_attempts
                            );
                            let at = Instant::now() + delay;
                            self.retry_at.insert(key.clone(), at);
                            self.schedule(key, at);
                        } else {
                            log::error!("{}: {e}", e.category());
                            self.attempts.remove(&key);
                            self.retry_at.remove(&key);
                            summary.outcomes.remove(&key);
                            summary.failed.insert(key, e.to_string());
                        }
                    }
                }
            }
        }

        summary
    }

    fn run_batch(
        &self,
        batch: Vec<ObjectKey>,
        cancel: &CancelToken,
    ) -> Vec<(ObjectKey, crate::Result<Outcome>)> {
        let reconciler = &self.reconciler;
        let timeout = self.timeout;
        self.pool.install(|| {
            batch
                .into_par_iter()
                .map(|key| {
                    let token = match timeout {
                        Some(timeout) => cancel.child_with_timeout(timeout),
                        None => cancel.child(),
                    };
                    let result = reconciler.reconcile(&key, &token);
                    (key, result)
                })
                .collect()
        })
    }

    fn schedule(&mut self, key: ObjectKey, at: Instant) {
        self.queue
            .entry(key)
            .and_modify(|due| *due = (*due).min(at))
            .or_insert(at);
    }

    /// Schedule keys written since the last drain
    ///
    /// A key backing off keeps its retry time, so writes made by the failed
    /// pass itself do not trigger an immediate retry.
    fn drain_events(&mut self) {
        let now = Instant::now();
        let keys: Vec<ObjectKey> = self.events.try_iter().collect();
        for key in keys {
            let at = self.retry_at.get(&key).map_or(now, |at| (*at).max(now));
            self.schedule(key, at);
        }
    }

    fn take_ready(&mut self, now: Instant) -> Vec<ObjectKey> {
        let ready: Vec<ObjectKey> = self
            .queue
            .iter()
            .filter(|(_, due)| **due <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &ready {
            self.queue.remove(key);
        }
        ready
    }
}
