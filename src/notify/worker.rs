//! Notification worker loop.
//!
//! Blocks on the queue with a short timeout, waits for a rate-limit
//! token, then calls the sink with bounded retries.  Permanent failure is
//! logged and the message is discarded; nothing is retried beyond
//! [`DeliveryPolicy::attempts`].
//!
//! Once the shutdown sentinel is posted the worker drains what is left
//! without rate limiting, one attempt per message, and abandons anything
//! still queued when [`DeliveryPolicy::drain_timeout`] runs out.

use std::time::{Duration, Instant};

use burster::Limiter;
use log::{debug, error, info, warn};

use crate::adapters::time::platform_now;
use crate::app::ports::NotificationSink;

use super::{NotificationQueue, Received};

#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    pub attempts: u32,
    /// Backoff before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
    pub recv_timeout: Duration,
    /// Token-bucket refill rate (messages per second).
    pub rate_per_sec: u64,
    pub burst: u64,
    /// Sleep between token checks while rate limited.
    pub rate_wait: Duration,
    /// Time allowed for flushing the queue after shutdown.
    pub drain_timeout: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
            recv_timeout: Duration::from_secs(1),
            rate_per_sec: 1,
            burst: 5,
            rate_wait: Duration::from_millis(100),
            drain_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub delivered: u32,
    pub failed: u32,
    pub retries: u32,
    /// Left undelivered when the drain deadline passed.
    pub abandoned: u32,
}

/// Run until the shutdown sentinel is received and the queue is drained.
pub fn run<N: NotificationSink>(
    queue: &NotificationQueue,
    mut sink: N,
    policy: DeliveryPolicy,
) -> WorkerStats {
    let mut limiter = burster::TokenBucket::new_with_time_provider(
        policy.rate_per_sec,
        policy.burst,
        platform_now as fn() -> Duration,
    );
    let mut stats = WorkerStats::default();
    let mut drain_deadline: Option<Instant> = None;
    info!("notify: worker started");

    loop {
        let msg = match queue.recv_timeout(policy.recv_timeout) {
            Received::Message(msg) => msg,
            Received::Timeout => continue,
            Received::Shutdown => break,
        };

        if !queue.is_shut_down() {
            while limiter.try_consume(1).is_err() && !queue.is_shut_down() {
                std::thread::sleep(policy.rate_wait);
            }
        }
        let attempts = if queue.is_shut_down() {
            let deadline =
                *drain_deadline.get_or_insert_with(|| Instant::now() + policy.drain_timeout);
            if Instant::now() >= deadline {
                stats.abandoned += 1;
                continue;
            }
            1
        } else {
            policy.attempts
        };

        let payload = msg.payload();
        let mut delivered = false;
        for attempt in 1..=attempts {
            match sink.deliver(&payload) {
                Ok(()) => {
                    delivered = true;
                    break;
                }
                Err(e) => {
                    warn!(
                        "notify: attempt {}/{} for {:?} failed: {}",
                        attempt, attempts, payload.severity, e
                    );
                    if attempt < attempts {
                        stats.retries += 1;
                        std::thread::sleep(policy.backoff * attempt);
                    }
                }
            }
        }

        if delivered {
            stats.delivered += 1;
            debug!("notify: delivered {:?}", payload.severity);
        } else {
            stats.failed += 1;
            error!(
                "notify: giving up on {:?} '{}' after {} attempts",
                payload.severity, payload.text, attempts
            );
        }
    }

    if stats.abandoned > 0 {
        warn!(
            "notify: drain deadline passed, {} queued message(s) abandoned",
            stats.abandoned
        );
    }
    info!(
        "notify: worker stopped (delivered={}, failed={})",
        stats.delivered, stats.failed
    );
    stats
}
