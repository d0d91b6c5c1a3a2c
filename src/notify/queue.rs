//! Bounded, severity-aware notification queue.
//!
//! ## Admission when full
//!
//! | Incoming          | Action                                                   |
//! |-------------------|----------------------------------------------------------|
//! | INFO / ALL_CLEAR  | dropped, warning logged                                  |
//! | WARNING/CRITICAL  | evict the lowest-ranked, oldest message ranked below it  |
//! |                   | none evictable → dropped, error logged                   |
//!
//! The queue lock is a leaf: nothing else is acquired while it is held.

use std::time::{Duration, Instant};

use heapless::Deque;
use log::{error, warn};
use parking_lot::{Condvar, Mutex};

use super::{NotificationMessage, Severity};

pub const QUEUE_CAPACITY: usize = 100;

/// Outcome of [`NotificationQueue::try_push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    /// Admitted after evicting one queued message of this severity.
    Evicted(Severity),
    /// Queue full and nothing could make room.
    Dropped,
    /// The worker has been told to stop.
    Closed,
    /// Notifications are switched off in configuration.
    Disabled,
}

impl Admission {
    pub const fn is_admitted(self) -> bool {
        matches!(self, Self::Queued | Self::Evicted(_))
    }
}

/// Outcome of [`NotificationQueue::recv_timeout`].
#[derive(Debug)]
pub enum Received {
    Message(NotificationMessage),
    Timeout,
    Shutdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: u32,
    pub dropped: u32,
    pub evicted: u32,
}

struct QueueState {
    items: Deque<NotificationMessage, QUEUE_CAPACITY>,
    shutdown: bool,
    stats: QueueStats,
}

pub struct NotificationQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: Deque::new(),
                shutdown: false,
                stats: QueueStats::default(),
            }),
            ready: Condvar::new(),
        }
    }

    /// Non-blocking enqueue with severity-based admission control.
    pub fn try_push(&self, msg: NotificationMessage) -> Admission {
        let mut st = self.state.lock();
        if st.shutdown {
            return Admission::Closed;
        }

        let mut outcome = Admission::Queued;
        if st.items.is_full() {
            if !msg.severity.is_high() {
                st.stats.dropped += 1;
                warn!("notify: queue full, dropped {:?} '{}'", msg.severity, msg.text);
                return Admission::Dropped;
            }
            let Some(victim) = eviction_victim(&st.items, msg.severity) else {
                st.stats.dropped += 1;
                error!(
                    "notify: queue full of high-severity messages, failed to queue {:?} '{}'",
                    msg.severity, msg.text
                );
                return Admission::Dropped;
            };
            let evicted = remove_at(&mut st.items, victim);
            st.stats.evicted += 1;
            warn!("notify: queue full, evicted {:?} for {:?}", evicted, msg.severity);
            outcome = Admission::Evicted(evicted);
        }

        if st.items.push_back(msg).is_err() {
            st.stats.dropped += 1;
            return Admission::Dropped;
        }
        st.stats.queued += 1;
        drop(st);
        self.ready.notify_one();
        outcome
    }

    /// Wait up to `timeout` for the next message.
    ///
    /// After [`shutdown`](Self::shutdown) the remaining messages are still
    /// handed out; `Shutdown` is returned once the queue is empty.
    pub fn recv_timeout(&self, timeout: Duration) -> Received {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock();
        loop {
            if let Some(msg) = st.items.pop_front() {
                return Received::Message(msg);
            }
            if st.shutdown {
                return Received::Shutdown;
            }
            if self.ready.wait_until(&mut st, deadline).timed_out() {
                return match st.items.pop_front() {
                    Some(msg) => Received::Message(msg),
                    None if st.shutdown => Received::Shutdown,
                    None => Received::Timeout,
                };
            }
        }
    }

    /// Post the shutdown sentinel.  Later pushes are refused.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.ready.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shutdown
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        self.state.lock().stats
    }

    /// Severities in queue order, oldest first.
    pub fn severities(&self) -> Vec<Severity> {
        self.state.lock().items.iter().map(|m| m.severity).collect()
    }
}

/// Index of the lowest-ranked message strictly below `incoming`, oldest first.
fn eviction_victim(
    items: &Deque<NotificationMessage, QUEUE_CAPACITY>,
    incoming: Severity,
) -> Option<usize> {
    items
        .iter()
        .enumerate()
        .filter(|(_, m)| m.severity < incoming)
        .min_by_key(|(i, m)| (m.severity, *i))
        .map(|(i, _)| i)
}

/// Remove the element at `index`, keeping the order of the rest.
fn remove_at(items: &mut Deque<NotificationMessage, QUEUE_CAPACITY>, index: usize) -> Severity {
    let len = items.len();
    let mut removed = Severity::Info;
    for i in 0..len {
        let Some(m) = items.pop_front() else { break };
        if i == index {
            removed = m.severity;
        } else {
            // Rotating through a deque that just gave up a slot cannot overflow.
            let _ = items.push_back(m);
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(severity: Severity, n: usize) -> NotificationMessage {
        NotificationMessage::new(severity, format!("m{n}"))
    }

    fn fill(q: &NotificationQueue, severity: Severity) {
        for i in 0..QUEUE_CAPACITY {
            assert_eq!(q.try_push(msg(severity, i)), Admission::Queued);
        }
    }

    #[test]
    fn info_dropped_when_full() {
        let q = NotificationQueue::new();
        fill(&q, Severity::Info);
        assert_eq!(q.try_push(msg(Severity::Info, 101)), Admission::Dropped);
        assert_eq!(q.len(), QUEUE_CAPACITY);
        assert_eq!(q.stats().dropped, 1);
    }

    #[test]
    fn warning_evicts_oldest_info() {
        let q = NotificationQueue::new();
        fill(&q, Severity::Info);
        assert_eq!(
            q.try_push(msg(Severity::Warning, 101)),
            Admission::Evicted(Severity::Info)
        );
        assert_eq!(q.len(), QUEUE_CAPACITY);
        match q.recv_timeout(Duration::ZERO) {
            Received::Message(m) => assert_eq!(m.text, "m1", "m0 was evicted"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(q.severities().last(), Some(&Severity::Warning));
    }

    #[test]
    fn critical_prefers_lowest_rank_victim() {
        let q = NotificationQueue::new();
        assert_eq!(q.try_push(msg(Severity::Warning, 0)), Admission::Queued);
        assert_eq!(q.try_push(msg(Severity::AllClear, 1)), Admission::Queued);
        for i in 2..QUEUE_CAPACITY {
            assert_eq!(q.try_push(msg(Severity::Critical, i)), Admission::Queued);
        }
        assert_eq!(
            q.try_push(msg(Severity::Critical, 100)),
            Admission::Evicted(Severity::AllClear)
        );
        assert_eq!(
            q.try_push(msg(Severity::Critical, 101)),
            Admission::Evicted(Severity::Warning)
        );
        assert_eq!(q.try_push(msg(Severity::Critical, 102)), Admission::Dropped);
        assert!(q.severities().iter().all(|s| *s == Severity::Critical));
    }

    #[test]
    fn warning_cannot_evict_warning() {
        let q = NotificationQueue::new();
        fill(&q, Severity::Warning);
        assert_eq!(q.try_push(msg(Severity::Warning, 101)), Admission::Dropped);
    }

    #[test]
    fn recv_times_out_on_empty_queue() {
        let q = NotificationQueue::new();
        assert!(matches!(
            q.recv_timeout(Duration::from_millis(10)),
            Received::Timeout
        ));
    }

    #[test]
    fn shutdown_drains_then_reports_sentinel() {
        let q = NotificationQueue::new();
        assert!(q.try_push(msg(Severity::Info, 0)).is_admitted());
        q.shutdown();
        assert_eq!(q.try_push(msg(Severity::Critical, 1)), Admission::Closed);
        assert!(matches!(q.recv_timeout(Duration::ZERO), Received::Message(_)));
        assert!(matches!(q.recv_timeout(Duration::ZERO), Received::Shutdown));
    }
}
