//! Fuzz target: `NotificationQueue::try_push` / `recv_timeout`
//!
//! Each input byte is one operation: push a message of some severity, pop
//! one, or shut the queue down.  The queue must never exceed its capacity
//! and must hand out every admitted message exactly once.
//!
//! cargo fuzz run fuzz_notification_queue

#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use strikeguard::notify::{NotificationMessage, NotificationQueue, QUEUE_CAPACITY, Received, Severity};

const SEVERITIES: [Severity; 4] = [Severity::Info, Severity::AllClear, Severity::Warning, Severity::Critical];

fuzz_target!(|data: &[u8]| {
    let q = NotificationQueue::new();
    let mut admitted = 0u64;
    let mut removed = 0u64;

    for &op in data {
        match op % 8 {
            0..=5 => {
                let sev = SEVERITIES[usize::from(op >> 3) % SEVERITIES.len()];
                let outcome = q.try_push(NotificationMessage::new(sev, "f"));
                if outcome.is_admitted() {
                    admitted += 1;
                }
                if matches!(outcome, strikeguard::notify::Admission::Evicted(_)) {
                    removed += 1;
                }
            }
            6 => {
                if let Received::Message(_) = q.recv_timeout(Duration::ZERO) {
                    removed += 1;
                }
            }
            _ => q.shutdown(),
        }
        assert!(q.len() <= QUEUE_CAPACITY);
    }

    q.shutdown();
    while let Received::Message(_) = q.recv_timeout(Duration::ZERO) {
        removed += 1;
    }
    assert_eq!(admitted, removed, "every admitted message leaves exactly once");
});
