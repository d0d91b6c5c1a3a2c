//! Cancellable one-shot timers.
//!
//! All timers share one service thread that sleeps until the earliest
//! deadline and runs due callbacks in deadline order, so arming a timer
//! costs a heap entry rather than a task.  Callbacks run one at a time on
//! that thread; keep them short and never block on another timer.
//!
//! A callback must re-acquire whatever lock guards the state it acts on
//! and re-check that state: a timer is a schedule, not a guarantee that
//! the condition it was armed for still holds.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use crate::drivers::task_pin::{Core, spawn_on_core};
use crate::error::Result;

/// Cancelled entries are pruned from the heap once it grows past this.
const PRUNE_THRESHOLD: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Pending,
    Cancelled,
    Fired,
}

type Callback = Box<dyn FnOnce() + Send>;

struct Entry {
    name: &'static str,
    state: Mutex<TimerState>,
    callback: Mutex<Option<Callback>>,
}

impl Entry {
    fn is_pending(&self) -> bool {
        *self.state.lock() == TimerState::Pending
    }
}

struct Due {
    deadline: Instant,
    seq: u64,
    entry: Arc<Entry>,
}

impl PartialEq for Due {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Due {}

impl PartialOrd for Due {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Due {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

#[derive(Default)]
struct Wheel {
    heap: BinaryHeap<Reverse<Due>>,
    next_seq: u64,
}

struct TimerService {
    wheel: Mutex<Wheel>,
    wake: Condvar,
}

static SERVICE: Mutex<Option<Arc<TimerService>>> = Mutex::new(None);

impl TimerService {
    /// The process-wide service, started on first use.
    fn get() -> Result<Arc<Self>> {
        let mut slot = SERVICE.lock();
        if let Some(svc) = slot.as_ref() {
            return Ok(Arc::clone(svc));
        }
        let svc = Arc::new(Self {
            wheel: Mutex::new(Wheel::default()),
            wake: Condvar::new(),
        });
        let worker = Arc::clone(&svc);
        spawn_on_core(Core::App, 4, 8, "timers\0", move || worker.run())?;
        debug!("timer: service started");
        *slot = Some(Arc::clone(&svc));
        Ok(svc)
    }

    fn insert(&self, deadline: Instant, entry: Arc<Entry>) {
        let mut wheel = self.wheel.lock();
        if wheel.heap.len() > PRUNE_THRESHOLD {
            wheel.heap.retain(|Reverse(due)| due.entry.is_pending());
        }
        let seq = wheel.next_seq;
        wheel.next_seq += 1;
        wheel.heap.push(Reverse(Due { deadline, seq, entry }));
        self.wake.notify_one();
    }

    fn run(&self) {
        loop {
            let due = {
                let mut wheel = self.wheel.lock();
                loop {
                    let next = wheel.heap.peek().map(|Reverse(due)| due.deadline);
                    match next {
                        Some(deadline) if deadline <= Instant::now() => {
                            break wheel.heap.pop().map(|Reverse(due)| due.entry);
                        }
                        Some(deadline) => {
                            self.wake.wait_until(&mut wheel, deadline);
                        }
                        None => self.wake.wait(&mut wheel),
                    }
                }
            };
            if let Some(entry) = due {
                fire(&entry);
            }
        }
    }
}

fn fire(entry: &Entry) {
    {
        let mut state = entry.state.lock();
        if *state != TimerState::Pending {
            return;
        }
        *state = TimerState::Fired;
    }
    let callback = entry.callback.lock().take();
    if let Some(f) = callback {
        trace!("timer '{}' fired", entry.name);
        f();
    }
}

/// Handle to a scheduled callback.  Dropping the handle does not cancel it.
#[derive(Clone)]
pub struct Timer {
    entry: Arc<Entry>,
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.entry.name)
            .field("state", &*self.entry.state.lock())
            .finish()
    }
}

impl Timer {
    /// Run `f` after `delay` on the shared timer thread.
    ///
    /// `name` may carry a trailing NUL; it is only used in logs.
    pub fn schedule(
        name: &'static str,
        delay: Duration,
        f: impl FnOnce() + Send + 'static,
    ) -> Result<Self> {
        let service = TimerService::get()?;
        let entry = Arc::new(Entry {
            name: name.trim_end_matches('\0'),
            state: Mutex::new(TimerState::Pending),
            callback: Mutex::new(Some(Box::new(f))),
        });
        service.insert(Instant::now() + delay, Arc::clone(&entry));
        Ok(Self { entry })
    }

    /// Cancel the timer.  Returns `true` if this call stopped it from firing.
    pub fn cancel(&self) -> bool {
        {
            let mut state = self.entry.state.lock();
            if *state != TimerState::Pending {
                return false;
            }
            *state = TimerState::Cancelled;
        }
        // Release whatever the callback captured right away.
        drop(self.entry.callback.lock().take());
        trace!("timer '{}' cancelled", self.entry.name);
        true
    }

    /// Still waiting to fire.
    pub fn is_pending(&self) -> bool {
        self.entry.is_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn fires_once_after_delay() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        let t = Timer::schedule("t-fire\0", Duration::from_millis(10), move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!t.is_pending());
        assert!(!t.cancel(), "cancel after firing is a no-op");
    }

    #[test]
    fn cancel_prevents_callback() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        let t = Timer::schedule("t-cancel\0", Duration::from_millis(50), move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(t.is_pending());
        assert!(t.cancel());
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn all_timers_share_one_thread_in_deadline_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let threads = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for (tag, delay_ms) in [(3u32, 60u64), (1, 20), (2, 40)] {
            let order = Arc::clone(&order);
            let threads = Arc::clone(&threads);
            handles.push(
                Timer::schedule("t-order\0", Duration::from_millis(delay_ms), move || {
                    order.lock().push(tag);
                    threads
                        .lock()
                        .push(std::thread::current().name().map(str::to_owned));
                })
                .unwrap(),
            );
        }
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(*order.lock(), vec![1, 2, 3]);
        let threads = threads.lock();
        assert_eq!(threads.len(), 3);
        assert!(threads.iter().all(|n| n.as_deref() == Some("timers")));
    }

    #[test]
    fn callback_may_schedule_another_timer() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        let _first = Timer::schedule("t-outer\0", Duration::from_millis(5), move || {
            let h2 = Arc::clone(&h);
            h.fetch_add(1, Ordering::SeqCst);
            Timer::schedule("t-inner\0", Duration::from_millis(5), move || {
                h2.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancelled_entries_are_pruned() {
        let timers: Vec<Timer> = (0..(PRUNE_THRESHOLD as u64 * 3))
            .map(|i| Timer::schedule("t-prune\0", Duration::from_secs(600 + i), || {}).unwrap())
            .collect();
        for t in &timers {
            t.cancel();
        }
        let keep = Timer::schedule("t-keep\0", Duration::from_secs(600), || {}).unwrap();
        let svc = TimerService::get().unwrap();
        let leftover = svc
            .wheel
            .lock()
            .heap
            .iter()
            .filter(|Reverse(due)| due.entry.name == "t-prune")
            .count();
        assert_eq!(leftover, 0);
        assert!(keep.is_pending());
        keep.cancel();
    }
}
