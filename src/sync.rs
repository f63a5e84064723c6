/* Wakeup and ownership signals shared between the feed, command and URC
paths. */

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Recover the guard from a poisoned mutex. The protected values are plain
/// flags whose invariants hold after any partial update, so a panicking
/// peer does not invalidate them.
fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Level-triggered wakeup signal.
///
/// The producer posts it whenever new data may be available; a waiter
/// returns as soon as a post is pending or the deadline passes. Waiters
/// must re-check the actual data condition after every return, spurious
/// wakeups included.
pub(crate) struct Event {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn post(&self) {
        *lock_ignore_poison(&self.pending) = true;
        self.cond.notify_all();
    }

    /// Wait for a post, consuming it. Returns `false` once `deadline` has
    /// passed without one.
    pub(crate) fn wait_deadline(&self, deadline: Instant) -> bool {
        let mut pending = lock_ignore_poison(&self.pending);
        loop {
            if *pending {
                *pending = false;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            pending = self
                .cond
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Binary ownership semaphore realizing the transceiver lock.
///
/// Acquisition order among contenders is unspecified. Re-acquiring from the
/// owning thread deadlocks; recursive locking is not supported.
pub(crate) struct Semaphore {
    free: Mutex<bool>,
    cond: Condvar,
}

impl Semaphore {
    pub(crate) fn new() -> Self {
        Self {
            free: Mutex::new(true),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn acquire(&self) {
        let mut free = lock_ignore_poison(&self.free);
        while !*free {
            free = self
                .cond
                .wait(free)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *free = false;
    }

    /// Like `acquire`, but gives up after `timeout`. Returns whether the
    /// semaphore was obtained.
    pub(crate) fn acquire_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut free = lock_ignore_poison(&self.free);
        while !*free {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            free = self
                .cond
                .wait_timeout(free, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *free = false;
        true
    }

    pub(crate) fn release(&self) {
        *lock_ignore_poison(&self.free) = true;
        self.cond.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_event_post_before_wait() {
        let event = Event::new();
        event.post();
        assert!(event.wait_deadline(Instant::now() + Duration::from_millis(10)));
        // The post was consumed.
        assert!(!event.wait_deadline(Instant::now() + Duration::from_millis(10)));
    }

    #[test]
    fn test_event_wakes_waiter() {
        let event = Arc::new(Event::new());
        let poster = event.clone();
        let waiter = thread::spawn(move || {
            event.wait_deadline(Instant::now() + Duration::from_secs(5))
        });
        thread::sleep(Duration::from_millis(20));
        poster.post();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_event_deadline_expires() {
        let event = Event::new();
        let start = Instant::now();
        assert!(!event.wait_deadline(start + Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_semaphore_timeout_while_held() {
        let sem = Semaphore::new();
        sem.acquire();
        assert!(!sem.acquire_timeout(Duration::from_millis(20)));
        sem.release();
        assert!(sem.acquire_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_semaphore_handover() {
        let sem = Arc::new(Semaphore::new());
        sem.acquire();
        let contender = {
            let sem = sem.clone();
            thread::spawn(move || {
                sem.acquire();
                sem.release();
            })
        };
        thread::sleep(Duration::from_millis(20));
        sem.release();
        contender.join().unwrap();
    }
}
