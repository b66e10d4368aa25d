//! Wake-up coordination for blocking syscalls
//!
//! Every process owns one [`Blocker`], a counting semaphore its syscalls park
//! on. A channel that might become ready keeps a [`WakeUpRegistry`] of
//! notifier tokens, each bound to the blocker of a waiting process. Whenever
//! the channel's readiness may have changed it calls
//! [`WakeUpRegistry::notify_all`], releasing every waiter. Waiters always
//! re-check readiness after waking up: the blocker may have been released
//! by an unrelated channel, by a child's exit, or by cancellation.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counting semaphore a process blocks on while a syscall cannot complete.
#[derive(Debug, Default)]
pub struct Blocker {
    count: Mutex<usize>,
    cv: Condvar,
}

impl Blocker {
    pub fn new() -> Blocker {
        Blocker::default()
    }

    pub fn up(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.cv.notify_one();
    }

    pub fn down(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cv.wait(&mut count);
        }
        *count -= 1;
    }

    /// Like [`Blocker::down`] but gives up once `deadline` has passed.
    ///
    /// Returns `false` if the deadline expired without a wake-up.
    pub fn down_until(&self, deadline: Instant) -> bool {
        let mut count = self.count.lock();
        while *count == 0 {
            if self.cv.wait_until(&mut count, deadline).timed_out() {
                if *count == 0 {
                    return false;
                }
                break;
            }
        }
        *count -= 1;
        true
    }

    pub fn down_timeout(&self, timeout: Duration) -> bool {
        self.down_until(Instant::now() + timeout)
    }
}

static NEXT_NOTIFIER_ID: AtomicU64 = AtomicU64::new(1);

/// Token binding one waiting syscall to its process's blocker.
#[derive(Debug, Clone)]
pub struct WakeUpNotifier {
    id: u64,
    blocker: Arc<Blocker>,
}

impl WakeUpNotifier {
    pub fn new(blocker: Arc<Blocker>) -> WakeUpNotifier {
        WakeUpNotifier {
            id: NEXT_NOTIFIER_ID.fetch_add(1, Ordering::Relaxed),
            blocker,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn wake_up(&self) {
        self.blocker.up();
    }
}

/// The set of notifiers registered at one channel.
#[derive(Debug, Default)]
pub struct WakeUpRegistry {
    notifiers: Mutex<Vec<WakeUpNotifier>>,
}

impl WakeUpRegistry {
    pub fn new() -> Arc<WakeUpRegistry> {
        Arc::new(WakeUpRegistry::default())
    }

    pub fn register(&self, notifier: WakeUpNotifier) {
        self.notifiers.lock().push(notifier);
    }

    pub fn unregister(&self, id: u64) {
        self.notifiers.lock().retain(|n| n.id != id);
    }

    pub fn notify_all(&self) {
        for notifier in self.notifiers.lock().iter() {
            notifier.wake_up();
        }
    }

    pub fn len(&self) -> usize {
        self.notifiers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps a notifier registered for as long as it lives.
pub struct Registration {
    registry: Arc<WakeUpRegistry>,
    id: u64,
}

impl Registration {
    pub fn new(registry: Arc<WakeUpRegistry>, notifier: WakeUpNotifier) -> Registration {
        let id = notifier.id();
        registry.register(notifier);
        Registration { registry, id }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
