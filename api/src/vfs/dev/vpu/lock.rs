//! Session lock
//!
//! Serializes every state-changing VPU operation. Unlike a scoped mutex it
//! can also be taken and dropped by separate user commands (`LOCK_DEV 1` /
//! `LOCK_DEV 0`), so it has no owner: taking it twice from the same caller
//! deadlocks, and a caller that never unlocks stalls every session.

use core::sync::atomic::{AtomicBool, Ordering};

use event_listener::{Event, Listener};

/// Sleeping lock in place of an `axsync::Mutex<()>`: the `LOCK_DEV` pair
/// needs to hold it without a guard, so it is a raw lock with an optional
/// scoped [`SessionGuard`] on top.
pub struct SessionLock {
    locked: AtomicBool,
    event: Event,
}

/// Releases the [`SessionLock`] on drop.
pub struct SessionGuard<'a> {
    lock: &'a SessionLock,
}

impl SessionLock {
    pub fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            event: Event::new(),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Blocks until the lock is taken. Pair with [`release`](Self::release).
    pub fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            let listener = self.event.listen();
            if self.try_acquire() {
                return;
            }
            listener.wait();
        }
    }

    /// Drops the lock. Returns false, with a warning, if it was not held.
    pub fn release(&self) -> bool {
        if !self.locked.swap(false, Ordering::Release) {
            warn!("VPU unlock without lock");
            return false;
        }
        self.event.notify(1);
        true
    }

    /// Takes the lock for the guard's lifetime.
    pub fn lock(&self) -> SessionGuard<'_> {
        self.acquire();
        SessionGuard { lock: self }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for SessionLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
