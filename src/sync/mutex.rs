//! # Recursive mutex
//!
//! Grounded on `OS_UTILS/mutex.c`'s `OS_mutexAcquire`/`OS_mutexRelease`:
//! ownership is the owning task's TCB pointer itself, taken with a
//! single LDREX/STREX attempt per loop iteration rather than a lock
//! that spins on its own. A task already holding the mutex re-enters
//! for free (the recursion counter ticks up); a task that loses the
//! race parks on the mutex's wait queue through the same fail-fast
//! `wait`/`notify` core every other blocking primitive uses.

use core::cell::UnsafeCell;

use crate::atomics::{self, PtrCasOutcome};
use crate::error::OsError;
use crate::task::Tcb;
use crate::wait::WaitQueue;

/// A mutual-exclusion lock that the same task may acquire more than
/// once without deadlocking itself, releasing only once the matching
/// number of `release` calls have been made.
///
/// Holds no data of its own — like `OS_Mutex_t`, it only protects
/// access to state the caller keeps elsewhere, guarded by convention
/// rather than by wrapping a payload.
pub struct Mutex {
    owner: UnsafeCell<*mut Tcb>,
    counter: UnsafeCell<u32>,
    wait_queue: UnsafeCell<WaitQueue>,
}

// Safety: every field is only ever touched through `acquire`/`release`,
// which serialize access via LL/SC plus the kernel's fail-fast wait
// core, exactly as `OS_mutexAcquire`/`OS_mutexRelease` do for
// `OS_Mutex_t`. A `Mutex` is meant to be shared as a `static` across
// tasks, which requires `Sync`.
unsafe impl Sync for Mutex {}

impl Mutex {
    /// A new, unheld mutex. Matches `OS_mutexInitialise`'s all-zero
    /// starting state.
    pub const fn new() -> Self {
        Self {
            owner: UnsafeCell::new(core::ptr::null_mut()),
            counter: UnsafeCell::new(0),
            wait_queue: UnsafeCell::new(WaitQueue::new()),
        }
    }

    /// Acquire the mutex, blocking until it is free or already owned
    /// by the calling task. Never fails — a task that never releases
    /// a contended mutex leaves every other waiter parked forever, the
    /// same contract `OS_mutexAcquire` documents.
    pub fn acquire(&self) {
        let current = crate::kernel::current_tcb();
        loop {
            let fail_fast_snapshot = crate::kernel::fail_fast_counter();

            // Safety: `owner` is only ever read/written through this
            // exclusive-monitor pair or, in the non-owner case below,
            // through the queue insert/extract that the kernel's wait
            // handler performs under its own critical section.
            let outcome =
                unsafe { atomics::try_compare_and_swap_ptr(self.owner.get(), core::ptr::null_mut(), current) };

            match outcome {
                PtrCasOutcome::Swapped => {
                    atomics::data_memory_barrier();
                    break;
                }
                PtrCasOutcome::Contended => continue,
                PtrCasOutcome::Unequal(owner) if owner == current => break,
                PtrCasOutcome::Unequal(_) => {
                    // Safety: the wait queue belongs to this mutex and
                    // is only touched from within the kernel's wait/
                    // notify handlers, which serialize access.
                    unsafe {
                        crate::kernel::wait_current(&mut *self.wait_queue.get(), fail_fast_snapshot);
                    }
                }
            }
        }

        // Safety: `counter` is only mutated by the current owner, and
        // only the owner reaches this point (either by taking the
        // mutex above or by already holding it).
        unsafe {
            *self.counter.get() += 1;
        }
    }

    /// Release one level of ownership. Once the recursion counter
    /// reaches zero the mutex becomes free and the highest-priority
    /// waiter, if any, is woken.
    ///
    /// Returns [`OsError::NotOwner`] without doing anything if the
    /// calling task does not hold the mutex — matches
    /// `OS_mutexRelease`'s silent-ignore guard, surfaced as an error
    /// for callers (and tests) that want to detect the misuse.
    pub fn release(&self) -> Result<(), OsError> {
        let current = crate::kernel::current_tcb();
        // Safety: read-only snapshot; only ever written by the owning
        // task (this check establishes whether that's us).
        if unsafe { *self.owner.get() } != current {
            return Err(OsError::NotOwner);
        }

        atomics::data_memory_barrier();
        // Safety: only the owner (just confirmed above) reaches here.
        unsafe {
            *self.counter.get() -= 1;
            if *self.counter.get() == 0 {
                *self.owner.get() = core::ptr::null_mut();
                // Mirrors `OS_mutexRelease`'s accepted race: another
                // task may acquire the now-free mutex before this
                // notify runs, in which case the woken waiter simply
                // loses its retry and parks again.
                crate::kernel::notify(&mut *self.wait_queue.get());
            }
        }
        Ok(())
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_mutex_is_unheld() {
        let m = Mutex::new();
        assert!(unsafe { (*m.owner.get()).is_null() });
        assert_eq!(unsafe { *m.counter.get() }, 0);
    }

    #[test]
    fn release_without_acquire_reports_not_owner() {
        let m = Mutex::new();
        assert_eq!(m.release(), Err(OsError::NotOwner));
    }

    #[test]
    fn acquire_then_release_returns_to_unheld() {
        crate::kernel::init();
        let m = Mutex::new();
        m.acquire();
        assert_eq!(unsafe { *m.counter.get() }, 1);
        assert!(m.release().is_ok());
        assert!(unsafe { (*m.owner.get()).is_null() });
    }

    #[test]
    fn recursive_acquire_stacks_the_counter() {
        crate::kernel::init();
        let m = Mutex::new();
        m.acquire();
        m.acquire();
        assert_eq!(unsafe { *m.counter.get() }, 2);
        assert!(m.release().is_ok());
        // Still held: one more release is owed.
        assert!(!unsafe { (*m.owner.get()).is_null() });
        assert!(m.release().is_ok());
        assert!(unsafe { (*m.owner.get()).is_null() });
    }
}
