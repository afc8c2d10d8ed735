//! # Scheduler
//!
//! The pluggable scheduling policy interface, and the one
//! implementation this kernel ships: fixed-priority round-robin over
//! a per-priority circular ready list, with a sleep heap drained at
//! the top of every scheduling decision.
//!
//! The teacher's game-theoretic scheduler scanned a flat task array
//! and ranked by a payoff-adjusted priority; this one keeps the same
//! shape of entry points (`tick`, a next-task query, add/exit) but the
//! policy itself is the simpler, real-time-predictable discipline this
//! kernel targets: strict priority preemption with round-robin
//! fairness inside a priority.

use crate::config::PRIORITY_LEVELS;
use crate::error::OsError;
use crate::sleep::SleepHeap;
use crate::task::Tcb;
use crate::wait::WaitQueue;

/// A scheduling policy: a capability interface queried by the kernel's
/// SVC handlers and the PendSV switcher.
///
/// The teacher's equivalent was six raw function pointers plus a
/// `preemptive` flag stored in a C-style vtable struct; a trait object
/// is the idiomatic Rust rendering of the same "pluggable policy"
/// idea.
pub trait Scheduler {
    /// Drain due sleepers, then return the next task to run. Never
    /// returns null — falls back to the idle task.
    fn pick_next(&mut self, now: u32) -> *mut Tcb;

    /// Register a brand-new task. Fails once `MAX_TASKS` have been
    /// added and never removed.
    fn add_task(&mut self, tcb: *mut Tcb) -> Result<(), OsError>;

    /// Permanently remove a task that has run to completion.
    fn exit_task(&mut self, tcb: *mut Tcb);

    /// Move a runnable task out of its ready list without changing
    /// the total task count (used when a task blocks or sleeps).
    ///
    /// # Safety
    /// `tcb` must currently be linked into one of the ready lists.
    unsafe fn remove(&mut self, tcb: *mut Tcb);

    /// Move a task back into its ready list without changing the
    /// total task count (used on wake/unblock).
    ///
    /// # Safety
    /// `tcb` must not currently be linked into any list.
    unsafe fn insert(&mut self, tcb: *mut Tcb);

    /// Park the current task on `queue` unless a notify has already
    /// raced ahead of it (`fail_fast_snapshot` no longer matches the
    /// live counter, in which case this is a no-op and the caller
    /// should retry its operation instead of blocking).
    ///
    /// # Safety
    /// `tcb` must be the currently running task, linked into its
    /// ready list.
    unsafe fn wait(&mut self, queue: &mut WaitQueue, tcb: *mut Tcb, fail_fast_snapshot: u32);

    /// Wake the highest-priority waiter on `queue`, if any, moving it
    /// back to its ready list.
    ///
    /// # Safety
    /// Caller must hold the kernel's critical section.
    unsafe fn notify(&mut self, queue: &mut WaitQueue);

    /// Whether this policy wants the periodic tick timer enabled.
    /// `OS_start`'s `ENABLE_TICK` handler only configures the timer
    /// when this is true.
    fn preemptive(&self) -> bool {
        true
    }

    /// Record a sleep: stash `(*tcb).data` as already holding the
    /// absolute wake tick, insert into the sleep heap, then remove
    /// from the ready list. Order matters — see `sleep::SleepHeap`.
    ///
    /// # Safety
    /// `tcb` must be the currently running task.
    unsafe fn sleep(&mut self, tcb: *mut Tcb, now: u32);
}

/// Fixed-priority round-robin scheduler: one circular doubly linked
/// ready list per priority level, served strictly highest-to-lowest,
/// round-robin within a level.
pub struct RoundRobin {
    /// `buckets[p]` is null when priority `p` has no ready tasks,
    /// else points at the list's current cursor — the task most
    /// recently dispatched at that priority. `pick_next` advances the
    /// cursor to `cursor->next` and returns that.
    buckets: [*mut Tcb; PRIORITY_LEVELS],
    tasks_added: usize,
    sleep_heap: SleepHeap,
}

impl RoundRobin {
    pub const fn new() -> Self {
        Self {
            buckets: [core::ptr::null_mut(); PRIORITY_LEVELS],
            tasks_added: 0,
            sleep_heap: SleepHeap::new(),
        }
    }

    #[inline]
    fn bucket_index(tcb: *mut Tcb) -> usize {
        // Safety: caller guarantees tcb is valid.
        unsafe { (*tcb).priority as usize }
    }

    fn drain_sleepers(&mut self, now: u32) {
        while self.sleep_heap.needs_wake(now) {
            // Safety: the scheduler owns the sleep heap and runs with
            // the kernel's critical section held.
            let woken = unsafe { self.sleep_heap.extract(now) };
            if woken.is_null() {
                break;
            }
            unsafe {
                (*woken).state.remove(crate::task::TaskState::SLEEP);
                self.insert(woken);
            }
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for RoundRobin {
    fn pick_next(&mut self, now: u32) -> *mut Tcb {
        self.drain_sleepers(now);

        for priority in (1..PRIORITY_LEVELS).rev() {
            let cursor = self.buckets[priority];
            if cursor.is_null() {
                continue;
            }
            // Safety: a non-null bucket entry is always a live TCB
            // linked into a valid circular list for that priority.
            unsafe {
                let next = (*cursor).next;
                self.buckets[priority] = next;
                return next;
            }
        }

        core::ptr::null_mut()
    }

    fn add_task(&mut self, tcb: *mut Tcb) -> Result<(), OsError> {
        debug_assert!(
            self.tasks_added < crate::config::MAX_TASKS,
            "task arena exhausted"
        );
        if self.tasks_added >= crate::config::MAX_TASKS {
            return Err(OsError::TooManyTasks);
        }
        // Safety: insert requires tcb be unlinked, which is true for
        // a just-initialized task.
        unsafe { self.insert(tcb) };
        self.tasks_added += 1;
        Ok(())
    }

    fn exit_task(&mut self, tcb: *mut Tcb) {
        // Safety: a task calling exit is, by construction, still
        // linked into its ready list (it is the running task).
        unsafe { self.remove(tcb) };
        self.tasks_added = self.tasks_added.saturating_sub(1);
    }

    unsafe fn insert(&mut self, tcb: *mut Tcb) {
        let idx = Self::bucket_index(tcb);
        let bucket = self.buckets[idx];
        if bucket.is_null() {
            (*tcb).next = tcb;
            (*tcb).prev = tcb;
            self.buckets[idx] = tcb;
        } else {
            (*tcb).prev = bucket;
            (*tcb).next = (*bucket).next;
            (*(*bucket).next).prev = tcb;
            (*bucket).next = tcb;
        }
    }

    unsafe fn remove(&mut self, tcb: *mut Tcb) {
        let idx = Self::bucket_index(tcb);
        if (*tcb).next == tcb {
            self.buckets[idx] = core::ptr::null_mut();
        } else {
            (*(*tcb).prev).next = (*tcb).next;
            (*(*tcb).next).prev = (*tcb).prev;
            if self.buckets[idx] == tcb {
                self.buckets[idx] = (*tcb).prev;
            }
        }
        (*tcb).prev = core::ptr::null_mut();
        (*tcb).next = core::ptr::null_mut();
    }

    unsafe fn wait(&mut self, queue: &mut WaitQueue, tcb: *mut Tcb, fail_fast_snapshot: u32) {
        if fail_fast_snapshot != crate::kernel::fail_fast_counter() {
            // A notify raced ahead of us; the resource may already be
            // free. Don't block — let the caller retry its LL/SC.
            return;
        }
        self.remove(tcb);
        (*tcb).state.insert(crate::task::TaskState::WAIT);
        queue.insert(tcb);
    }

    unsafe fn notify(&mut self, queue: &mut WaitQueue) {
        let woken = queue.extract();
        if !woken.is_null() {
            (*woken).state.remove(crate::task::TaskState::WAIT);
            self.insert(woken);
        }
    }

    unsafe fn sleep(&mut self, tcb: *mut Tcb, now: u32) {
        (*tcb).state.insert(crate::task::TaskState::SLEEP);
        self.sleep_heap.insert(tcb, now);
        self.remove(tcb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TcbSlot;

    fn slot(priority: u8) -> TcbSlot {
        let mut slot = TcbSlot::empty();
        slot.tcb.priority = priority;
        slot
    }

    #[test]
    fn single_task_bucket_is_self_linked_circular() {
        let mut s = slot(2);
        let mut rr = RoundRobin::new();
        unsafe {
            rr.insert(&mut s.tcb as *mut _);
            assert_eq!(s.tcb.next, &mut s.tcb as *mut _);
            assert_eq!(s.tcb.prev, &mut s.tcb as *mut _);
        }
    }

    #[test]
    fn round_robin_cycles_within_a_priority() {
        let mut a = slot(3);
        let mut b = slot(3);
        let mut c = slot(3);
        let mut rr = RoundRobin::new();
        unsafe {
            rr.insert(&mut a.tcb as *mut _);
            rr.insert(&mut b.tcb as *mut _);
            rr.insert(&mut c.tcb as *mut _);
        }

        let first = rr.pick_next(0);
        let second = rr.pick_next(0);
        let third = rr.pick_next(0);
        let fourth = rr.pick_next(0);
        assert_eq!(fourth, first, "cycle must repeat after one full lap");
        assert_ne!(first, second);
        assert_ne!(second, third);
    }

    #[test]
    fn higher_priority_always_wins() {
        let mut low = slot(1);
        let mut high = slot(4);
        let mut rr = RoundRobin::new();
        unsafe {
            rr.insert(&mut low.tcb as *mut _);
            rr.insert(&mut high.tcb as *mut _);
        }
        for _ in 0..5 {
            let picked = rr.pick_next(0);
            assert_eq!(picked, &mut high.tcb as *mut _);
        }
    }

    #[test]
    fn remove_from_multi_element_bucket_preserves_cycle() {
        let mut a = slot(2);
        let mut b = slot(2);
        let mut c = slot(2);
        let mut rr = RoundRobin::new();
        unsafe {
            rr.insert(&mut a.tcb as *mut _);
            rr.insert(&mut b.tcb as *mut _);
            rr.insert(&mut c.tcb as *mut _);

            rr.remove(&mut b.tcb as *mut _);

            // Walking from a's next pointer twice must return to a.
            let one = a.tcb.next;
            let two = (*one).next;
            assert_eq!(two, &mut a.tcb as *mut _);
        }
    }

    #[test]
    fn remove_last_element_empties_bucket() {
        let mut a = slot(2);
        let mut rr = RoundRobin::new();
        unsafe {
            rr.insert(&mut a.tcb as *mut _);
            rr.remove(&mut a.tcb as *mut _);
        }
        assert!(rr.pick_next(0).is_null());
    }

    #[test]
    fn add_task_rejects_past_capacity() {
        let mut rr = RoundRobin::new();
        let mut slots: [TcbSlot; crate::config::MAX_TASKS] =
            core::array::from_fn(|_| TcbSlot::empty());
        for (i, s) in slots.iter_mut().enumerate() {
            s.tcb.priority = 1;
            let result = rr.add_task(&mut s.tcb as *mut _);
            if i < crate::config::MAX_TASKS {
                assert!(result.is_ok());
            }
        }
        let mut overflow = slot(1);
        assert_eq!(
            rr.add_task(&mut overflow.tcb as *mut _),
            Err(OsError::TooManyTasks)
        );
    }

    #[test]
    fn empty_scheduler_returns_null_for_idle_fallback() {
        let mut rr = RoundRobin::new();
        assert!(rr.pick_next(0).is_null());
    }
}
