//! # Wait queues
//!
//! A priority-ordered, singly-linked list of blocked tasks. Every
//! blocking resource (a mutex, a semaphore, or a caller's own
//! `_OS_wait` site) owns one of these as its queue head. Ordering is
//! descending priority with FIFO tie-breaking, so `extract` always
//! hands back the highest-priority task that has waited longest at
//! that priority.
//!
//! Unlike the ready list (`scheduler::ReadyLists`), a wait queue is
//! singly linked — `Tcb::prev` is not maintained while a task sits
//! here, since nothing needs to walk the list backwards.

use crate::task::Tcb;
use core::ptr;

/// Head of a wait queue. `None` (represented as a null pointer) means
/// empty.
pub struct WaitQueue {
    head: *mut Tcb,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Insert `tcb` in priority order: strictly-higher priority moves
    /// towards the head, equal priority goes after every task already
    /// queued at that priority (FIFO).
    ///
    /// # Safety
    /// `tcb` must be a valid, exclusively-owned pointer not currently
    /// linked into any other list. The caller must hold the
    /// appropriate critical section.
    pub unsafe fn insert(&mut self, tcb: *mut Tcb) {
        (*tcb).next = ptr::null_mut();

        if self.head.is_null() {
            self.head = tcb;
            return;
        }

        if (*tcb).priority > (*self.head).priority {
            (*tcb).next = self.head;
            self.head = tcb;
            return;
        }

        let mut cursor = self.head;
        while !(*cursor).next.is_null() && (*tcb).priority <= (*(*cursor).next).priority {
            cursor = (*cursor).next;
        }
        (*tcb).next = (*cursor).next;
        (*cursor).next = tcb;
    }

    /// Pop and return the head of the queue, or null if empty.
    ///
    /// # Safety
    /// The caller must hold the appropriate critical section.
    pub unsafe fn extract(&mut self) -> *mut Tcb {
        let popped = self.head;
        if !popped.is_null() {
            self.head = (*popped).next;
            (*popped).next = ptr::null_mut();
        }
        popped
    }

    /// Peek the head without removing it.
    #[inline]
    pub fn peek(&self) -> *mut Tcb {
        self.head
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
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
    fn higher_priority_moves_to_head() {
        let mut low = slot(1);
        let mut high = slot(4);
        let mut queue = WaitQueue::new();
        unsafe {
            queue.insert(&mut low.tcb as *mut _);
            queue.insert(&mut high.tcb as *mut _);
            assert_eq!(queue.peek(), &mut high.tcb as *mut _);
        }
    }

    #[test]
    fn equal_priority_is_fifo() {
        let mut a = slot(2);
        let mut b = slot(2);
        let mut c = slot(2);
        let mut queue = WaitQueue::new();
        unsafe {
            queue.insert(&mut a.tcb as *mut _);
            queue.insert(&mut b.tcb as *mut _);
            queue.insert(&mut c.tcb as *mut _);

            assert_eq!(queue.extract(), &mut a.tcb as *mut _);
            assert_eq!(queue.extract(), &mut b.tcb as *mut _);
            assert_eq!(queue.extract(), &mut c.tcb as *mut _);
            assert!(queue.extract().is_null());
        }
    }

    #[test]
    fn descending_priority_order_with_ties() {
        let mut p1 = slot(1);
        let mut p3a = slot(3);
        let mut p3b = slot(3);
        let mut p5 = slot(5);
        let mut queue = WaitQueue::new();
        unsafe {
            queue.insert(&mut p1.tcb as *mut _);
            queue.insert(&mut p3a.tcb as *mut _);
            queue.insert(&mut p5.tcb as *mut _);
            queue.insert(&mut p3b.tcb as *mut _);

            assert_eq!(queue.extract(), &mut p5.tcb as *mut _);
            assert_eq!(queue.extract(), &mut p3a.tcb as *mut _);
            assert_eq!(queue.extract(), &mut p3b.tcb as *mut _);
            assert_eq!(queue.extract(), &mut p1.tcb as *mut _);
        }
    }

    #[test]
    fn extract_on_empty_queue_is_null() {
        let mut queue = WaitQueue::new();
        unsafe {
            assert!(queue.extract().is_null());
        }
    }
}
