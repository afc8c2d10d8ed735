//! # Inter-task queue (supplemented, external collaborator)
//!
//! A fixed-capacity ring buffer for passing fixed-size items between
//! tasks, grounded on `OS_UTILS/queue.c`'s `OS_Queue_t`: one mutex
//! guarding the head/tail cursors, and two semaphores — `sem_r` sized
//! to the queue's capacity and starting empty, `sem_w` sized the same
//! and starting full — doing double duty as both the "is there room"
//! and "is there data" signal. `enqueue` takes a write token, copies
//! the item in, then gives a read token; `dequeue` does the mirror
//! image. The mutex is released before the paired semaphore is given,
//! matching `OS_queue.c`'s ordering.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;

use crate::sync::{Mutex, Semaphore};

/// A fixed-capacity circular buffer of up to `N` items of `T`, safe to
/// share across tasks as a `static`.
pub struct Queue<T, const N: usize> {
    storage: UnsafeCell<[MaybeUninit<T>; N]>,
    head: UnsafeCell<usize>,
    tail: UnsafeCell<usize>,
    mutex: Mutex,
    /// Tokens available to read (items currently enqueued).
    readable: Semaphore,
    /// Tokens available to write (free slots).
    writable: Semaphore,
}

// Safety: `storage`/`head`/`tail` are only mutated with `mutex` held,
// and `readable`/`writable` gate how many items are actually live so
// `enqueue`/`dequeue` never race past the backing array's bounds.
unsafe impl<T, const N: usize> Sync for Queue<T, N> {}

impl<T, const N: usize> Queue<T, N> {
    /// A new, empty queue. `N` must be at least 1.
    pub fn new() -> Self {
        debug_assert!(N > 0, "queue capacity must be non-zero");
        Self {
            storage: UnsafeCell::new(unsafe { MaybeUninit::uninit().assume_init() }),
            head: UnsafeCell::new(0),
            tail: UnsafeCell::new(0),
            mutex: Mutex::new(),
            readable: Semaphore::new_counting(N as u32, 0),
            writable: Semaphore::new_counting(N as u32, N as u32),
        }
    }

    /// Number of items currently enqueued.
    pub fn len(&self) -> u32 {
        self.readable.available_tokens()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `item` to the back of the queue, blocking until there is
    /// room.
    pub fn enqueue(&self, item: T) {
        self.writable.take();
        self.mutex.acquire();
        unsafe {
            let head = *self.head.get();
            (*self.storage.get())[head] = MaybeUninit::new(item);
            *self.head.get() = (head + 1) % N;
        }
        let _ = self.mutex.release();
        self.readable.give();
    }

    /// Remove and return the item at the front of the queue, blocking
    /// until one is available.
    pub fn dequeue(&self) -> T {
        self.readable.take();
        self.mutex.acquire();
        let item = unsafe {
            let tail = *self.tail.get();
            let slot = &mut (*self.storage.get())[tail];
            let item = core::mem::replace(slot, MaybeUninit::uninit()).assume_init();
            *self.tail.get() = (tail + 1) % N;
            item
        };
        let _ = self.mutex.release();
        self.writable.give();
        item
    }
}

impl<T, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_queue_is_empty() {
        let q: Queue<u32, 4> = Queue::new();
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn enqueue_then_dequeue_preserves_fifo_order() {
        crate::kernel::init();
        let q: Queue<u32, 4> = Queue::new();
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(3);
        assert_eq!(q.len(), 3);
        assert_eq!(q.dequeue(), 1);
        assert_eq!(q.dequeue(), 2);
        assert_eq!(q.dequeue(), 3);
        assert!(q.is_empty());
    }

    #[test]
    fn wraps_around_the_ring() {
        crate::kernel::init();
        let q: Queue<u32, 2> = Queue::new();
        q.enqueue(10);
        assert_eq!(q.dequeue(), 10);
        q.enqueue(20);
        q.enqueue(30);
        assert_eq!(q.dequeue(), 20);
        assert_eq!(q.dequeue(), 30);
    }
}
