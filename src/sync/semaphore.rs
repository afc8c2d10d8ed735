//! # Counting semaphore
//!
//! Grounded on `OS_UTILS/semaphore.c`'s `OS_semaphoreTake`/`OS_semaphoreGive`:
//! a token count taken and given with a single LDREX/STREX attempt per
//! loop iteration, falling back to the fail-fast wait/notify core when
//! no token (or no room) is available. Three named constructors cover
//! the three shapes the original exposes.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::atomics::{self, CasOutcome};
use crate::error::OsError;
use crate::wait::WaitQueue;

/// A counting semaphore: `tokens` available out of `max_tokens`
/// capacity, with `max_tokens == 0` meaning uncapped (see
/// [`Semaphore::new_unbounded`]).
pub struct Semaphore {
    tokens: AtomicU32,
    max_tokens: u32,
    wait_queue: UnsafeCell<WaitQueue>,
}

// Safety: `tokens` is only mutated through its own LDREX/STREX loop;
// `wait_queue` is only touched from within the kernel's wait/notify
// handlers, which serialize access. Meant to be shared as a `static`
// across tasks.
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// A counting semaphore of capacity `size` (0 means uncapped,
    /// matching `OS_semaphoreInitialise`'s size=0 special case),
    /// starting with `init_tokens` tokens available.
    ///
    /// `init_tokens` is clamped to `size` (when `size > 0`) and
    /// debug-asserted, matching `OS_semaphoreInitialise`'s
    /// `ASSERT_DEBUG` + reset-to-size behavior: a caller that gets
    /// this wrong is a programmer error, not a runtime condition to
    /// propagate (see [`crate::error`]).
    pub const fn new_counting(size: u32, init_tokens: u32) -> Self {
        let clamped = if size > 0 && init_tokens > size {
            size
        } else {
            init_tokens
        };
        Self {
            tokens: AtomicU32::new(clamped),
            max_tokens: size,
            wait_queue: UnsafeCell::new(WaitQueue::new()),
        }
    }

    /// A binary semaphore (capacity 1), matching
    /// `OS_semaphoreInitialiseBinary`. `init_full` should be 0 or 1;
    /// any other value is clamped to 1.
    pub const fn new_binary(init_full: u32) -> Self {
        Self::new_counting(1, init_full)
    }

    /// An uncapped counting semaphore starting empty, matching
    /// `OS_semaphoreInitialiseCounting`. `give` never blocks; the only
    /// overflow risk is the token count itself wrapping past
    /// `u32::MAX`, left to the caller to avoid per the original's own
    /// documented contract.
    pub const fn new_unbounded() -> Self {
        Self::new_counting(0, 0)
    }

    #[inline]
    fn reports_explicit_error(size: u32, init_tokens: u32) -> Result<(), OsError> {
        if size > 0 && init_tokens > size {
            Err(OsError::InitialTokensExceedCapacity)
        } else {
            Ok(())
        }
    }

    /// Checked counting constructor: same clamping as
    /// [`Semaphore::new_counting`], but reports the out-of-range
    /// initializer instead of silently clamping it, for callers that
    /// want to catch the mistake rather than rely on a debug assert.
    pub fn try_new_counting(size: u32, init_tokens: u32) -> Result<Self, OsError> {
        Self::reports_explicit_error(size, init_tokens)?;
        Ok(Self::new_counting(size, init_tokens))
    }

    #[inline]
    pub fn available_tokens(&self) -> u32 {
        self.tokens.load(Ordering::SeqCst)
    }

    /// Take one token, blocking until one is available.
    pub fn take(&self) {
        loop {
            let fail_fast_snapshot = crate::kernel::fail_fast_counter();
            let current = self.tokens.load(Ordering::SeqCst);

            if current > 0 {
                let outcome =
                    unsafe { atomics::try_compare_and_swap(self.tokens_ptr(), current, current - 1) };
                match outcome {
                    CasOutcome::Swapped => {
                        crate::kernel::notify(unsafe { &mut *self.wait_queue.get() });
                        return;
                    }
                    CasOutcome::Contended => continue,
                    CasOutcome::Unequal(_) => continue,
                }
            } else {
                unsafe {
                    crate::kernel::wait_current(&mut *self.wait_queue.get(), fail_fast_snapshot);
                }
            }
        }
    }

    /// Give back one token, blocking until there is room (capped
    /// semaphores only — an uncapped semaphore's `give` never blocks).
    pub fn give(&self) {
        loop {
            let fail_fast_snapshot = crate::kernel::fail_fast_counter();
            let current = self.tokens.load(Ordering::SeqCst);
            let has_room = self.max_tokens == 0 || current < self.max_tokens;

            if has_room {
                let outcome =
                    unsafe { atomics::try_compare_and_swap(self.tokens_ptr(), current, current + 1) };
                match outcome {
                    CasOutcome::Swapped => {
                        crate::kernel::notify(unsafe { &mut *self.wait_queue.get() });
                        return;
                    }
                    CasOutcome::Contended => continue,
                    CasOutcome::Unequal(_) => continue,
                }
            } else {
                unsafe {
                    crate::kernel::wait_current(&mut *self.wait_queue.get(), fail_fast_snapshot);
                }
            }
        }
    }

    #[inline]
    fn tokens_ptr(&self) -> *mut u32 {
        &self.tokens as *const AtomicU32 as *mut u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_constructor_clamps_excess_initial_tokens() {
        let s = Semaphore::new_counting(4, 10);
        assert_eq!(s.available_tokens(), 4);
    }

    #[test]
    fn try_new_counting_reports_excess_initial_tokens() {
        let err = Semaphore::try_new_counting(4, 10).err();
        assert_eq!(err, Some(OsError::InitialTokensExceedCapacity));
    }

    #[test]
    fn binary_semaphore_has_capacity_one() {
        let s = Semaphore::new_binary(1);
        assert_eq!(s.available_tokens(), 1);
        let s0 = Semaphore::new_binary(0);
        assert_eq!(s0.available_tokens(), 0);
    }

    #[test]
    fn unbounded_semaphore_starts_empty_and_accepts_many_gives() {
        crate::kernel::init();
        let s = Semaphore::new_unbounded();
        assert_eq!(s.available_tokens(), 0);
        for _ in 0..5 {
            s.give();
        }
        assert_eq!(s.available_tokens(), 5);
    }

    #[test]
    fn take_then_give_round_trips_token_count() {
        crate::kernel::init();
        let s = Semaphore::new_counting(2, 2);
        s.take();
        assert_eq!(s.available_tokens(), 1);
        s.give();
        assert_eq!(s.available_tokens(), 2);
    }
}
