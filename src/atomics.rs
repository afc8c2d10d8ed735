//! # Exclusive-access primitives
//!
//! The mutex and semaphore implementations both need a load-link /
//! store-conditional loop: read a word, decide whether to change it,
//! and commit the change only if nothing else wrote to it in between.
//! On Cortex-M4 that is `ldrex`/`strex` against the local exclusive
//! monitor. This module wraps the two call sites that need it so the
//! asm lives in one place instead of duplicated in `sync::mutex` and
//! `sync::semaphore`.
//!
//! Host builds (`cfg(test)`) get a single-threaded fallback so the
//! surrounding logic can be exercised without real hardware: there is
//! no concurrent mutator to race against in a unit test, so a plain
//! load/compare/store is observationally identical to the hardware
//! primitive.

#[cfg(all(target_os = "none", target_arch = "arm"))]
mod hw {
    use core::arch::asm;

    /// Load-exclusive: read `*addr` and mark it as exclusively
    /// monitored by this core.
    #[inline(always)]
    pub unsafe fn load_exclusive(addr: *const u32) -> u32 {
        let value: u32;
        asm!("ldrex {0}, [{1}]", out(reg) value, in(reg) addr, options(nostack));
        value
    }

    /// Store-exclusive: write `value` to `*addr` only if the exclusive
    /// monitor set by the matching `load_exclusive` is still valid.
    /// Returns `true` on success.
    #[inline(always)]
    pub unsafe fn store_exclusive(value: u32, addr: *mut u32) -> bool {
        let status: u32;
        asm!("strex {0}, {1}, [{2}]", out(reg) status, in(reg) value, in(reg) addr, options(nostack));
        status == 0
    }

    /// `usize` flavours of the two primitives above. On this target
    /// `usize` and `u32` are the same width (Cortex-M4 is a 32-bit
    /// core), so this is the same `ldrex`/`strex` word form — kept as
    /// a distinct entry point so the mutex owner pointer (pointer-
    /// width, not always `u32`-width on a host test build) has a CAS
    /// to call that doesn't alias a wrong-sized word.
    #[inline(always)]
    pub unsafe fn load_exclusive_usize(addr: *const usize) -> usize {
        let value: usize;
        asm!("ldrex {0}, [{1}]", out(reg) value, in(reg) addr, options(nostack));
        value
    }

    #[inline(always)]
    pub unsafe fn store_exclusive_usize(value: usize, addr: *mut usize) -> bool {
        let status: u32;
        asm!("strex {0}, {1}, [{2}]", out(reg) status, in(reg) value, in(reg) addr, options(nostack));
        status == 0
    }

    /// Drop the local exclusive monitor without completing a store.
    /// Required before blocking (e.g. `_OS_wait`) so a stale monitor
    /// from an abandoned attempt can't let a later, unrelated
    /// `strex` elsewhere spuriously succeed.
    #[inline(always)]
    pub fn clear_exclusive() {
        unsafe { asm!("clrex", options(nostack)) };
    }

    /// Full data memory barrier. Needed after a successful
    /// `store_exclusive` that publishes ownership of a shared
    /// resource, so a subsequent read by the new owner cannot be
    /// reordered ahead of the store.
    #[inline(always)]
    pub fn data_memory_barrier() {
        unsafe { asm!("dmb", options(nostack)) };
    }
}

#[cfg(not(all(target_os = "none", target_arch = "arm")))]
mod host {
    use core::sync::atomic::{AtomicU32, Ordering};

    /// Single-threaded stand-in: no other core or interrupt handler
    /// can interleave with a host unit test, so a bare load already
    /// behaves like an uncontended `ldrex`.
    #[inline(always)]
    pub unsafe fn load_exclusive(addr: *const u32) -> u32 {
        (*(addr as *const AtomicU32)).load(Ordering::SeqCst)
    }

    #[inline(always)]
    pub unsafe fn store_exclusive(value: u32, addr: *mut u32) -> bool {
        (*(addr as *const AtomicU32)).store(value, Ordering::SeqCst);
        true
    }

    #[inline(always)]
    pub fn clear_exclusive() {}

    #[inline(always)]
    pub fn data_memory_barrier() {
        core::sync::atomic::fence(Ordering::SeqCst);
    }

    /// Host-test stand-in for the `usize` exclusive pair. A plain
    /// `AtomicUsize` round-trip, for the same reason the `u32` host
    /// fallback above is: nothing preempts a host unit test mid-load.
    #[inline(always)]
    pub unsafe fn load_exclusive_usize(addr: *const usize) -> usize {
        (*(addr as *const core::sync::atomic::AtomicUsize)).load(Ordering::SeqCst)
    }

    #[inline(always)]
    pub unsafe fn store_exclusive_usize(value: usize, addr: *mut usize) -> bool {
        (*(addr as *const core::sync::atomic::AtomicUsize)).store(value, Ordering::SeqCst);
        true
    }
}

#[cfg(all(target_os = "none", target_arch = "arm"))]
pub use hw::*;

#[cfg(not(all(target_os = "none", target_arch = "arm")))]
pub use host::*;

/// Compare-and-swap `*addr` from `expected` to `new` using a single
/// `ldrex`/`strex` attempt. Returns the value observed by the load:
/// if it equals `expected` and the store succeeded, the swap
/// happened; if it equals `expected` but the store failed, the caller
/// should retry; if it differs from `expected`, the swap did not
/// happen and the monitor is cleared for the caller.
#[inline]
pub unsafe fn try_compare_and_swap(addr: *mut u32, expected: u32, new: u32) -> CasOutcome {
    let observed = load_exclusive(addr);
    if observed != expected {
        clear_exclusive();
        return CasOutcome::Unequal(observed);
    }
    if store_exclusive(new, addr) {
        CasOutcome::Swapped
    } else {
        CasOutcome::Contended
    }
}

/// Result of a single `try_compare_and_swap` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The store committed; `*addr` is now `new`.
    Swapped,
    /// `*addr` already equaled `expected`, but another exclusive
    /// accessor intervened before the store. Retry from the load.
    Contended,
    /// `*addr` did not equal `expected`; its current value is given.
    Unequal(u32),
}

/// Pointer-width counterpart of [`try_compare_and_swap`], for CAS loops
/// over an owner pointer (e.g. a mutex's `tcb` field) rather than a
/// plain counter. Grounded on the same `OS_mutexAcquire` LDREX/STREX
/// loop, generalized to pointer width so a host test build (where
/// pointers are wider than `u32`) doesn't alias the wrong-sized word.
#[inline]
pub unsafe fn try_compare_and_swap_ptr<T>(
    addr: *mut *mut T,
    expected: *mut T,
    new: *mut T,
) -> PtrCasOutcome<T> {
    let observed = load_exclusive_usize(addr as *const usize) as *mut T;
    if observed != expected {
        clear_exclusive();
        return PtrCasOutcome::Unequal(observed);
    }
    if store_exclusive_usize(new as usize, addr as *mut usize) {
        PtrCasOutcome::Swapped
    } else {
        PtrCasOutcome::Contended
    }
}

/// Result of a single [`try_compare_and_swap_ptr`] attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrCasOutcome<T> {
    Swapped,
    Contended,
    Unequal(*mut T),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cas_swaps_when_equal() {
        let mut word: u32 = 5;
        let outcome = unsafe { try_compare_and_swap(&mut word as *mut u32, 5, 9) };
        assert_eq!(outcome, CasOutcome::Swapped);
        assert_eq!(word, 9);
    }

    #[test]
    fn cas_reports_unequal_without_writing() {
        let mut word: u32 = 5;
        let outcome = unsafe { try_compare_and_swap(&mut word as *mut u32, 4, 9) };
        assert_eq!(outcome, CasOutcome::Unequal(5));
        assert_eq!(word, 5);
    }

    #[test]
    fn ptr_cas_swaps_null_owner_to_new_owner() {
        let mut marker = 0u8;
        let owner_ptr: *mut u8 = &mut marker;
        let mut owner: *mut u8 = core::ptr::null_mut();
        let outcome =
            unsafe { try_compare_and_swap_ptr(&mut owner as *mut *mut u8, core::ptr::null_mut(), owner_ptr) };
        assert_eq!(outcome, PtrCasOutcome::Swapped);
        assert_eq!(owner, owner_ptr);
    }

    #[test]
    fn ptr_cas_reports_unequal_without_writing() {
        let mut a = 0u8;
        let mut b = 0u8;
        let mut owner: *mut u8 = &mut a;
        let outcome = unsafe {
            try_compare_and_swap_ptr(&mut owner as *mut *mut u8, core::ptr::null_mut(), &mut b)
        };
        assert_eq!(outcome, PtrCasOutcome::Unequal(&mut a as *mut u8));
        assert_eq!(owner, &mut a as *mut u8);
    }
}
