//! # Task Control Block
//!
//! The task model: the per-task state the scheduler, wait queues, and
//! the sleep heap all link against, plus the stack-frame layout the
//! context switcher expects to find at `Tcb::sp`.
//!
//! A `Tcb` is never moved once handed to the kernel — every data
//! structure that references a task (ready list, wait queue, sleep
//! heap) does so through a raw `*mut Tcb` rather than an index or a
//! shared handle, so the task's address must stay stable for its
//! whole lifetime. In practice tasks live in a static [`TcbSlot`]
//! arena (see `kernel`) and are never deallocated.

use crate::config::{PRIORITY_MAX, STACK_WORDS};
use bitflags::bitflags;

bitflags! {
    /// Transient scheduling state, stored inline in the TCB so a single
    /// load tells the scheduler and the wait/sleep subsystems what to
    /// do with a task.
    ///
    /// Bit 3 is reserved for priority inheritance and is never set by
    /// this kernel; a future mutex-with-inheritance implementation
    /// would claim it (see the open question recorded in the design
    /// notes).
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct TaskState: u32 {
        /// Set by `OS_yield`; cleared once the scheduler has honored it.
        const YIELD = 1 << 0;
        /// Task is parked in the sleep heap, not in any ready list.
        const SLEEP = 1 << 1;
        /// Task is parked in a wait queue (mutex, semaphore, or a
        /// caller-supplied resource), not in any ready list.
        const WAIT = 1 << 2;
        /// Reserved for priority inheritance. Always clear today.
        const PRIORITY_INHERITED = 1 << 3;
    }
}

/// The hardware + software exception frame laid out on a task's stack
/// the first time it runs.
///
/// Field order matches what the PendSV handler pushes and pops:
/// `r4`..`r11` are saved by software on every switch; `r0`..`psr` are
/// the frame the Cortex-M4 itself stacks on exception entry and
/// unstacks on exception return. A task that has run before has this
/// shape only by accident of history — the switcher treats the stack
/// as an opaque region below `sp`, it never reinterprets this struct
/// after the first dispatch.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct StackFrame {
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub psr: u32,
}

/// Number of 32-bit words in [`StackFrame`].
pub const FRAME_WORDS: usize = core::mem::size_of::<StackFrame>() / 4;

/// Task Control Block.
///
/// `sp` must remain the first field: the asm switcher dereferences a
/// `*mut Tcb` as a `*mut *mut u32` to read and write the saved stack
/// pointer without knowing anything else about the struct's layout.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Tcb {
    /// Saved stack pointer (PSP). Valid whenever the task is not
    /// `Running`; while running, the live PSP register is authoritative
    /// and this field is stale until the next switch saves it back.
    pub sp: *mut u32,

    /// Scheduling state bits (yield/sleep/wait).
    pub state: TaskState,

    /// Fixed priority, `1..=PRIORITY_MAX`. Priority 0 is reserved for
    /// the idle task and is never assigned by `Tcb::init`.
    pub priority: u8,

    /// Scratch word available to whichever subsystem currently owns
    /// the task. The sleep heap uses it to hold the absolute wake
    /// tick; it is otherwise unused.
    pub data: u32,

    /// Doubly-linked intrusive list pointers. Meaning depends on which
    /// list the task is currently threaded into (a priority ready
    /// list, or a wait queue's singly-linked `next` chain — `prev` is
    /// unused while waiting). Null when the task is not linked
    /// anywhere, which should only be true for a split second during
    /// a move between lists under a critical section.
    pub prev: *mut Tcb,
    pub next: *mut Tcb,
}

// Safety: a `Tcb` is only ever touched from kernel code running with
// interrupts masked (critical sections) or from the exception handlers
// that own it for the duration of a switch. It is never shared across
// an actual OS thread boundary, so these impls just satisfy the
// compiler about the raw pointer fields.
unsafe impl Send for Tcb {}
unsafe impl Sync for Tcb {}

impl Tcb {
    /// An unlinked, unscheduled placeholder. Used to fill the static
    /// TCB arena before each slot is claimed by `init`.
    pub const fn empty() -> Self {
        Self {
            sp: core::ptr::null_mut(),
            state: TaskState::empty(),
            priority: 0,
            data: 0,
            prev: core::ptr::null_mut(),
            next: core::ptr::null_mut(),
        }
    }

    /// Lay down the initial stack frame for a new task and bind this
    /// TCB to it.
    ///
    /// `stack_top` must point one-past-the-end of the task's stack
    /// region (the usual C convention); it is rounded down to an
    /// 8-byte boundary before the frame is carved out, since the AAPCS
    /// requires 8-byte stack alignment at a function call boundary and
    /// the frame's `pc` is entered as if by a call.
    ///
    /// `entry` is run with the CPU in Thread mode, unprivileged,
    /// using the process stack — it must never return; `task_exit` is
    /// stacked as its `lr` so that if it does return anyway, control
    /// goes somewhere well-defined instead of off into the weeds.
    pub fn init(
        &mut self,
        stack_top: *mut u32,
        entry: extern "C" fn(*mut ()) -> !,
        arg: *mut (),
        priority: u8,
        task_exit: extern "C" fn() -> !,
    ) {
        let priority = if (1..=PRIORITY_MAX).contains(&priority) {
            priority
        } else {
            PRIORITY_MAX
        };
        let aligned = (stack_top as usize) & !0x7;
        let frame_addr = aligned - FRAME_WORDS * 4;
        let frame = frame_addr as *mut StackFrame;

        // Safety: frame_addr is within the task's own stack region
        // (the caller guarantees stack_top bounds a region at least
        // FRAME_WORDS words long) and is correctly aligned for
        // StackFrame (4-byte fields, word-aligned address).
        unsafe {
            core::ptr::write(
                frame,
                StackFrame {
                    r4: 0,
                    r5: 0,
                    r6: 0,
                    r7: 0,
                    r8: 0,
                    r9: 0,
                    r10: 0,
                    r11: 0,
                    r0: arg as u32,
                    r1: 0,
                    r2: 0,
                    r3: 0,
                    r12: 0,
                    lr: task_exit as usize as u32,
                    pc: entry as usize as u32,
                    // Thumb bit set, no other exception-return flags.
                    psr: 0x0100_0000,
                },
            );
        }

        self.sp = frame_addr as *mut u32;
        self.state = TaskState::empty();
        self.priority = priority;
        self.data = 0;
        self.prev = core::ptr::null_mut();
        self.next = core::ptr::null_mut();
    }

    #[inline]
    pub fn is_yielding(&self) -> bool {
        self.state.contains(TaskState::YIELD)
    }

    #[inline]
    pub fn is_sleeping(&self) -> bool {
        self.state.contains(TaskState::SLEEP)
    }

    #[inline]
    pub fn is_waiting(&self) -> bool {
        self.state.contains(TaskState::WAIT)
    }
}

/// One arena slot: a TCB plus its dedicated stack, so the kernel's
/// static task table is a single contiguous array with no pointer
/// indirection to the stack memory.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct TcbSlot {
    pub tcb: Tcb,
    pub stack: [u32; STACK_WORDS],
    /// Whether this slot currently holds a live task. Slots are never
    /// reclaimed mid-run today (see `kernel::remove_task`, which frees
    /// the slot but the arena does not compact), so this just guards
    /// against double-allocating a slot.
    pub active: bool,
}

impl TcbSlot {
    pub const fn empty() -> Self {
        Self {
            tcb: Tcb::empty(),
            stack: [0u32; STACK_WORDS],
            active: false,
        }
    }

    /// Top-of-stack pointer (one past the last word) for this slot,
    /// as required by `Tcb::init`.
    #[inline]
    pub fn stack_top(&mut self) -> *mut u32 {
        // Safety: computing a one-past-the-end pointer into our own
        // array is always valid.
        unsafe { self.stack.as_mut_ptr().add(STACK_WORDS) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn dummy_entry(_arg: *mut ()) -> ! {
        loop {}
    }

    extern "C" fn dummy_exit() -> ! {
        loop {}
    }

    #[test]
    fn empty_tcb_is_unlinked_and_unscheduled() {
        let tcb = Tcb::empty();
        assert!(tcb.sp.is_null());
        assert!(tcb.prev.is_null());
        assert!(tcb.next.is_null());
        assert_eq!(tcb.priority, 0);
        assert!(tcb.state.is_empty());
    }

    #[test]
    fn init_clamps_priority_to_range() {
        let mut slot = TcbSlot::empty();
        let top = slot.stack_top();
        slot.tcb
            .init(top, dummy_entry, core::ptr::null_mut(), 255, dummy_exit);
        assert_eq!(slot.tcb.priority, PRIORITY_MAX);

        let mut slot2 = TcbSlot::empty();
        let top2 = slot2.stack_top();
        slot2
            .tcb
            .init(top2, dummy_entry, core::ptr::null_mut(), 0, dummy_exit);
        assert_eq!(slot2.tcb.priority, PRIORITY_MAX);
    }

    #[test]
    fn init_lays_down_frame_readable_as_stack_frame() {
        let mut slot = TcbSlot::empty();
        let top = slot.stack_top();
        let arg = 0x1234_5678usize as *mut ();
        slot.tcb.init(top, dummy_entry, arg, 2, dummy_exit);

        let frame = slot.tcb.sp as *const StackFrame;
        // Safety: sp was just set by init to point at a valid frame
        // within slot.stack.
        let frame = unsafe { &*frame };
        assert_eq!(frame.r0, arg as u32);
        assert_eq!(frame.lr, dummy_exit as usize as u32);
        assert_eq!(frame.pc, dummy_entry as usize as u32);
        assert_eq!(frame.psr, 0x0100_0000);
        assert_eq!(frame.r4, 0);
        assert_eq!(frame.r11, 0);
    }

    #[test]
    fn init_leaves_frame_8_byte_aligned() {
        let mut slot = TcbSlot::empty();
        let top = slot.stack_top();
        slot.tcb.init(top, dummy_entry, core::ptr::null_mut(), 1, dummy_exit);
        assert_eq!(slot.tcb.sp as usize % 8, 0);
    }

    #[test]
    fn state_flags_round_trip() {
        let mut tcb = Tcb::empty();
        assert!(!tcb.is_sleeping());
        tcb.state.insert(TaskState::SLEEP);
        assert!(tcb.is_sleeping());
        assert!(!tcb.is_waiting());
        tcb.state.remove(TaskState::SLEEP);
        tcb.state.insert(TaskState::WAIT);
        assert!(tcb.is_waiting());
        assert!(!tcb.is_sleeping());
    }
}
