//! # Supervisor-call dispatch
//!
//! Task code runs unprivileged on the process stack; every kernel
//! mutation happens in handler mode, reached only through the numbered
//! supervisor calls below. This mirrors `os_internal.h`'s
//! `_OS_SVC_StackFrame_t` plus the `__svc(N)`-delegate prototypes in the
//! same header (`_OS_wait`, `_OS_notify`, `_OS_taskExit`,
//! `_OS_removeTask`) — stable Rust has no `__svc(N)` pseudo-function
//! sugar, so the call number is recovered from the `svc` instruction's
//! own immediate operand instead of being baked into the function
//! signature by the compiler.
//!
//! On target, a task-facing function such as [`crate::kernel::yield_now`]
//! executes the `svc` instruction and traps into [`SVCall`]
//! (`arch::cortex_m4`), which recovers the stacked frame and calls
//! [`dispatch`]. On host builds there is no real privilege separation
//! to trap through, so the same task-facing function calls the handler
//! body directly, wrapped in the kernel's usual critical section — the
//! net effect (serialized access to kernel state) is identical.

use crate::task::StackFrame;

/// Numbered supervisor calls task code can request. Matches spec §4.1's
/// closed set, plus the `SLEEP` call `OS_sleep` issues.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvcNumber {
    EnableTick = 0,
    Schedule = 1,
    AddTask = 2,
    ExitTask = 3,
    YieldTask = 4,
    RemoveTask = 5,
    Wait = 6,
    Notify = 7,
    Sleep = 8,
}

/// The eight hardware-stacked registers visible to a supervisor-call
/// handler, in stacking order. Same shape as the upper half of
/// [`StackFrame`] — the CPU stacks exactly these eight words on any
/// exception entry, SVC included.
#[repr(C)]
pub struct SvcFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub psr: u32,
}

impl SvcFrame {
    /// Recover the svc immediate from the two-byte `svc #imm8`
    /// instruction at `pc - 2`. Standard Cortex-M idiom for reading the
    /// call number back out of the trapping instruction rather than a
    /// register, since `svc` carries its operand in the opcode.
    ///
    /// # Safety
    /// `self.pc` must be the address immediately after a 16-bit `svc`
    /// instruction, as guaranteed by the hardware's exception-entry
    /// stacking.
    pub unsafe fn svc_number(&self) -> u32 {
        let instr = core::ptr::read_volatile((self.pc - 2) as *const u16);
        (instr & 0x00FF) as u32
    }
}

// Compile-time check that `SvcFrame` really does line up with the
// hardware-stacked tail of `StackFrame` (same eight u32 fields, same
// order), since `arch::cortex_m4::SVCall` hands us a raw pointer typed
// as `*mut SvcFrame` into what is, in memory, a `StackFrame`.
const _: () = assert!(core::mem::size_of::<SvcFrame>() * 2 == core::mem::size_of::<StackFrame>());

/// Dispatch one supervisor call given its number and stacked frame.
///
/// Called from [`arch::cortex_m4::SVCall`](crate::arch::cortex_m4::SVCall)
/// with interrupts such that the handler runs to completion
/// (exception priority serializes it against SysTick/PendSV). Writes a
/// return value back into `frame.r0` for calls that produce one
/// (`ADD_TASK`), mirroring how the stacked `r0` becomes the visible
/// return register once the exception returns.
///
/// # Safety
/// Must only be called from SVCall with a frame pointer into the
/// faulting task's stack.
pub unsafe fn dispatch(num: u32, frame: *mut SvcFrame) {
    let r0 = (*frame).r0;
    let r1 = (*frame).r1;
    let r2 = (*frame).r2;

    if num == SvcNumber::EnableTick as u32 {
        crate::kernel::enable_tick_handler();
    } else if num == SvcNumber::YieldTask as u32 {
        crate::kernel::yield_now_handler();
    } else if num == SvcNumber::ExitTask as u32 {
        crate::kernel::exit_task_handler();
    } else if num == SvcNumber::RemoveTask as u32 {
        crate::kernel::remove_task_handler(r0 as *mut crate::task::Tcb);
    } else if num == SvcNumber::Sleep as u32 {
        crate::kernel::sleep_handler(r0);
    } else if num == SvcNumber::Wait as u32 {
        let blocked = crate::kernel::wait_handler(&mut *(r0 as *mut crate::wait::WaitQueue), r1);
        (*frame).r0 = blocked as u32;
    } else if num == SvcNumber::Notify as u32 {
        crate::kernel::notify_handler(&mut *(r0 as *mut crate::wait::WaitQueue));
    } else if num == SvcNumber::AddTask as u32 {
        let result = crate::kernel::add_task_handler(
            r0 as *mut crate::task::Tcb,
            r1 as u8,
        );
        (*frame).r0 = match result {
            Ok(()) => 0,
            Err(_) => u32::MAX,
        };
        let _ = r2;
    }
    // SCHEDULE needs no argument decoding; PendSV is triggered by the
    // caller after the svc returns, same as every other call above.
}
