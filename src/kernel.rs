//! # Kernel
//!
//! Global kernel state, the numbered supervisor-call surface, and the
//! safe task-facing API that wraps it.
//!
//! Task code never touches scheduler state directly — every mutation
//! happens inside a numbered SVC handler (`dispatch_svc`) or, on the
//! host test target where there is no real privilege separation to
//! trap through, inside an equivalent function called directly under
//! [`critical_section`]. Either way, ready lists, wait queues, and the
//! sleep heap are only ever mutated from one serialized place,
//! matching spec §5's "all kernel data structures are mutated only in
//! handler mode" rule.
//!
//! ## Startup sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()          configure idle task, globals
//!         ├─► kernel::create_task()   register tasks (×N)
//!         └─► kernel::start()         launch scheduler, never returns
//!               ├─► configure SysTick (only if scheduler.preemptive())
//!               ├─► set PendSV/SysTick priorities
//!               └─► arch::start_first_task()
//! ```

use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch::cortex_m4;
use crate::config::MAX_TASKS;
use crate::error::OsError;
use crate::scheduler::{RoundRobin, Scheduler};
#[cfg(all(target_os = "none", target_arch = "arm"))]
use crate::svc::SvcNumber;
use crate::task::{Tcb, TcbSlot};
use crate::wait::WaitQueue;

/// Issue supervisor call `N` with up to three word arguments, returning
/// whatever the handler wrote back into `r0`.
///
/// On target this traps through the real `svc` instruction into
/// [`crate::arch::cortex_m4::SVCall`], which recovers the frame and
/// calls [`crate::svc::dispatch`] — the only way unprivileged task code
/// reaches kernel state, per spec §4.1 and §5. Host builds have no
/// second privilege level to trap through, so callers of this module's
/// public functions call the `*_handler` functions directly instead;
/// `svc_call` itself is only ever compiled for the ARM target.
#[cfg(all(target_os = "none", target_arch = "arm"))]
#[inline(always)]
unsafe fn svc_call<const N: u32>(mut r0: u32, r1: u32, r2: u32) -> u32 {
    core::arch::asm!(
        "svc {n}",
        n = const N,
        inout("r0") r0,
        in("r1") r1,
        in("r2") r2,
        options(nostack, preserves_flags),
    );
    r0
}

/// Run `f` with interrupts masked, matching the teacher's own
/// `sync::critical_section` helper (itself a thin wrapper over
/// `cortex_m::interrupt::free`). Host builds have no interrupts to
/// mask and no second thread to race with, so `f` just runs directly —
/// mirroring the `hw`/`host` split `atomics.rs` already uses for its
/// LL/SC primitives.
#[cfg(all(target_os = "none", target_arch = "arm"))]
#[inline(always)]
fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    cortex_m::interrupt::free(|_cs| f())
}

#[cfg(not(all(target_os = "none", target_arch = "arm")))]
#[inline(always)]
fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

/// Monotonic counter incremented by every `notify`. Snapshotted by a
/// would-be waiter before its LL/SC attempt; a mismatch on recheck
/// means a notify raced ahead and the wait should be skipped in favor
/// of an immediate retry.
static FAIL_FAST: AtomicU32 = AtomicU32::new(0);

/// Tick counter, incremented once per `SysTick` at `config::TICK_HZ`.
/// Wraps at `u32::MAX`; all comparisons against it go through
/// `sleep::after`.
static TICKS: AtomicU32 = AtomicU32::new(0);

pub(crate) fn fail_fast_counter() -> u32 {
    FAIL_FAST.load(Ordering::SeqCst)
}

/// Ticks elapsed since `start()`. Public per spec §6's `OS_elapsedTicks`.
pub fn elapsed_ticks() -> u32 {
    TICKS.load(Ordering::SeqCst)
}

/// The kernel's global, singleton state: the scheduler, the static
/// TCB arena, the idle task, and the currently running task pointer.
///
/// Modeled as one struct behind one `static mut` rather than separate
/// globals, per spec §9's "singleton kernel context acquired by
/// privileged handlers" design note.
struct Kernel {
    scheduler: RoundRobin,
    tasks: [TcbSlot; MAX_TASKS],
    idle: TcbSlot,
    current: *mut Tcb,
}

unsafe impl Send for Kernel {}
unsafe impl Sync for Kernel {}

impl Kernel {
    const fn new() -> Self {
        Self {
            scheduler: RoundRobin::new(),
            tasks: [TcbSlot::empty(); MAX_TASKS],
            idle: TcbSlot::empty(),
            current: core::ptr::null_mut(),
        }
    }
}

static mut KERNEL: Kernel = Kernel::new();

extern "C" fn idle_entry(_arg: *mut ()) -> ! {
    loop {
        #[cfg(all(target_os = "none", target_arch = "arm"))]
        cortex_m::asm::wfi();
        #[cfg(not(all(target_os = "none", target_arch = "arm")))]
        core::hint::spin_loop();
    }
}

/// Stacked on every task's initial frame as `lr`, in case a task
/// entry point that is declared `-> !` somehow returns anyway.
extern "C" fn task_exit_trampoline() -> ! {
    exit_task();
    loop {
        #[cfg(all(target_os = "none", target_arch = "arm"))]
        cortex_m::asm::wfi();
        #[cfg(not(all(target_os = "none", target_arch = "arm")))]
        core::hint::spin_loop();
    }
}

/// Initialize the kernel. Must be called exactly once, before any
/// other kernel function, from the main thread.
pub fn init() {
    critical_section(|| unsafe {
        KERNEL = Kernel::new();
        let top = KERNEL.idle.stack_top();
        KERNEL
            .idle
            .tcb
            .init(top, idle_entry, core::ptr::null_mut(), 1, task_exit_trampoline);
        // Priority 0 is reserved for idle and is never assigned by
        // `Tcb::init`'s clamp; set it directly. The idle task is
        // never inserted into a ready bucket, so this is the only
        // place its priority field is read (never for list indexing).
        KERNEL.idle.tcb.priority = 0;
        KERNEL.idle.active = true;
        KERNEL.current = &mut KERNEL.idle.tcb as *mut Tcb;
    });
}

/// Create a new task and register it with the scheduler.
///
/// Combines what spec §6 lists as two calls (`OS_initialiseTCB` then
/// `OS_addTask`) into one, mirroring the teacher's own
/// `kernel::create_task`, which made the same ergonomic choice over
/// the original two-step C API.
///
/// Called from `main()` before [`start`], while still privileged —
/// there is no second privilege level to trap through yet, so this
/// goes straight to [`add_task_handler`] rather than through the
/// `ADD_TASK` SVC (which exists for a task to register a sibling task
/// at runtime, after the scheduler is already running).
pub fn create_task(
    entry: extern "C" fn(*mut ()) -> !,
    arg: *mut (),
    priority: u8,
) -> Result<usize, OsError> {
    critical_section(|| unsafe {
        let slot_id = KERNEL
            .tasks
            .iter()
            .position(|slot| !slot.active)
            .ok_or(OsError::TooManyTasks)?;

        let top = KERNEL.tasks[slot_id].stack_top();
        KERNEL.tasks[slot_id]
            .tcb
            .init(top, entry, arg, priority, task_exit_trampoline);
        KERNEL.tasks[slot_id].active = true;

        let tcb_ptr = &mut KERNEL.tasks[slot_id].tcb as *mut Tcb;
        KERNEL.scheduler.add_task(tcb_ptr).map(|()| slot_id)
    })
}

/// `ADD_TASK` handler body: register an already-initialized, inactive
/// TCB with the scheduler. `tcb` must point into the static arena (a
/// slot obtained the same way [`create_task`] obtains one); this is
/// what [`crate::svc::dispatch`] calls for `SvcNumber::AddTask`.
///
/// # Safety
/// `tcb` must be a valid, currently-unlinked `Tcb` belonging to the
/// kernel's own arena.
pub(crate) unsafe fn add_task_handler(tcb: *mut Tcb, _priority: u8) -> Result<(), OsError> {
    critical_section(|| KERNEL.scheduler.add_task(tcb))
}

/// Start the scheduler. **Does not return.**
///
/// Configures the tick timer (if the installed scheduler wants
/// preemption), sets PendSV/SysTick to the lowest interrupt priority,
/// and launches the highest-priority ready task — or the idle task,
/// if none was created.
///
/// Spec §4.2 describes `ENABLE_TICK` as issued by task code *after*
/// dropping to unprivileged mode. Here it is invoked directly, one
/// instruction before that drop, because at this point in boot there
/// is still only one execution context and nothing to race against —
/// the SVC trap exists for the steady-state case where a task
/// re-requests tick configuration, not for this one-time bootstrap.
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    enable_tick_handler();
    if KERNEL_SCHEDULER_IS_PREEMPTIVE {
        cortex_m4::configure_systick(&mut core_peripherals.SYST);
    }
    cortex_m4::set_interrupt_priorities();

    let first_sp = critical_section(|| unsafe {
        let next = KERNEL.scheduler.pick_next(elapsed_ticks());
        let next = if next.is_null() {
            &mut KERNEL.idle.tcb as *mut Tcb
        } else {
            next
        };
        KERNEL.current = next;
        (*next).sp
    });

    unsafe { cortex_m4::start_first_task(first_sp) }
}

// The round-robin scheduler is always preemptive; kept as a constant
// rather than an instance query so `start()` can read it before
// taking the critical section that owns the scheduler.
const KERNEL_SCHEDULER_IS_PREEMPTIVE: bool = true;

/// `ENABLE_TICK` handler body: a no-op unless the installed scheduler
/// wants preemption — spec §4.1 — in which case the tick timer was
/// already configured by [`start`]. Kept as its own function (and its
/// own `SvcNumber`) so a scheduler swap that changes its mind about
/// preemption mid-run has somewhere to ask for it.
pub(crate) fn enable_tick_handler() {
    log::trace!("kernel: enable_tick (preemptive={})", KERNEL_SCHEDULER_IS_PREEMPTIVE);
}

/// Voluntarily yield the CPU. The current task is moved to the back
/// of its priority's ready list and a reschedule is requested.
pub fn yield_now() {
    #[cfg(all(target_os = "none", target_arch = "arm"))]
    unsafe {
        svc_call::<{ SvcNumber::YieldTask as u32 }>(0, 0, 0);
    }
    #[cfg(not(all(target_os = "none", target_arch = "arm")))]
    yield_now_handler();
    #[cfg(all(target_os = "none", target_arch = "arm"))]
    cortex_m4::trigger_pendsv();
}

pub(crate) fn yield_now_handler() {
    critical_section(|| unsafe {
        let current = KERNEL.current;
        (*current).state.insert(crate::task::TaskState::YIELD);
    });
}

/// Terminate the calling task permanently. Never returns.
pub fn exit_task() -> ! {
    #[cfg(all(target_os = "none", target_arch = "arm"))]
    unsafe {
        svc_call::<{ SvcNumber::ExitTask as u32 }>(0, 0, 0);
    }
    #[cfg(not(all(target_os = "none", target_arch = "arm")))]
    exit_task_handler();
    #[cfg(all(target_os = "none", target_arch = "arm"))]
    cortex_m4::trigger_pendsv();
    loop {
        #[cfg(all(target_os = "none", target_arch = "arm"))]
        cortex_m::asm::wfi();
        #[cfg(not(all(target_os = "none", target_arch = "arm")))]
        core::hint::spin_loop();
    }
}

pub(crate) fn exit_task_handler() {
    critical_section(|| unsafe {
        let current = KERNEL.current;
        KERNEL.scheduler.exit_task(current);
        for slot in KERNEL.tasks.iter_mut() {
            if &mut slot.tcb as *mut Tcb == current {
                slot.active = false;
            }
        }
    });
}

/// `REMOVE_TASK` handler body: unlink an arbitrary task from its ready
/// list without changing the scheduler's live task count. Exposed as
/// its own SVC (spec §4.1) for callers that need to pull a task out of
/// rotation without it counting as an exit (e.g. a future
/// suspend/resume API); `OS_sleep` does not route through this —
/// `Scheduler::sleep` already combines the heap insert and the ready-
/// list removal itself, per the ordering spec §4.8 requires.
///
/// # Safety
/// `tcb` must currently be linked into one of the ready lists.
pub(crate) unsafe fn remove_task_handler(tcb: *mut Tcb) {
    critical_section(|| {
        KERNEL.scheduler.remove(tcb);
    });
}

/// The currently running task's TCB pointer.
///
/// # Safety
/// The returned pointer is only valid to dereference from within a
/// critical section or handler context; task code should treat it as
/// opaque identity, not a mutable handle.
pub fn current_tcb() -> *mut Tcb {
    critical_section(|| unsafe { KERNEL.current })
}

/// Put the calling task to sleep for at least `ms` ticks (1 tick = 1
/// ms at the default `TICK_HZ`).
///
/// `ms` must be strictly less than `config::HALF_RANGE` ticks; longer
/// sleeps have undefined wake order (see `sleep::after`).
pub fn sleep(ms: u32) {
    #[cfg(all(target_os = "none", target_arch = "arm"))]
    unsafe {
        svc_call::<{ SvcNumber::Sleep as u32 }>(ms, 0, 0);
    }
    #[cfg(not(all(target_os = "none", target_arch = "arm")))]
    sleep_handler(ms);
    #[cfg(all(target_os = "none", target_arch = "arm"))]
    cortex_m4::trigger_pendsv();
}

pub(crate) fn sleep_handler(ms: u32) {
    critical_section(|| unsafe {
        let now = elapsed_ticks();
        let current = KERNEL.current;
        debug_assert!(ms < crate::config::HALF_RANGE, "sleep duration too long");
        (*current).data = now.wrapping_add(ms);
        KERNEL.scheduler.sleep(current, now);
    });
}

/// Park the current task on `queue` unless `fail_fast_snapshot` is
/// already stale (a `notify` raced ahead of the caller's failed LL/SC
/// attempt). Called by the mutex and semaphore implementations, which
/// route through the `WAIT` SVC on target so the actual ready-list
/// surgery always happens in handler mode, per spec §5.
///
/// # Safety
/// Must only be called from task context with `queue` belonging to
/// the primitive the caller failed to acquire.
pub(crate) unsafe fn wait_current(queue: &mut WaitQueue, fail_fast_snapshot: u32) {
    #[cfg(all(target_os = "none", target_arch = "arm"))]
    let blocked = svc_call::<{ SvcNumber::Wait as u32 }>(
        queue as *mut WaitQueue as u32,
        fail_fast_snapshot,
        0,
    ) != 0;
    #[cfg(not(all(target_os = "none", target_arch = "arm")))]
    let blocked = wait_handler(queue, fail_fast_snapshot);

    #[cfg(all(target_os = "none", target_arch = "arm"))]
    if blocked {
        cortex_m4::trigger_pendsv();
    }
    #[cfg(not(all(target_os = "none", target_arch = "arm")))]
    let _ = blocked;
}

/// `WAIT` handler body. Returns whether the caller actually blocked
/// (false means a notify raced ahead and the caller should retry its
/// LL/SC instead).
///
/// # Safety
/// Same as [`wait_current`].
pub(crate) unsafe fn wait_handler(queue: &mut WaitQueue, fail_fast_snapshot: u32) -> bool {
    critical_section(|| {
        if fail_fast_snapshot != fail_fast_counter() {
            return false;
        }
        let current = KERNEL.current;
        KERNEL.scheduler.wait(queue, current, fail_fast_snapshot);
        true
    })
}

/// Increment the fail-fast counter, clear the exclusive-access
/// monitor, and wake the highest-priority waiter on `queue`, if any.
/// Called by the mutex and semaphore implementations on every
/// successful give/release.
///
/// The fail-fast increment and exclusive-monitor clear happen here,
/// outside the `NOTIFY` SVC, so that a racing task's in-flight
/// `ldrex`/`strex` sees the cleared monitor and the bumped counter
/// immediately rather than only after the handler has finished
/// unqueueing a waiter — matching `_OS_notify`'s ordering in
/// `wait.c`/`mutex.c`.
pub(crate) fn notify(queue: &mut WaitQueue) {
    FAIL_FAST.fetch_add(1, Ordering::SeqCst);
    crate::atomics::clear_exclusive();
    #[cfg(all(target_os = "none", target_arch = "arm"))]
    unsafe {
        svc_call::<{ SvcNumber::Notify as u32 }>(queue as *mut WaitQueue as u32, 0, 0);
    }
    #[cfg(not(all(target_os = "none", target_arch = "arm")))]
    unsafe {
        notify_handler(queue);
    }
}

/// `NOTIFY` handler body: wake the highest-priority waiter on `queue`.
///
/// # Safety
/// Caller must hold the kernel's critical section (the SVC dispatcher
/// satisfies this by construction; the host path takes one itself).
pub(crate) unsafe fn notify_handler(queue: &mut WaitQueue) {
    critical_section(|| {
        KERNEL.scheduler.notify(queue);
    });
}

// ---------------------------------------------------------------------------
// ISR-facing entry points (called from arch::cortex_m4)
// ---------------------------------------------------------------------------

/// Called from the `SysTick` handler. Increments the tick counter and
/// returns whether a PendSV reschedule should be requested: true once
/// per tick, since the round-robin scheduler's fairness depends on
/// the periodic preemption point.
pub(crate) fn on_tick() {
    TICKS.fetch_add(1, Ordering::SeqCst);
}

/// Called from `PendSV` to save the outgoing task's stack pointer.
///
/// # Safety
/// Must only be called from the PendSV handler with interrupts
/// effectively serialized (PendSV runs at the lowest priority and
/// cannot itself be reentered).
pub(crate) unsafe fn save_outgoing_sp(sp: *mut u32) {
    if !KERNEL.current.is_null() {
        (*KERNEL.current).sp = sp;
    }
}

/// Called from `PendSV` to pick and record the incoming task,
/// returning its saved stack pointer.
///
/// If the outgoing task was marked `YIELD`, clear the flag and put it
/// back at the tail of its bucket (it is already there by
/// round-robin construction — clearing the flag is the only work
/// needed, since `pick_next`'s cursor advance already rotated it to
/// the back on the prior dispatch).
///
/// # Safety
/// Must only be called from the PendSV handler.
pub(crate) unsafe fn do_context_switch() -> *mut u32 {
    let current = KERNEL.current;
    if !current.is_null() {
        (*current).state.remove(crate::task::TaskState::YIELD);
    }
    let next = KERNEL.scheduler.pick_next(elapsed_ticks());
    let next = if next.is_null() {
        &mut KERNEL.idle.tcb as *mut Tcb
    } else {
        next
    };
    KERNEL.current = next;
    (*next).sp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_fast_counter_starts_at_zero_and_is_monotonic() {
        // FAIL_FAST is a module-level static shared across tests run
        // in the same process; only assert monotonicity, not a fixed
        // starting value.
        let before = fail_fast_counter();
        let mut queue = WaitQueue::new();
        notify(&mut queue);
        let after = fail_fast_counter();
        assert!(after > before);
    }
}
