//! # EqOS Configuration
//!
//! Compile-time constants governing the scheduler and system behavior.
//! All limits are fixed at compile time — no dynamic allocation.

/// Maximum number of non-idle tasks the system can manage simultaneously.
/// This bounds the static TCB array and the sleep-heap storage array
/// (which must be able to hold every task asleep at once). Increase with
/// care — each task consumes `STACK_WORDS * 4` bytes of RAM.
pub const MAX_TASKS: usize = 15;

/// Number of distinct scheduling priorities, including priority 0.
/// Priority 0 is reserved for the idle task and is never assigned to a
/// user task; user priorities run `1..=PRIORITY_MAX`.
pub const PRIORITY_LEVELS: usize = 5;

/// The highest usable task priority. Values passed to task
/// initialization above this are clamped to it.
pub const PRIORITY_MAX: u8 = (PRIORITY_LEVELS - 1) as u8;

/// SysTick frequency in Hz. One tick is one millisecond at the default
/// value. Determines scheduler tick granularity and the unit `OS_sleep`
/// counts in.
pub const TICK_HZ: u32 = 1000;

/// Per-task stack size in words. Must be large enough for the deepest
/// call chain plus the hardware exception frame (8 words) and the
/// software-saved context (8 words for R4-R11).
pub const STACK_WORDS: usize = 256;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Half of the `u32` tick-counter range. Used as the reference point for
/// overflow-safe wake-time comparisons in the sleep heap (see
/// `sleep::after`). A sleep duration must be strictly less than this to
/// have well-defined ordering; longer sleeps are a documented user
/// error (see the sleep heap module).
pub const HALF_RANGE: u32 = u32::MAX / 2;
