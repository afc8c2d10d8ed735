//! # EqOS — a fixed-priority round-robin RTOS kernel
//!
//! A preemptive, single-core real-time kernel for the ARM Cortex-M4:
//! task control blocks with an asm-friendly context switch, a
//! fixed-priority round-robin scheduler with a sleep heap, and a
//! fail-fast wait/notify core that the recursive mutex and counting
//! semaphore are both built on.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                   │
//! │     init() · create_task() · start() · yield_now()       │
//! │     sleep() · wait_current() · notify()                  │
//! ├──────────────┬────────────────────┬──────────────────────┤
//! │  Scheduler   │   SVC dispatch     │   Sync primitives    │
//! │  scheduler.rs│   svc.rs           │   sync::{Mutex,      │
//! │  ─ pick_next │   ─ SvcNumber      │   Semaphore}         │
//! │  ─ add_task  │   ─ dispatch()     │                      │
//! │  ─ wait/notify   sleep.rs         │   mempool.rs          │
//! │              │   ─ SleepHeap      │   queue.rs            │
//! ├──────────────┴────────────────────┴──────────────────────┤
//! │              Task Model (task.rs) · wait.rs               │
//! │    Tcb · TaskState · StackFrame · WaitQueue               │
//! ├────────────────────────────────────────────────────────┤
//! │            Arch Port (arch/cortex_m4.rs)                │
//! │    PendSV · SVCall · SysTick · Context Switch           │
//! ├────────────────────────────────────────────────────────┤
//! │         ARM Cortex-M4 Hardware (Thumb-2)                │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory model
//!
//! - **No heap**: all state is statically allocated.
//! - **No `alloc`**: pure `core`, plus `cortex-m`/`cortex-m-rt` for the
//!   hardware port.
//! - **Fixed-size TCB arena**: `[TcbSlot; MAX_TASKS]`, each slot
//!   carrying its own inline stack.
//! - **Critical sections**: `cortex_m::interrupt::free()` guards every
//!   place kernel state is mutated outside of a numbered supervisor
//!   call.
//!
//! ## Host tests
//!
//! `#![cfg_attr(not(test), no_std)]` lets `cargo test` link `std` on
//! the host so the scheduler, wait/notify, sleep heap, and sync
//! primitives can be exercised without real hardware; every ARM-only
//! code path (the `svc` trap itself, the naked exception handlers) is
//! gated behind `target_os = "none", target_arch = "arm"` and has a
//! direct-call host equivalent, per `kernel.rs`'s module docs.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod config;
pub mod error;
pub mod hardfault;
pub mod kernel;
pub mod mempool;
pub mod queue;
pub mod scheduler;
pub mod sleep;
pub mod sync;
pub mod svc;
pub mod task;
pub mod wait;

mod atomics;
