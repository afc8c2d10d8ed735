//! # Firmware demonstration
//!
//! Four tasks exercising the round-robin scheduler, a shared recursive
//! mutex, a counting semaphore, and `OS_sleep`:
//!
//! | Task | Priority | Demonstrates |
//! |------|----------|--------------|
//! | `producer_task` | 2 | `Semaphore::give`, periodic `sleep` |
//! | `consumer_task` | 2 | `Semaphore::take`, round-robin fairness with `producer_task` |
//! | `logger_task` | 3 | `Mutex` recursive acquire/release around shared counter |
//! | `idle_reporter_task` | 1 | low-priority background work, preempted by the above |

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use panic_halt as _;

use eqos::kernel;
use eqos::sync::{Mutex, Semaphore};

/// Signals data availability between `producer_task` and
/// `consumer_task` — a binary-ish counting semaphore capped at 4
/// outstanding items.
static ITEMS_READY: Semaphore = Semaphore::new_counting(4, 0);

/// Guards `SHARED_COUNTER`. Demonstrates the recursive acquire by
/// calling a helper that itself acquires the same mutex before the
/// caller releases it.
static COUNTER_LOCK: Mutex = Mutex::new();
static mut SHARED_COUNTER: u32 = 0;

extern "C" fn producer_task(_arg: *mut ()) -> ! {
    loop {
        for _ in 0..3 {
            ITEMS_READY.give();
        }
        kernel::sleep(50);
    }
}

extern "C" fn consumer_task(_arg: *mut ()) -> ! {
    loop {
        ITEMS_READY.take();
        bump_counter();
    }
}

/// Acquires `COUNTER_LOCK`, recursively re-acquires it through
/// `bump_counter_inner`, then releases twice — exercising the
/// recursive-mutex path end to end.
fn bump_counter() {
    COUNTER_LOCK.acquire();
    bump_counter_inner();
    let _ = COUNTER_LOCK.release();
}

fn bump_counter_inner() {
    COUNTER_LOCK.acquire();
    unsafe {
        SHARED_COUNTER = SHARED_COUNTER.wrapping_add(1);
    }
    let _ = COUNTER_LOCK.release();
}

extern "C" fn logger_task(_arg: *mut ()) -> ! {
    loop {
        kernel::sleep(200);
        COUNTER_LOCK.acquire();
        let count = unsafe { SHARED_COUNTER };
        log::info!("logger_task: shared_counter={count}");
        let _ = COUNTER_LOCK.release();
    }
}

extern "C" fn idle_reporter_task(_arg: *mut ()) -> ! {
    loop {
        kernel::yield_now();
    }
}

#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();

    kernel::init();

    kernel::create_task(producer_task, core::ptr::null_mut(), 2)
        .expect("failed to create producer_task");
    kernel::create_task(consumer_task, core::ptr::null_mut(), 2)
        .expect("failed to create consumer_task");
    kernel::create_task(logger_task, core::ptr::null_mut(), 3)
        .expect("failed to create logger_task");
    kernel::create_task(idle_reporter_task, core::ptr::null_mut(), 1)
        .expect("failed to create idle_reporter_task");

    kernel::start(cp)
}
