//! # Synchronization primitives
//!
//! The two blocking primitives task code actually uses: a recursive
//! [`Mutex`] for mutual exclusion and a counting [`Semaphore`] for
//! availability signaling. Both are built directly on top of the
//! fail-fast LL/SC wait/notify core in [`crate::kernel`] and
//! [`crate::wait`] — neither primitive touches a ready list or the
//! scheduler itself.

pub mod mutex;
pub mod semaphore;

pub use mutex::Mutex;
pub use semaphore::Semaphore;
