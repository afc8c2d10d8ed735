//! # Error taxonomy
//!
//! A small, non-allocating error type for the handful of kernel entry
//! points that can fail in a way worth reporting to the caller. Most
//! kernel operations (wait, notify, sleep, mutex/semaphore acquire)
//! never return an error: they park the caller until they can succeed,
//! by design (see the crate-level documentation). Programmer errors
//! that fall outside that category — over-capacity task creation, an
//! out-of-range priority, a malformed semaphore initializer — are
//! debug-asserted and, in release builds, clamped or silently ignored
//! rather than propagated, so the system stays live.

/// Errors returned by the small set of kernel APIs that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OsError {
    /// `MAX_TASKS` non-idle tasks are already registered with the
    /// scheduler; the new task was not added.
    TooManyTasks,
    /// A semaphore was initialized with more tokens than its capacity.
    /// In release builds the token count is clamped to the capacity
    /// and this is not returned; in debug builds it is also asserted.
    InitialTokensExceedCapacity,
    /// `OS_mutexRelease` (or equivalent) was called by a task that does
    /// not own the mutex. The release is silently ignored; this variant
    /// exists for callers that want to detect the misuse in tests.
    NotOwner,
}
