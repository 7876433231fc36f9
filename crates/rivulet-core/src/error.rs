//! Error types for invalid use of the disposable and scheduler primitives.
//!
//! Disposal itself is infallible and idempotent; these errors cover the few
//! operations that must reject bad usage synchronously instead.

/// Errors surfaced immediately to the caller on invalid usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// A single-assignment slot was assigned a second time
    #[error("disposable has already been assigned")]
    AlreadyAssigned,

    /// A dependent handle was requested from a strict ref-count disposable
    /// after it was disposed
    #[error("disposable has already been disposed")]
    Disposed,

    /// Work was submitted to a dedicated-thread scheduler after shutdown
    #[error("scheduler has been shut down")]
    SchedulerShutDown,
}
