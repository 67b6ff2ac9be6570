//! Kernel result/error codes.

use core::fmt;

/// Every way a kernel call can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Used internally to record that a blocked thread was woken because it
    /// got what it was waiting for, as opposed to a timeout or deletion.
    /// Never returned from a call that didn't block in the first place —
    /// those return `Ok(())` instead.
    Success,
    /// A required pointer/handle argument was missing or otherwise invalid.
    InvalidParameter,
    /// A blocking call timed out before its condition was satisfied.
    Timeout,
    /// The object being waited on was deleted while a thread was blocked on it.
    ObjectDeleted,
    /// A queue was full and the caller's timeout expired before room opened up.
    QueueFull,
    /// A queue was empty and the caller's timeout expired before an item arrived.
    QueueEmpty,
    /// The calling thread does not own a mutex it tried to unlock.
    NotOwner,
    /// A mutex was `put` while already unowned, i.e. unlock count underflowed.
    MutexAlreadyUnlocked,
    /// A call that is only valid from thread context was made from an ISR.
    NotFromInterrupt,
    /// The object's current state doesn't permit the requested transition,
    /// e.g. resuming a thread that has already exited.
    InvalidState,
    /// A thread was created with unreachable/illegal priority.
    InvalidPriority,
    /// The caller-provided stack was too small to satisfy the minimum frame size.
    StackSizeTooSmall,
    /// A timer has no run loop associated with it and so cannot be started.
    TimerNoRunLoop,
    /// Asked to stop a timer that isn't currently running.
    TimerNotRunning,
    /// A run loop's `run()` was called while it was already running on a
    /// different thread (or on this thread but bound to a different loop).
    RunLoopAlreadyRunning,
    /// A run loop's queued-function ring buffer was full.
    RunLoopQueueFull,
    /// A channel operation was attempted with no receiver/sender present on the
    /// other end and a zero timeout.
    ChannelEmpty,
    /// A run loop woke up because a queue with no handler attached received
    /// an item; the caller is expected to receive it directly.
    QueueReceived,
    /// A queue was already bound to a different run loop.
    AlreadyAttached,
    /// Generic unspecified internal failure path.
    UnknownError,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Status::Success => "success",
            Status::InvalidParameter => "invalid parameter",
            Status::Timeout => "timed out",
            Status::ObjectDeleted => "object was deleted while in use",
            Status::QueueFull => "queue is full",
            Status::QueueEmpty => "queue is empty",
            Status::NotOwner => "calling thread does not own this mutex",
            Status::MutexAlreadyUnlocked => "mutex lock/unlock count mismatch",
            Status::NotFromInterrupt => "operation not permitted from interrupt context",
            Status::InvalidState => "operation not permitted in the current thread's state",
            Status::InvalidPriority => "invalid thread priority",
            Status::StackSizeTooSmall => "stack is too small",
            Status::TimerNoRunLoop => "timer has no associated run loop",
            Status::TimerNotRunning => "timer is not running",
            Status::RunLoopAlreadyRunning => "run loop is already running",
            Status::RunLoopQueueFull => "run loop function queue is full",
            Status::ChannelEmpty => "no peer available on channel",
            Status::QueueReceived => "run loop woke for an unhandled queue item",
            Status::AlreadyAttached => "queue is already attached to a different run loop",
            Status::UnknownError => "unknown error",
        };
        f.write_str(msg)
    }
}

/// Result type used throughout the kernel API.
pub type KernelResult<T = ()> = Result<T, Status>;
