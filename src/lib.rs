//! Preemptive priority-based real-time microkernel core for single-core
//! 32-bit microcontrollers.
//!
//! `no_std` by default; builds against `std` only under `cfg(test)` so unit
//! tests can use `#[test]`, `assert!`, and friends. The crate never installs
//! a concrete [`log`] logger — that is the embedding application's or test
//! harness's call, same as the board-specific [`port::Port`] implementation.
//!
//! Every kernel object (thread, semaphore, mutex, queue, channel, timer, run
//! loop) is created in caller-owned `'static` storage, typically a `static`,
//! and registered with an `init`/`start` call before use — there is no
//! allocator and nothing here ever calls one.
#![cfg_attr(not(test), no_std)]

pub mod channel;
pub mod config;
mod deferred;
pub mod kernel;
pub mod list;
pub mod mutex;
pub mod port;
pub mod queue;
pub mod runloop;
pub mod sem;
pub mod status;
pub mod thread;
pub mod timer;

pub use channel::Channel;
pub use kernel::{kernel, Kernel};
pub use mutex::Mutex;
pub use port::Port;
pub use queue::Queue;
pub use runloop::{RunLoop, RunLoopOutcome};
pub use sem::Semaphore;
pub use status::{KernelResult, Status};
pub use thread::{Thread, ThreadState, ThreadStatus};
pub use timer::{Timer, TimerMode};

/// Length of one scheduler tick in microseconds. All timeouts and delays are
/// accepted in milliseconds at the API boundary and converted to ticks
/// internally; the conversion is lossy if `TICK_PERIOD_US` does not evenly
/// divide 1000, so targets with a non-millisecond-aligned tick should round
/// their own delay arguments accordingly.
pub const TICK_PERIOD_US: u32 = 1_000;

/// Sentinel meaning "block forever" wherever a timeout or delay in
/// milliseconds is accepted.
pub const INFINITE_TIMEOUT: u32 = u32::MAX;

/// Convert a millisecond duration to ticks, rounding up so a caller who asks
/// to wait "at least" some number of milliseconds never gets less.
/// [`INFINITE_TIMEOUT`] maps to itself.
pub fn milliseconds_to_ticks(ms: u32) -> u32 {
    if ms == INFINITE_TIMEOUT {
        return INFINITE_TIMEOUT;
    }
    let us_per_tick = TICK_PERIOD_US as u64;
    let ticks = (ms as u64 * 1000 + us_per_tick - 1) / us_per_tick;
    ticks.min(INFINITE_TIMEOUT as u64 - 1) as u32
}

/// Convert a tick count back to milliseconds. [`INFINITE_TIMEOUT`] maps to
/// itself.
pub fn ticks_to_milliseconds(ticks: u32) -> u32 {
    if ticks == INFINITE_TIMEOUT {
        return INFINITE_TIMEOUT;
    }
    ((ticks as u64 * TICK_PERIOD_US as u64) / 1000) as u32
}

/// Install the board/architecture collaborator and start the scheduler.
/// Never returns.
///
/// # Safety
/// Must be called at most once, after every thread that should exist at
/// boot has already been created with [`thread::Thread::start`].
pub fn run(port: &'static dyn Port) -> ! {
    kernel().set_port(port);
    kernel().run()
}

/// Whether [`run`] has been called and the scheduler is active.
pub fn is_running() -> bool {
    kernel().is_running()
}

/// Ticks elapsed since [`run`] was called.
pub fn tick_count() -> u32 {
    kernel().tick_count()
}

/// Milliseconds elapsed since [`run`] was called, derived from [`tick_count`].
pub fn millisecond_count() -> u32 {
    ticks_to_milliseconds(kernel().tick_count())
}

/// Microseconds elapsed within the current tick period, from the port's
/// free-running timer. Combine with [`millisecond_count`] for sub-tick
/// timestamp resolution.
pub fn microseconds() -> u32 {
    kernel().port().get_timer_elapsed_us()
}

/// Overall system CPU load as a percentage of time the idle thread was *not*
/// running, averaged over the last
/// [`config::SYSTEM_LOAD_SAMPLE_PERIOD_US`] window. Always 0 if
/// [`config::ENABLE_SYSTEM_LOAD`] or [`config::GLOBAL_OBJECT_LISTS`] is
/// disabled, since per-thread sampling (which the idle thread's own number
/// is derived alongside) depends on both. Grounded on `ar_kernel_get_system_load`.
pub fn system_load() -> u8 {
    let idle_permille = kernel().idle_thread().cpu_permille().min(1000);
    (1000u32.saturating_sub(idle_permille) / 10) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milliseconds_round_trip_through_ticks() {
        assert_eq!(milliseconds_to_ticks(0), 0);
        assert_eq!(milliseconds_to_ticks(10), 10_000 / TICK_PERIOD_US);
        assert_eq!(ticks_to_milliseconds(milliseconds_to_ticks(250)), 250);
    }

    #[test]
    fn infinite_timeout_is_idempotent_under_conversion() {
        assert_eq!(milliseconds_to_ticks(INFINITE_TIMEOUT), INFINITE_TIMEOUT);
        assert_eq!(ticks_to_milliseconds(INFINITE_TIMEOUT), INFINITE_TIMEOUT);
    }
}
