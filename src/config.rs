//! Compile-time tunables.
//!
//! Mirrors the configuration header of the system this kernel is modeled on: every
//! knob here was a `#define ... (DEBUG)`-guarded macro there. Rust has no equivalent
//! of "redefine before including", so overriding one of these means forking the
//! constant, not shadowing it — pick the value that matches your target up front.

/// Name substituted for a kernel object created without an explicit name.
pub const ANONYMOUS_OBJECT_NAME: &str = "<anon>";

/// Build every kernel object onto a second, diagnostic-only intrusive list so all
/// live threads/semaphores/mutexes/queues/channels/timers/run loops can be
/// enumerated. Never consulted by the scheduler itself.
pub const GLOBAL_OBJECT_LISTS: bool = cfg!(debug_assertions);

/// Put the processor to sleep (via the port's wait-for-interrupt hook) in the idle
/// thread rather than spinning. Spinning is easier to single-step under a debugger,
/// so it's the debug default.
pub const ENABLE_IDLE_SLEEP: bool = !cfg!(debug_assertions);

/// Compute per-thread and overall system CPU load.
pub const ENABLE_SYSTEM_LOAD: bool = true;

/// Microsecond window over which system load is averaged. One second by default.
pub const SYSTEM_LOAD_SAMPLE_PERIOD_US: u64 = 1_000_000;

/// Stack size in bytes for the kernel's own idle thread.
pub const IDLE_THREAD_STACK_SIZE: usize = 512;

/// Fill new thread stacks with [`crate::thread::STACK_FILL_VALUE`] at creation so
/// high-water-mark usage can be measured later. Costs time at thread creation, so
/// it's debug-only by default.
pub const THREAD_STACK_PATTERN_FILL: bool = cfg!(debug_assertions);

/// Enable tickless idle: the tick timer is reprogrammed to fire at the next
/// scheduled wakeup instead of on a fixed period.
pub const ENABLE_TICKLESS_IDLE: bool = true;

/// Capacity of the process-wide deferred-action ring buffer.
pub const DEFERRED_ACTION_QUEUE_SIZE: usize = 8;

/// Capacity of a single run loop's queued-function ring buffer.
pub const RUNLOOP_FUNCTION_QUEUE_SIZE: usize = 8;

/// Walk every list on every `add`/`remove` and halt if it's inconsistent. A pure
/// debugging aid; normally not required.
pub const ENABLE_LIST_CHECKS: bool = false;

/// Gate `log::trace!` call sites that would otherwise fire on every scheduler
/// entry. Cheap to check, so this just follows the build profile.
pub const ENABLE_TRACE: bool = cfg!(debug_assertions);
