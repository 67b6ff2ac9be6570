//! Port trait: the seam between this kernel core and a concrete target.
//!
//! Everything in this crate outside of `port.rs` is pure scheduling and IPC
//! logic with no knowledge of any particular CPU. A board/architecture crate
//! implements [`Port`] to supply context switching, the tick timer, and
//! microsecond timestamps; the kernel calls back through it rather than
//! inlining any assembly or memory-mapped register access of its own.

/// Collaborator supplied by the target to drive context switches, the tick
/// timer, and timekeeping.
///
/// A single implementor is installed for the lifetime of the kernel (there is
/// exactly one core), so methods take `&self` and are expected to reach
/// mutable hardware state through interior mutability or volatile accesses.
pub trait Port {
    /// One-time hardware bring-up: NVIC priorities, the SysTick/timer
    /// peripheral left disabled, stack-related CPU registers.
    fn init_system(&self);

    /// Arm the tick timer for its initial period.
    fn init_tick_timer(&self);

    /// Reprogram the tick timer. `enable = false` disables it entirely (used
    /// to implement tickless idle: the core calls this instead of waiting for
    /// a tick it knows is unnecessary). `delay_us` is the time until the next
    /// tick when `enable` is true.
    fn set_timer_delay(&self, enable: bool, delay_us: u32);

    /// Microseconds elapsed in the current tick period so far. Used to
    /// compute sub-tick high-resolution timestamps for load measurement.
    fn get_timer_elapsed_us(&self) -> u32;

    /// Lay out the initial register frame for a new thread's stack so that
    /// the first context switch into it resumes at its entry point.
    ///
    /// # Safety
    /// `stack_top` must point one-past-the-end of a region at least
    /// `stack_size` bytes long that the caller owns for the thread's entire
    /// lifetime.
    unsafe fn prepare_stack(&self, stack_top: *mut u8, stack_size: usize, entry: extern "C" fn(usize), param: usize) -> *mut u8;

    /// Request a context switch at the soonest safe opportunity (typically by
    /// pending a low-priority exception on Cortex-M, or a software
    /// interrupt elsewhere).
    fn service_call(&self);

    /// Whether the caller is currently executing in interrupt/exception
    /// context. Several kernel calls are only valid, or only valid with a
    /// zero timeout, when this is false.
    fn get_irq_state(&self) -> bool;

    /// Block until the next interrupt, used by the idle thread when
    /// [`crate::config::ENABLE_IDLE_SLEEP`] is set.
    fn wait_for_interrupt(&self) {}

    /// Halt permanently. Called after an unrecoverable kernel error. Expected
    /// to never return; the default spins.
    fn halt(&self, reason: &str) -> ! {
        log::error!("kernel halt: {reason}");
        loop {
            core::hint::spin_loop();
        }
    }
}

/// A minimal [`Port`] for unit tests that only exercise a primitive's
/// non-blocking fast path (a zero-timeout `get`/`send`/`receive`, or a plain
/// `init`). Every call site on that path checks `get_irq_state()` first, so
/// the kernel singleton needs *some* port installed before those tests can
/// run at all, even though none of the hardware hooks are ever reached.
#[cfg(test)]
pub(crate) mod test_support {
    use super::Port;

    pub struct TestPort;

    impl Port for TestPort {
        fn init_system(&self) {}
        fn init_tick_timer(&self) {}
        fn set_timer_delay(&self, _enable: bool, _delay_us: u32) {}
        fn get_timer_elapsed_us(&self) -> u32 {
            0
        }

        unsafe fn prepare_stack(
            &self,
            _stack_top: *mut u8,
            _stack_size: usize,
            _entry: extern "C" fn(usize),
            _param: usize,
        ) -> *mut u8 {
            core::ptr::null_mut()
        }

        fn service_call(&self) {}

        fn get_irq_state(&self) -> bool {
            false
        }
    }

    static TEST_PORT: TestPort = TestPort;

    /// Install [`TestPort`] into the kernel singleton. The kernel is a single
    /// process-wide instance shared by every test in the binary, so this is
    /// idempotent and safe to call unconditionally at the top of any test
    /// that reaches a `get_irq_state()` check.
    pub(crate) fn install() {
        crate::kernel::kernel().set_port(&TEST_PORT);
    }
}
