//! One-shot and periodic timers, each bound to exactly one [`crate::runloop::RunLoop`].
//!
//! Timers are never global: each lives on its owning run loop's timer list,
//! kept sorted by wakeup so the run loop only ever has to look at the head to
//! know when it next needs to wake up. Grounded on `ar_timer.cpp`.

use core::cell::Cell;

use crate::config;
use crate::kernel::{kernel, KernelGuard};
use crate::list::ListNode;
use crate::runloop::RunLoop;
use crate::status::{KernelResult, Status};

/// Whether a timer fires once or keeps rescheduling itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    OneShot,
    Periodic,
}

/// A timer callback: the timer itself and the `param` given at creation.
pub type TimerCallback = fn(&'static Timer, usize);

/// A one-shot or periodic timer driven by a run loop's `run()` call.
pub struct Timer {
    name: Cell<&'static str>,
    callback: Cell<Option<TimerCallback>>,
    param: Cell<usize>,
    mode: Cell<TimerMode>,
    delay: Cell<u32>,
    wakeup: Cell<u32>,
    is_active: Cell<bool>,
    is_running: Cell<bool>,
    run_loop: Cell<*const RunLoop>,
    /// Membership on the owning run loop's timer list, sorted by wakeup.
    pub(crate) active_node: ListNode,
    created_node: ListNode,
}

// SAFETY: all mutation happens under `KernelGuard`.
unsafe impl Sync for Timer {}

impl Timer {
    /// An inactive timer with no callback. Call [`Timer::init`] before use.
    pub const fn new() -> Self {
        Timer {
            name: Cell::new(config::ANONYMOUS_OBJECT_NAME),
            callback: Cell::new(None),
            param: Cell::new(0),
            mode: Cell::new(TimerMode::OneShot),
            delay: Cell::new(0),
            wakeup: Cell::new(0),
            is_active: Cell::new(false),
            is_running: Cell::new(false),
            run_loop: Cell::new(core::ptr::null()),
            active_node: ListNode::new(core::ptr::null()),
            created_node: ListNode::new(core::ptr::null()),
        }
    }

    /// Register the timer with the kernel. `delay_ms` must be nonzero.
    /// Must be called once on a `'static` timer, and the timer must be
    /// attached to a run loop with [`RunLoop::add_timer`] before
    /// [`Timer::start`].
    pub fn init(
        &'static self,
        name: Option<&'static str>,
        callback: TimerCallback,
        param: usize,
        mode: TimerMode,
        delay_ms: u32,
    ) -> KernelResult {
        if delay_ms == 0 {
            return Err(Status::InvalidParameter);
        }
        if kernel().port().get_irq_state() {
            return Err(Status::NotFromInterrupt);
        }

        self.name.set(name.unwrap_or(config::ANONYMOUS_OBJECT_NAME));
        self.callback.set(Some(callback));
        self.param.set(param);
        self.mode.set(mode);
        self.delay.set(crate::milliseconds_to_ticks(delay_ms));
        self.active_node.rebind(self as *const Timer as *const ());
        self.created_node.rebind(self as *const Timer as *const ());

        if config::GLOBAL_OBJECT_LISTS {
            unsafe { kernel().objects().timers.add(&self.created_node) };
        }
        log::debug!("timer '{}' created", self.name.get());
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        self.name.get()
    }

    pub fn is_active(&self) -> bool {
        self.is_active.get()
    }

    pub(crate) fn wakeup(&self) -> u32 {
        self.wakeup.get()
    }

    pub(crate) fn set_run_loop(&self, run_loop: *const RunLoop) {
        self.run_loop.set(run_loop);
    }

    /// Start (or restart) the timer: `wakeup = now + delay`. Requires a run
    /// loop to already be attached via [`RunLoop::add_timer`].
    pub fn start(&'static self) -> KernelResult {
        if self.run_loop.get().is_null() {
            return Err(Status::TimerNoRunLoop);
        }

        let wakeup = kernel().tick_count().wrapping_add(self.delay.get());

        if kernel().port().get_irq_state() {
            return kernel()
                .deferred()
                .post2(deferred_start, self as *const Timer as *const (), wakeup as usize as *const ());
        }

        self.start_internal(wakeup)
    }

    fn start_internal(&'static self, wakeup: u32) -> KernelResult {
        let _guard = KernelGuard::lock();

        let run_loop_ptr = self.run_loop.get();
        if run_loop_ptr.is_null() {
            return Err(Status::TimerNoRunLoop);
        }
        let run_loop = unsafe { &*run_loop_ptr };

        if self.is_active.get() {
            unsafe { run_loop.timers().remove(&self.active_node) };
        }

        self.wakeup.set(wakeup);
        self.is_active.set(true);

        unsafe { run_loop.timers().add(&self.active_node) };
        run_loop.wake();

        Ok(())
    }

    /// Stop the timer. Fails with [`Status::TimerNotRunning`] if it isn't
    /// currently active.
    pub fn stop(&'static self) -> KernelResult {
        if !self.is_active.get() {
            return Err(Status::TimerNotRunning);
        }
        if self.run_loop.get().is_null() {
            return Err(Status::TimerNoRunLoop);
        }

        if kernel().port().get_irq_state() {
            return kernel().post_deferred(deferred_stop, self as *const Timer as *const ());
        }

        self.stop_internal()
    }

    fn stop_internal(&'static self) -> KernelResult {
        let _guard = KernelGuard::lock();

        let run_loop_ptr = self.run_loop.get();
        if !run_loop_ptr.is_null() {
            let run_loop = unsafe { &*run_loop_ptr };
            unsafe { run_loop.timers().remove(&self.active_node) };
            run_loop.wake();
        }

        self.wakeup.set(0);
        self.is_active.set(false);
        Ok(())
    }

    /// Change the timer's period. If the timer is currently active this
    /// restarts it immediately, unless this call is made from within a
    /// periodic timer's own callback — in that case the reschedule that
    /// happens when the callback returns already picks up the new delay, and
    /// restarting here too would double the effective delay.
    pub fn set_delay(&'static self, delay_ms: u32) -> KernelResult {
        if delay_ms == 0 {
            return Err(Status::InvalidParameter);
        }

        self.delay.set(crate::milliseconds_to_ticks(delay_ms));

        let mid_periodic_callback = self.is_running.get() && self.mode.get() == TimerMode::Periodic;
        if self.is_active.get() && !mid_periodic_callback {
            self.start()?;
        }

        Ok(())
    }

    /// Detach from its run loop and remove from the kernel's diagnostic
    /// registry. Safe to call on an already-stopped timer.
    pub fn delete(&'static self) -> KernelResult {
        if self.is_active.get() {
            self.stop()?;
        }
        if config::GLOBAL_OBJECT_LISTS {
            unsafe { kernel().objects().timers.remove(&self.created_node) };
        }
        Ok(())
    }
}

fn deferred_start(object: *const (), wakeup: *const ()) {
    let timer = unsafe { &*(object as *const Timer) };
    let _ = timer.start_internal(wakeup as usize as u32);
}

fn deferred_stop(object: *const ()) {
    let timer = unsafe { &*(object as *const Timer) };
    let _ = timer.stop_internal();
}

/// Sort predicate for a run loop's timer list: an inactive timer never sorts
/// ahead of anything (it shouldn't be on the list at all, but this keeps a
/// stray reinsertion race harmless); among active timers, earlier wakeup
/// sorts first. Grounded on `ar_timer_sort_by_wakeup`.
pub(crate) fn sort_by_wakeup(a: *const ListNode, b: *const ListNode) -> bool {
    unsafe {
        let ta = &*(*a).object::<Timer>();
        let tb = &*(*b).object::<Timer>();
        ta.is_active.get() && ta.wakeup.get() < tb.wakeup.get()
    }
}

/// Run every timer on `timers` whose wakeup has arrived, in wakeup order,
/// rescheduling periodic timers and stopping one-shot timers as their
/// callback returns. Grounded on `ar_kernel_run_timers`.
pub(crate) fn run_expired(timers: &crate::list::List) {
    loop {
        let head = match timers.head() {
            Some(node) => node,
            None => break,
        };
        // SAFETY: every node on a run loop's timer list is embedded in a
        // `'static Timer`.
        let timer: &'static Timer = unsafe { &*head.object::<Timer>() };

        if timer.wakeup.get() > kernel().tick_count() {
            break;
        }

        timer.is_running.set(true);
        if let Some(callback) = timer.callback.get() {
            callback(timer, timer.param.get());
        }
        timer.is_running.set(false);

        if !timer.is_active.get() {
            continue;
        }

        match timer.mode.get() {
            TimerMode::OneShot => {
                let _ = timer.stop();
            }
            TimerMode::Periodic => {
                let now = kernel().tick_count();
                let previous_wakeup = timer.wakeup.get();
                let delay = timer.delay.get();
                let wakeup = next_periodic_wakeup(previous_wakeup, delay, now);
                if previous_wakeup.wrapping_add(delay) < now {
                    log::warn!("timer '{}' callback overran its period, snapping to tick {}", timer.name(), wakeup);
                }
                let _ = timer.start_internal(wakeup);
            }
        }
    }
}

/// Next wakeup for a periodic timer whose previous wakeup was `previous_wakeup`
/// and whose period is `delay`, given the tick `now` at which its callback
/// just finished running. Ordinarily `previous_wakeup + delay`; if the
/// callback overran one or more periods, snaps forward to the smallest
/// `previous_wakeup + k*delay` strictly greater than `now`. Grounded on
/// `ar_kernel_run_timers`'s periodic rescheduling branch; split out as a pure
/// function so the drift-recovery arithmetic is exercisable without a live
/// kernel/run loop.
fn next_periodic_wakeup(previous_wakeup: u32, delay: u32, now: u32) -> u32 {
    let mut wakeup = previous_wakeup.wrapping_add(delay);
    if wakeup == now {
        wakeup = wakeup.wrapping_add(delay);
    } else if wakeup < now {
        let delta = (now - previous_wakeup + delay - 1) / delay * delay;
        wakeup = previous_wakeup.wrapping_add(delta);
    }
    wakeup
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodic_wakeup_with_no_drift_advances_by_one_period() {
        assert_eq!(next_periodic_wakeup(100, 10, 105), 110);
    }

    #[test]
    fn periodic_wakeup_exactly_at_now_advances_an_extra_period() {
        // The callback's own run took exactly one period; without this
        // branch the timer would immediately re-fire in the same tick.
        assert_eq!(next_periodic_wakeup(100, 10, 110), 120);
    }

    #[test]
    fn periodic_wakeup_snaps_forward_after_drift() {
        // Scenario: delay=10, a callback starting at wakeup=10 busy-waits
        // 35ms, so `now` has reached tick 45 by the time it returns. The next
        // wakeup must be the smallest multiple-of-10 strictly after 45: 50.
        assert_eq!(next_periodic_wakeup(10, 10, 45), 50);
    }

    #[test]
    fn periodic_wakeup_snaps_forward_across_many_missed_periods() {
        // wakeup=0, delay=10, callback overran all the way to tick 87: next
        // due tick is 90, the first multiple of 10 strictly greater than 87.
        assert_eq!(next_periodic_wakeup(0, 10, 87), 90);
    }

    #[test]
    fn zero_delay_is_rejected() {
        static T: Timer = Timer::new();
        fn cb(_t: &'static Timer, _p: usize) {}
        assert_eq!(T.init(Some("test"), cb, 0, TimerMode::OneShot, 0), Err(Status::InvalidParameter));
    }

    #[test]
    fn start_without_runloop_fails() {
        crate::port::test_support::install();
        static T: Timer = Timer::new();
        fn cb(_t: &'static Timer, _p: usize) {}
        T.init(Some("test"), cb, 0, TimerMode::OneShot, 10).unwrap();
        assert_eq!(T.start(), Err(Status::TimerNoRunLoop));
    }
}
