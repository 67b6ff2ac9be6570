//! Threads: the kernel's unit of execution.

use core::cell::Cell;

use crate::config;
use crate::kernel::{kernel, KernelGuard};
use crate::list::{List, ListNode};
use crate::status::{KernelResult, Status};

/// Lowest legal application priority. Priority 0 is reserved for the kernel's
/// own idle thread.
pub const MIN_THREAD_PRIORITY: u8 = 1;

/// Priority reserved exclusively for the idle thread.
pub const IDLE_THREAD_PRIORITY: u8 = 0;

/// Value written to the first word of a new stack. The scheduler checks it on
/// every context switch and halts if it has been overwritten, which is a
/// reliable sign of a stack overflow.
pub const STACK_CHECK_VALUE: u32 = 0xdead_beef;

/// Fill pattern written across an otherwise-unused stack at creation time so
/// high-water-mark usage can be measured later by counting untouched words.
pub const STACK_FILL_VALUE: u32 = 0xbaba_baba;

/// Where a thread currently stands with respect to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Unknown,
    Suspended,
    Ready,
    Running,
    Blocked,
    Sleeping,
    Done,
}

/// A snapshot of one thread's bookkeeping, returned by [`crate::report`].
#[derive(Debug, Clone, Copy)]
pub struct ThreadStatus {
    pub name: &'static str,
    pub unique_id: u32,
    pub state: ThreadState,
    pub priority: u8,
    pub cpu_permille: u32,
    pub max_stack_used: usize,
    pub stack_size: usize,
}

/// A schedulable thread of control.
///
/// A `Thread` is always created in caller-owned storage — typically a
/// `static` — and never moves for the rest of its life, since the scheduler's
/// ready/sleeping/blocked lists hold raw pointers into it. All mutable state
/// is behind [`Cell`]; access is serialized by the kernel's own lock-count
/// discipline (see [`KernelGuard`]) rather than by the compiler.
pub struct Thread {
    name: Cell<&'static str>,
    priority: Cell<u8>,
    state: Cell<ThreadState>,
    entry: Cell<Option<fn(usize)>>,
    param: Cell<usize>,
    stack_bottom: Cell<*mut u32>,
    stack_top: Cell<*mut u32>,
    stack_pointer: Cell<*mut u8>,
    unique_id: Cell<u32>,
    wakeup_time: Cell<u32>,
    unblock_status: Cell<Status>,
    channel_data: Cell<*mut ()>,
    run_loop: Cell<*const crate::runloop::RunLoop>,
    load_accumulator: Cell<u32>,
    permille_cpu: Cell<u32>,
    /// The wait list this thread is currently on while `Blocked`, so the tick
    /// handler can pull a timed-out thread off it without the primitive's
    /// involvement. Null whenever the thread isn't `Blocked`.
    blocked_list: Cell<*const List>,

    /// Membership in exactly one of the ready/suspended/sleeping lists.
    pub(crate) thread_node: ListNode,
    /// Membership in the blocked list of whatever object this thread is
    /// waiting on (semaphore, mutex, queue, channel).
    pub(crate) blocked_node: ListNode,
    /// Membership in the diagnostic global-objects list.
    pub(crate) created_node: ListNode,
}

// SAFETY: all mutation is serialized by the kernel lock-count discipline;
// the only unsynchronized reads are of fields written once at creation.
unsafe impl Sync for Thread {}

impl Thread {
    /// A detached, not-yet-started thread. Call [`Thread::start`] before
    /// using it.
    pub const fn new() -> Self {
        Thread {
            name: Cell::new(config::ANONYMOUS_OBJECT_NAME),
            priority: Cell::new(0),
            state: Cell::new(ThreadState::Unknown),
            entry: Cell::new(None),
            param: Cell::new(0),
            stack_bottom: Cell::new(core::ptr::null_mut()),
            stack_top: Cell::new(core::ptr::null_mut()),
            stack_pointer: Cell::new(core::ptr::null_mut()),
            unique_id: Cell::new(0),
            wakeup_time: Cell::new(0),
            unblock_status: Cell::new(Status::UnknownError),
            channel_data: Cell::new(core::ptr::null_mut()),
            run_loop: Cell::new(core::ptr::null()),
            load_accumulator: Cell::new(0),
            permille_cpu: Cell::new(0),
            blocked_list: Cell::new(core::ptr::null()),
            thread_node: ListNode::new(core::ptr::null()),
            blocked_node: ListNode::new(core::ptr::null()),
            created_node: ListNode::new(core::ptr::null()),
        }
    }

    /// Bring a freshly constructed thread to life: lay out its stack and
    /// place it on the suspended list. Pass `start_immediately = true` to
    /// resume it right away instead of leaving the caller to do so.
    ///
    /// `self` must be `'static` because the scheduler keeps raw pointers to
    /// it for as long as the thread exists.
    pub fn start(
        &'static self,
        name: Option<&'static str>,
        entry: fn(usize),
        param: usize,
        stack: &'static mut [u8],
        priority: u8,
        start_immediately: bool,
    ) -> KernelResult {
        if priority < MIN_THREAD_PRIORITY {
            return Err(Status::InvalidPriority);
        }
        const MIN_STACK: usize = 64;
        if stack.len() < MIN_STACK {
            return Err(Status::StackSizeTooSmall);
        }
        if kernel().port().get_irq_state() {
            return Err(Status::NotFromInterrupt);
        }

        self.name.set(name.unwrap_or(config::ANONYMOUS_OBJECT_NAME));
        self.priority.set(priority);
        self.state.set(ThreadState::Suspended);
        self.entry.set(Some(entry));
        self.param.set(param);
        self.unique_id.set(kernel().next_thread_id());

        self.thread_node.rebind(self as *const Thread as *const ());
        self.blocked_node.rebind(self as *const Thread as *const ());
        self.created_node.rebind(self as *const Thread as *const ());

        let stack_len = stack.len();
        let stack_words = stack_len / core::mem::size_of::<u32>();
        let bottom = stack.as_mut_ptr() as *mut u32;
        let top = unsafe { bottom.add(stack_words) };
        self.stack_bottom.set(bottom);
        self.stack_top.set(top);

        unsafe {
            *bottom = STACK_CHECK_VALUE;
            if config::THREAD_STACK_PATTERN_FILL {
                let mut p = bottom.add(1);
                while p < top {
                    *p = STACK_FILL_VALUE;
                    p = p.add(1);
                }
            }
        }

        if config::GLOBAL_OBJECT_LISTS {
            unsafe { kernel().objects().threads.add(&self.created_node) };
        }

        let stack_top_u8 = top as *mut u8;
        let entry_point: extern "C" fn(usize) = Self::trampoline;
        let sp = unsafe {
            kernel().port().prepare_stack(stack_top_u8, stack_len, entry_point, self as *const Thread as usize)
        };
        self.stack_pointer.set(sp);

        {
            let _guard = KernelGuard::lock();
            unsafe { kernel().suspended_list().add(&self.thread_node) };
        }

        log::debug!("thread '{}' created (id {})", self.name.get(), self.unique_id.get());

        if start_immediately {
            self.resume()?;
        }

        Ok(())
    }

    extern "C" fn trampoline(thread_addr: usize) {
        let thread = unsafe { &*(thread_addr as *const Thread) };
        if let Some(entry) = thread.entry.get() {
            entry(thread.param.get());
        }
        thread.finish();
    }

    fn finish(&'static self) -> ! {
        {
            let _guard = KernelGuard::lock();
            unsafe {
                kernel().ready_list().remove(&self.thread_node);
                kernel().update_round_robin();
            }
            self.state.set(ThreadState::Done);
        }
        kernel().enter_scheduler();
        loop {
            core::hint::spin_loop();
        }
    }

    /// Remove the thread from scheduling permanently. If this is the current
    /// thread, execution never returns from the enclosing deferral.
    pub fn delete(&'static self) -> KernelResult {
        if kernel().port().get_irq_state() {
            return Err(Status::NotFromInterrupt);
        }

        let run_loop = self.run_loop.get();
        if !run_loop.is_null() {
            unsafe { (*run_loop).clear_thread() };
            self.run_loop.set(core::ptr::null());
        }

        if config::GLOBAL_OBJECT_LISTS {
            unsafe { kernel().objects().threads.remove(&self.created_node) };
        }

        {
            let _guard = KernelGuard::lock();
            match self.state.get() {
                ThreadState::Ready | ThreadState::Running => unsafe {
                    kernel().ready_list().remove(&self.thread_node);
                    kernel().update_round_robin();
                },
                ThreadState::Suspended => unsafe { kernel().suspended_list().remove(&self.thread_node) },
                ThreadState::Sleeping => unsafe { kernel().sleeping_list().remove(&self.thread_node) },
                ThreadState::Blocked => {
                    // A finite-timeout wait links `thread_node` onto the
                    // sleeping list too (invariant 4, §3); `blocked_node` is
                    // always on whatever primitive's wait list this thread is
                    // parked on. Both memberships must be torn down here, or
                    // a later `put`/`send` on that primitive would pull a
                    // dangling node off its wait list and unblock a `Done`
                    // thread.
                    unsafe { kernel().sleeping_list().remove(&self.thread_node) };
                    if let Some(list) = self.blocked_list() {
                        unsafe { list.remove(&self.blocked_node) };
                    }
                    self.blocked_list.set(core::ptr::null());
                }
                ThreadState::Done => {}
                ThreadState::Unknown => return Err(Status::InvalidState),
            }

            self.state.set(ThreadState::Done);

            if kernel().is_running() && core::ptr::eq(self, kernel().current_thread()) {
                kernel().request_reschedule();
            }
        }

        Ok(())
    }

    fn resume_internal(&'static self) -> KernelResult {
        let _guard = KernelGuard::lock();
        match self.state.get() {
            ThreadState::Ready | ThreadState::Running => return Ok(()),
            ThreadState::Suspended => unsafe { kernel().suspended_list().remove(&self.thread_node) },
            ThreadState::Sleeping => unsafe { kernel().sleeping_list().remove(&self.thread_node) },
            ThreadState::Blocked | ThreadState::Unknown | ThreadState::Done => {
                return Err(Status::InvalidState)
            }
        }

        self.state.set(ThreadState::Ready);
        unsafe {
            kernel().ready_list().add(&self.thread_node);
            kernel().update_round_robin();
        }

        // `current_thread()` is only meaningful once the scheduler has
        // actually picked a first thread to run; a thread created with
        // `start_immediately` before `Kernel::run()` must not force a
        // reschedule this way (and must not dereference the not-yet-set
        // current-thread pointer at all).
        if kernel().is_running() && self.priority.get() > kernel().current_thread().priority.get() {
            kernel().request_reschedule();
        }

        Ok(())
    }

    /// Move a suspended or sleeping thread back onto the ready list.
    pub fn resume(&'static self) -> KernelResult {
        match self.state.get() {
            ThreadState::Ready | ThreadState::Running => return Ok(()),
            ThreadState::Suspended | ThreadState::Sleeping => {}
            ThreadState::Blocked | ThreadState::Unknown | ThreadState::Done => {
                return Err(Status::InvalidState)
            }
        }

        if kernel().port().get_irq_state() {
            kernel().deferred().post(deferred_resume, self as *const Thread as *const ())
        } else {
            self.resume_internal()
        }
    }

    fn suspend_internal(&'static self) -> KernelResult {
        let _guard = KernelGuard::lock();
        match self.state.get() {
            ThreadState::Ready | ThreadState::Running => unsafe {
                kernel().ready_list().remove(&self.thread_node);
                kernel().update_round_robin();
            },
            ThreadState::Sleeping => unsafe { kernel().sleeping_list().remove(&self.thread_node) },
            ThreadState::Suspended => return Ok(()),
            ThreadState::Blocked | ThreadState::Unknown | ThreadState::Done => {
                return Err(Status::InvalidState)
            }
        }

        self.state.set(ThreadState::Suspended);
        unsafe { kernel().suspended_list().add(&self.thread_node) };

        if kernel().is_running() && core::ptr::eq(self, kernel().current_thread()) {
            kernel().request_reschedule();
        }

        Ok(())
    }

    /// Move the thread out of scheduling without destroying it.
    pub fn suspend(&'static self) -> KernelResult {
        match self.state.get() {
            ThreadState::Suspended => return Ok(()),
            ThreadState::Ready | ThreadState::Running | ThreadState::Sleeping => {}
            ThreadState::Blocked | ThreadState::Unknown | ThreadState::Done => {
                return Err(Status::InvalidState)
            }
        }

        if kernel().port().get_irq_state() {
            kernel().deferred().post(deferred_suspend, self as *const Thread as *const ())
        } else {
            self.suspend_internal()
        }
    }

    /// Change this thread's priority, re-sorting the ready list if needed.
    ///
    /// Resorting a thread that is currently blocked on a priority-inheriting
    /// mutex, and propagating the change through an inheritance chain, is
    /// not implemented; the new priority simply takes effect once the thread
    /// is unblocked.
    pub fn set_priority(&'static self, priority: u8) -> KernelResult {
        if kernel().port().get_irq_state() {
            return Err(Status::NotFromInterrupt);
        }
        if priority == IDLE_THREAD_PRIORITY && !core::ptr::eq(self, kernel().idle_thread()) {
            return Err(Status::InvalidPriority);
        }

        if priority != self.priority.get() {
            let _guard = KernelGuard::lock();
            self.priority.set(priority);

            if matches!(self.state.get(), ThreadState::Ready | ThreadState::Running) {
                unsafe {
                    kernel().ready_list().remove(&self.thread_node);
                    kernel().ready_list().add(&self.thread_node);
                    kernel().update_round_robin();
                }
            }

            kernel().request_reschedule();
        }

        Ok(())
    }

    /// Block the current thread on `blocked_list`, an object-specific
    /// waiting list (a semaphore's, mutex's, queue's, or channel's). Returns
    /// once the thread has been unblocked, either because it was given what
    /// it was waiting for or because its timeout (in milliseconds) expired.
    ///
    /// Must be called with the kernel locked; the lock is released while the
    /// thread is actually blocked and re-acquired before returning.
    pub(crate) fn block(&'static self, blocked_list: &List, timeout_ms: u32) {
        debug_assert_ne!(timeout_ms, 0);

        unsafe {
            kernel().ready_list().remove(&self.thread_node);
            kernel().update_round_robin();
        }

        self.state.set(ThreadState::Blocked);
        self.unblock_status.set(Status::UnknownError);
        self.blocked_list.set(blocked_list as *const List);

        unsafe { blocked_list.add(&self.blocked_node) };

        if timeout_ms != crate::INFINITE_TIMEOUT {
            self.wakeup_time.set(kernel().tick_count() + crate::milliseconds_to_ticks(timeout_ms));
            unsafe { kernel().sleeping_list().add(&self.thread_node) };
        } else {
            self.wakeup_time.set(0);
        }

        {
            let _unlock = KernelGuard::unlock();
            kernel().enter_scheduler();
        }
    }

    /// Pull the thread back onto the ready list from whatever blocked/sleeping
    /// list it is on, recording `status` as what its blocking call should
    /// return.
    pub(crate) fn unblock_with_status(&'static self, blocked_list: &List, status: Status) {
        debug_assert_eq!(self.state.get(), ThreadState::Blocked);

        if self.wakeup_time.get() != 0 && !kernel().sleeping_list().is_empty() {
            unsafe { kernel().sleeping_list().remove(&self.thread_node) };
        }

        unsafe { blocked_list.remove(&self.blocked_node) };
        self.blocked_list.set(core::ptr::null());

        self.state.set(ThreadState::Ready);
        self.unblock_status.set(status);
        unsafe {
            kernel().ready_list().add(&self.thread_node);
            kernel().update_round_robin();
        }

        if kernel().is_running() && self.priority.get() > kernel().current_thread().priority.get() {
            kernel().request_reschedule();
        }
    }

    pub(crate) fn unblock_status(&self) -> Status {
        self.unblock_status.get()
    }

    pub(crate) fn blocked_node(&self) -> &ListNode {
        &self.blocked_node
    }

    /// The wait list this thread is blocked on, if any. Used by the tick
    /// handler to expire a timed-out wait without the primitive's help.
    pub(crate) fn blocked_list(&self) -> Option<&'static List> {
        let ptr = self.blocked_list.get();
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*ptr })
        }
    }

    /// Put the current thread to sleep for `ticks` kernel ticks, or forever
    /// if `ticks == `[`crate::INFINITE_TIMEOUT`]. Unlike [`Thread::block`]
    /// this places the thread only on the sleeping list, with no wait list
    /// to notify on wakeup.
    pub(crate) fn sleep_for(&'static self, ticks: u32) {
        let _guard = KernelGuard::lock();

        unsafe {
            kernel().ready_list().remove(&self.thread_node);
            kernel().update_round_robin();
        }

        self.state.set(ThreadState::Sleeping);

        if ticks != crate::INFINITE_TIMEOUT {
            self.wakeup_time.set(kernel().tick_count() + ticks);
            unsafe { kernel().sleeping_list().add(&self.thread_node) };
        } else {
            self.wakeup_time.set(0);
        }

        {
            let _unlock = KernelGuard::unlock();
            kernel().enter_scheduler();
        }
    }

    /// Called by the kernel's tick handler when this thread's wakeup time has
    /// arrived. Distinguishes a plain timed sleep (no wait list) from a timed
    /// out blocking wait (on some primitive's wait list).
    pub(crate) fn wake_timed_out(&'static self) {
        match self.state.get() {
            ThreadState::Sleeping => {
                self.state.set(ThreadState::Ready);
                unsafe {
                    kernel().sleeping_list().remove(&self.thread_node);
                    kernel().ready_list().add(&self.thread_node);
                    kernel().update_round_robin();
                }
                if kernel().is_running() && self.priority.get() > kernel().current_thread().priority.get() {
                    kernel().request_reschedule();
                }
            }
            ThreadState::Blocked => {
                if let Some(list) = self.blocked_list() {
                    self.unblock_with_status(list, Status::Timeout);
                }
            }
            _ => {}
        }
    }

    pub fn priority(&self) -> u8 {
        self.priority.get()
    }

    pub fn state(&self) -> ThreadState {
        self.state.get()
    }

    /// Demote a thread the scheduler is stepping away from back to `Ready`.
    /// Only valid while it's still linked on the ready list.
    pub(crate) fn set_state_ready_from_running(&self) {
        debug_assert_eq!(self.state.get(), ThreadState::Running);
        self.state.set(ThreadState::Ready);
    }

    /// Promote the thread the scheduler has just chosen to `Running`.
    pub(crate) fn set_state_running(&self) {
        self.state.set(ThreadState::Running);
    }

    pub fn name(&self) -> &'static str {
        self.name.get()
    }

    pub fn unique_id(&self) -> u32 {
        self.unique_id.get()
    }

    pub fn run_loop(&self) -> *const crate::runloop::RunLoop {
        self.run_loop.get()
    }

    pub(crate) fn set_run_loop(&self, run_loop: *const crate::runloop::RunLoop) {
        self.run_loop.set(run_loop);
    }

    pub(crate) fn channel_data(&self) -> *mut () {
        self.channel_data.get()
    }

    pub(crate) fn set_channel_data(&self, value: *mut ()) {
        self.channel_data.set(value);
    }

    pub(crate) fn wakeup_time(&self) -> u32 {
        self.wakeup_time.get()
    }

    pub(crate) fn stack_pointer(&self) -> *mut u8 {
        self.stack_pointer.get()
    }

    pub(crate) fn set_stack_pointer(&self, sp: *mut u8) {
        self.stack_pointer.set(sp);
    }

    pub(crate) fn stack_bottom(&self) -> *mut u32 {
        self.stack_bottom.get()
    }

    /// Whether this thread's stack canary is still intact and its saved
    /// stack pointer still lies within the stack region. The scheduler calls
    /// this on every thread it is about to switch into; a `false` result
    /// means the stack has overflowed and the kernel must halt.
    pub(crate) fn check_stack_canary(&self) -> bool {
        let bottom = self.stack_bottom.get();
        if bottom.is_null() {
            // The idle thread before `start()` or a thread never started.
            return true;
        }
        let sp = self.stack_pointer.get() as *mut u32;
        if sp < bottom || sp > self.stack_top.get() {
            return false;
        }
        unsafe { *bottom == STACK_CHECK_VALUE }
    }

    /// Report the number of bytes of stack actually touched, determined by
    /// scanning inward from the top for the fill pattern written at creation.
    /// Returns 0 if the stack canary has been overwritten (the scan would be
    /// meaningless) or pattern fill was disabled.
    pub fn stack_used(&self) -> usize {
        let bottom = self.stack_bottom.get();
        if bottom.is_null() {
            return 0;
        }
        unsafe {
            if *bottom != STACK_CHECK_VALUE {
                return 0;
            }
            let top = self.stack_top.get();
            let mut cursor = bottom.add(1);
            let mut unused_words = 1usize;
            while cursor < top {
                if *cursor != STACK_FILL_VALUE {
                    break;
                }
                cursor = cursor.add(1);
                unused_words += 1;
            }
            let total = (top as usize) - (bottom as usize);
            total - unused_words * core::mem::size_of::<u32>()
        }
    }

    pub fn stack_size(&self) -> usize {
        (self.stack_top.get() as usize).saturating_sub(self.stack_bottom.get() as usize)
    }

    pub(crate) fn add_cpu_time(&self, micros: u32) {
        if config::ENABLE_SYSTEM_LOAD {
            self.load_accumulator.set(self.load_accumulator.get().wrapping_add(micros));
        }
    }

    pub(crate) fn finish_load_sample(&self) {
        let accumulated = self.load_accumulator.get();
        self.permille_cpu.set(1000 * accumulated / config::SYSTEM_LOAD_SAMPLE_PERIOD_US as u32);
        self.load_accumulator.set(0);
    }

    pub fn cpu_permille(&self) -> u32 {
        self.permille_cpu.get()
    }

    /// This thread's share of CPU time over the last sample period, as a
    /// percentage. Always 0 with system-load accounting disabled.
    pub fn load(&self) -> u8 {
        (self.permille_cpu.get().min(1000) / 10) as u8
    }

    /// A diagnostic snapshot of this thread's name, state, priority, stack
    /// usage, and CPU load, suitable for a one-shot dump of every live
    /// thread. Grounded on `ar_thread_get_report`.
    pub fn report(&self) -> ThreadStatus {
        self.status_snapshot()
    }

    pub(crate) fn status_snapshot(&self) -> ThreadStatus {
        ThreadStatus {
            name: self.name.get(),
            unique_id: self.unique_id.get(),
            state: self.state.get(),
            priority: self.priority.get(),
            cpu_permille: self.permille_cpu.get(),
            max_stack_used: self.stack_used(),
            stack_size: self.stack_size(),
        }
    }
}

/// Sort predicate for the ready and suspended-for-priority-inheritance lists:
/// higher priority sorts first.
pub(crate) fn sort_by_priority(a: *const ListNode, b: *const ListNode) -> bool {
    unsafe {
        let ta = &*(*a).object::<Thread>();
        let tb = &*(*b).object::<Thread>();
        ta.priority.get() > tb.priority.get()
    }
}

/// Sort predicate for the sleeping list: earlier wakeup sorts first.
pub(crate) fn sort_by_wakeup(a: *const ListNode, b: *const ListNode) -> bool {
    unsafe {
        let ta = &*(*a).object::<Thread>();
        let tb = &*(*b).object::<Thread>();
        ta.wakeup_time.get() < tb.wakeup_time.get()
    }
}

/// The thread currently running on this core. Valid only once [`crate::run`]
/// has been called; before that, reaches for the not-yet-initialized
/// current-thread pointer.
pub fn current() -> &'static Thread {
    kernel().current_thread()
}

/// Put the calling thread to sleep for `duration_ms` milliseconds. Must be
/// called from thread context.
pub fn sleep(duration_ms: u32) -> KernelResult {
    if kernel().port().get_irq_state() {
        return Err(Status::NotFromInterrupt);
    }
    let ticks = if duration_ms == crate::INFINITE_TIMEOUT {
        crate::INFINITE_TIMEOUT
    } else {
        crate::milliseconds_to_ticks(duration_ms)
    };
    kernel().current_thread().sleep_for(ticks);
    Ok(())
}

/// Put the calling thread to sleep until the kernel's tick counter reaches
/// `wakeup_tick`. A `wakeup_tick` already in the past returns immediately.
pub fn sleep_until(wakeup_tick: u32) -> KernelResult {
    if kernel().port().get_irq_state() {
        return Err(Status::NotFromInterrupt);
    }
    let now = kernel().tick_count();
    if wakeup_tick <= now {
        return Ok(());
    }
    kernel().current_thread().sleep_for(wakeup_tick - now);
    Ok(())
}

fn deferred_resume(object: *const ()) {
    let thread = unsafe { &*(object as *const Thread) };
    let _ = thread.resume_internal();
}

fn deferred_suspend(object: *const ()) {
    let thread = unsafe { &*(object as *const Thread) };
    let _ = thread.suspend_internal();
}
