//! Process-wide kernel singleton: the scheduler, the tick subsystem, and the
//! lock-count discipline every other primitive mutates state through.
//!
//! There is exactly one core, so `Kernel` is a single `'static` value reached
//! through [`kernel()`] rather than passed around. Mutual exclusion over its
//! fields is the lock-count discipline described on [`KernelGuard`], not
//! interrupt masking: the port is never asked to disable IRQs.

use core::cell::Cell;
use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use bitflags::bitflags;

use crate::config;
use crate::deferred::DeferredQueue;
use crate::list::List;
use crate::port::Port;
use crate::status::{KernelResult, Status};
use crate::thread::{self, Thread, ThreadState};

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    struct KernelFlags: u8 {
        const IS_RUNNING          = 0b0001;
        const NEEDS_RESCHEDULE    = 0b0010;
        const IS_RUNNING_DEFERRED = 0b0100;
        const NEEDS_ROUND_ROBIN   = 0b1000;
    }
}

/// Diagnostic-only registries of every live kernel object, threaded through a
/// second node embedded in each object. Never consulted by the scheduler;
/// only populated when [`config::GLOBAL_OBJECT_LISTS`] is set.
pub struct ObjectLists {
    pub threads: List,
    pub semaphores: List,
    pub mutexes: List,
    pub queues: List,
    pub channels: List,
    pub timers: List,
    pub run_loops: List,
}

impl ObjectLists {
    const fn new() -> Self {
        ObjectLists {
            threads: List::new(),
            semaphores: List::new(),
            mutexes: List::new(),
            queues: List::new(),
            channels: List::new(),
            timers: List::new(),
            run_loops: List::new(),
        }
    }
}

/// The kernel's own bookkeeping. One instance exists for the life of the
/// program, reached through [`kernel()`].
pub struct Kernel {
    current_thread: Cell<*const Thread>,
    ready_list: List,
    suspended_list: List,
    sleeping_list: List,
    flags: Cell<KernelFlags>,
    lock_count: AtomicI32,
    tick_count: AtomicU32,
    missed_tick_count: AtomicU32,
    next_wakeup: Cell<u32>,
    thread_id_counter: AtomicU32,
    deferred: DeferredQueue,
    idle_thread: Thread,
    idle_stack: core::cell::UnsafeCell<[u8; config::IDLE_THREAD_STACK_SIZE]>,
    objects: ObjectLists,
    port: Cell<Option<&'static dyn Port>>,
    last_load_sample_tick: Cell<u32>,
}

// SAFETY: every field is either an atomic or a `Cell` whose mutation is
// serialized by the lock-count discipline (see `KernelGuard`); the idle
// thread and its stack follow the same discipline as any other thread.
unsafe impl Sync for Kernel {}

static KERNEL: Kernel = Kernel::new();

/// The process-wide kernel instance.
pub fn kernel() -> &'static Kernel {
    &KERNEL
}

impl Kernel {
    const fn new() -> Self {
        Kernel {
            current_thread: Cell::new(core::ptr::null()),
            ready_list: List::with_predicate(thread::sort_by_priority),
            suspended_list: List::new(),
            sleeping_list: List::with_predicate(thread::sort_by_wakeup),
            flags: Cell::new(KernelFlags::empty()),
            lock_count: AtomicI32::new(0),
            tick_count: AtomicU32::new(0),
            missed_tick_count: AtomicU32::new(0),
            next_wakeup: Cell::new(0),
            thread_id_counter: AtomicU32::new(1),
            deferred: DeferredQueue::new(),
            idle_thread: Thread::new(),
            idle_stack: core::cell::UnsafeCell::new([0u8; config::IDLE_THREAD_STACK_SIZE]),
            objects: ObjectLists::new(),
            port: Cell::new(None),
            last_load_sample_tick: Cell::new(0),
        }
    }

    /// Install the board/architecture collaborator. Must be called exactly
    /// once, before [`Kernel::run`].
    pub fn set_port(&self, port: &'static dyn Port) {
        self.port.set(Some(port));
    }

    pub(crate) fn port(&self) -> &'static dyn Port {
        self.port.get().expect("kernel port not installed; call Kernel::set_port first")
    }

    pub(crate) fn ready_list(&self) -> &List {
        &self.ready_list
    }

    pub(crate) fn suspended_list(&self) -> &List {
        &self.suspended_list
    }

    pub(crate) fn sleeping_list(&self) -> &List {
        &self.sleeping_list
    }

    pub(crate) fn objects(&self) -> &ObjectLists {
        &self.objects
    }

    pub(crate) fn deferred(&self) -> &DeferredQueue {
        &self.deferred
    }

    pub fn current_thread(&self) -> &'static Thread {
        // SAFETY: set exactly once before `run()` (to the idle thread) and
        // thereafter only ever updated by the scheduler to another live,
        // `'static` thread.
        unsafe { &*self.current_thread.get() }
    }

    pub(crate) fn set_current_thread(&self, thread: &'static Thread) {
        self.current_thread.set(thread as *const Thread);
    }

    pub fn idle_thread(&self) -> &'static Thread {
        // SAFETY: `idle_thread` is a field of this `'static` singleton.
        unsafe { &*(&self.idle_thread as *const Thread) }
    }

    pub fn tick_count(&self) -> u32 {
        self.tick_count.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.flags.get().contains(KernelFlags::IS_RUNNING)
    }

    pub(crate) fn next_thread_id(&self) -> u32 {
        self.thread_id_counter.fetch_add(1, Ordering::AcqRel)
    }

    fn flags_insert(&self, bits: KernelFlags) {
        self.flags.set(self.flags.get() | bits);
    }

    fn flags_remove(&self, bits: KernelFlags) {
        self.flags.set(self.flags.get() - bits);
    }

    fn flags_contains(&self, bits: KernelFlags) -> bool {
        self.flags.get().contains(bits)
    }

    /// Mark the scheduler as needing to run again, and poke the port for a
    /// service call immediately if the kernel isn't currently locked.
    pub(crate) fn request_reschedule(&self) {
        self.flags_insert(KernelFlags::NEEDS_RESCHEDULE);
        self.poke_if_unlocked();
    }

    /// Request a scheduler pass. Equivalent to `request_reschedule`; kept as
    /// a distinct name at call sites that are really asking "let some other
    /// thread run" rather than "something changed, re-evaluate".
    pub(crate) fn enter_scheduler(&self) {
        self.request_reschedule();
    }

    fn poke_if_unlocked(&self) {
        if self.lock_count.load(Ordering::Acquire) == 0 && !self.flags_contains(KernelFlags::IS_RUNNING_DEFERRED) {
            self.port().service_call();
        }
    }

    /// Re-check whether the two leading ready-list entries share a priority,
    /// caching the answer as `needsRoundRobin` so the scheduler doesn't have
    /// to walk the list on every invocation.
    pub(crate) fn update_round_robin(&self) {
        let mut iter = self.ready_list.iter();
        let first = iter.next();
        let second = iter.next();
        let needs = match (first, second) {
            (Some(a), Some(b)) => unsafe {
                (*a.object::<Thread>()).priority() == (*b.object::<Thread>()).priority()
            },
            _ => false,
        };
        if needs {
            self.flags_insert(KernelFlags::NEEDS_ROUND_ROBIN);
        } else {
            self.flags_remove(KernelFlags::NEEDS_ROUND_ROBIN);
        }
    }

    /// Enqueue a one-argument action to run on the next scheduler entry.
    /// Safe to call from interrupt context.
    pub(crate) fn post_deferred(&self, action: fn(*const ()), object: *const ()) -> KernelResult {
        self.deferred.post(action, object)
    }

    /// Entry point for the port's service-call exception handler (PendSV,
    /// SVC, or whatever the target calls its "run the scheduler now"
    /// mechanism). Drains the deferred-action queue, selects the next thread
    /// to run, and returns its saved stack pointer for the port to load. The
    /// port must have already saved the outgoing thread's stack pointer into
    /// `current_thread().set_stack_pointer(...)` before calling this.
    pub fn service_call_handler(&self) -> *mut u8 {
        self.flags_remove(KernelFlags::NEEDS_RESCHEDULE);

        if !self.deferred.is_empty() {
            self.flags_insert(KernelFlags::IS_RUNNING_DEFERRED);
            self.deferred.run_pending();
            self.flags_remove(KernelFlags::IS_RUNNING_DEFERRED);
        }

        if self.flags_contains(KernelFlags::NEEDS_ROUND_ROBIN) {
            unsafe { self.ready_list.rotate() };
        }

        if config::ENABLE_LIST_CHECKS
            && !(self.ready_list.check_consistency()
                && self.sleeping_list.check_consistency()
                && self.suspended_list.check_consistency())
        {
            self.port().halt("kernel list corruption");
        }

        let next = match self.ready_list.head() {
            Some(node) => unsafe { &*node.object::<Thread>() },
            None => self.idle_thread(),
        };

        if !next.check_stack_canary() {
            self.port().halt("stack overflow");
        }

        let current = self.current_thread();
        if !core::ptr::eq(current, next) {
            if current.state() == ThreadState::Running {
                // Still ready/runnable, just no longer the chosen one; leave
                // it linked on the ready list as `Ready`.
                current.set_state_ready_from_running();
            }
            next.set_state_running();
            self.set_current_thread(next);
            if config::ENABLE_TRACE {
                log::trace!("switch: '{}' -> '{}'", current.name(), next.name());
            }
        }

        self.update_next_wakeup(self.tick_count());
        self.arm_tick_timer();

        next.stack_pointer()
    }

    /// Program the port's tick timer for the next scheduled wakeup, or
    /// disable it entirely if nothing is scheduled. A no-op, falling back to
    /// the port's free-running periodic tick, when
    /// [`config::ENABLE_TICKLESS_IDLE`] is off.
    fn arm_tick_timer(&self) {
        if !config::ENABLE_TICKLESS_IDLE {
            return;
        }
        match self.ticks_until_next_wakeup() {
            Some(ticks) => {
                let delay_us = ticks.saturating_mul(crate::TICK_PERIOD_US);
                self.port().set_timer_delay(true, delay_us);
            }
            None => self.port().set_timer_delay(false, 0),
        }
    }

    /// Called by the port's tick-timer ISR once per tick period.
    pub fn on_tick(&self) {
        if self.lock_count.load(Ordering::Acquire) != 0 {
            self.missed_tick_count.fetch_add(1, Ordering::AcqRel);
            self.flags_insert(KernelFlags::NEEDS_RESCHEDULE);
            return;
        }

        let missed = self.missed_tick_count.swap(0, Ordering::AcqRel);
        let elapsed = 1 + missed;
        let now = self.tick_count.fetch_add(elapsed, Ordering::AcqRel) + elapsed;

        self.wake_sleepers(now);
        self.sample_system_load(now);
        self.update_next_wakeup(now);
        self.request_reschedule();
    }

    fn wake_sleepers(&self, now: u32) {
        loop {
            let head = match self.sleeping_list.head() {
                Some(node) => node,
                None => break,
            };
            let thread = unsafe { &*head.object::<Thread>() };
            if thread.wakeup_time() == 0 || thread.wakeup_time() > now {
                break;
            }
            thread.wake_timed_out();
        }
    }

    fn update_next_wakeup(&self, now: u32) {
        let mut wakeup = match self.sleeping_list.head() {
            Some(node) => unsafe { (*node.object::<Thread>()).wakeup_time() },
            None => 0,
        };
        if wakeup == 0 && self.flags_contains(KernelFlags::NEEDS_ROUND_ROBIN) {
            wakeup = now + 1;
        }
        self.next_wakeup.set(wakeup);
    }

    /// Ticks until the next scheduled wakeup, or `None` if nothing is
    /// scheduled and the idle thread may sleep indefinitely.
    pub(crate) fn ticks_until_next_wakeup(&self) -> Option<u32> {
        let wakeup = self.next_wakeup.get();
        if wakeup == 0 {
            None
        } else {
            Some(wakeup.saturating_sub(self.tick_count()))
        }
    }

    /// Refresh every thread's `cpu_permille` once per sample period. Walks the
    /// diagnostic all-threads registry, so per-thread load is only available
    /// when [`config::GLOBAL_OBJECT_LISTS`] is enabled; with it disabled this
    /// is a no-op rather than a partial/misleading sample.
    fn sample_system_load(&self, now: u32) {
        if !config::ENABLE_SYSTEM_LOAD || !config::GLOBAL_OBJECT_LISTS {
            return;
        }
        let ticks_per_sample = (config::SYSTEM_LOAD_SAMPLE_PERIOD_US as u64
            / crate::TICK_PERIOD_US as u64)
            .max(1) as u32;
        if now.wrapping_sub(self.last_load_sample_tick.get()) < ticks_per_sample {
            return;
        }
        self.last_load_sample_tick.set(now);
        for node in self.objects.threads.iter() {
            unsafe { (*node.object::<Thread>()).finish_load_sample() };
        }
    }

    /// Start the scheduler. Never returns. Boots the idle thread, arms the
    /// tick timer, and falls into the first service call.
    ///
    /// # Safety
    /// The port must already be installed via [`Kernel::set_port`].
    pub fn run(&'static self) -> ! {
        assert!(!self.is_running(), "kernel already running");

        self.idle_thread.start(
            Some("idle"),
            idle_entry,
            0,
            // SAFETY: `idle_stack` is a `'static` field of this singleton and
            // is only ever bound to the one idle thread, which never exits.
            unsafe { &mut *self.idle_stack.get() },
            thread::IDLE_THREAD_PRIORITY,
            true,
        )
        .expect("idle thread must start");

        self.set_current_thread(self.idle_thread());
        self.idle_thread().set_state_running();
        self.flags_insert(KernelFlags::IS_RUNNING);

        self.port().init_system();
        self.port().init_tick_timer();
        self.port().service_call();

        loop {
            self.port().wait_for_interrupt();
        }
    }
}

fn idle_entry(_param: usize) {
    loop {
        if config::ENABLE_IDLE_SLEEP {
            kernel().port().wait_for_interrupt();
        } else {
            core::hint::spin_loop();
        }
    }
}

/// RAII guard implementing the kernel's lock-count discipline (§4.1): a
/// stack-scoped value that increments the lock count on construction and
/// decrements it on destruction, requesting a scheduler service call if the
/// count returns to zero with a reschedule pending.
///
/// [`KernelGuard::unlock`] does the reverse for a lock already held — it
/// temporarily releases it, then re-acquires it when dropped. `thread::block`
/// uses this to let the scheduler run while a thread is actually suspended,
/// without the blocking primitive's own guard losing track of its nesting.
pub struct KernelGuard {
    relock_on_drop: bool,
}

impl KernelGuard {
    /// Acquire the kernel lock.
    pub fn lock() -> Self {
        kernel().lock_count.fetch_add(1, Ordering::AcqRel);
        KernelGuard { relock_on_drop: false }
    }

    /// Temporarily release a lock already held by an outer [`KernelGuard`].
    pub fn unlock() -> Self {
        let prev = kernel().lock_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "KernelGuard::unlock with kernel not locked");
        KernelGuard { relock_on_drop: true }
    }
}

impl Drop for KernelGuard {
    fn drop(&mut self) {
        if self.relock_on_drop {
            kernel().lock_count.fetch_add(1, Ordering::AcqRel);
            return;
        }
        let prev = kernel().lock_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            kernel().poke_if_unlocked();
        }
    }
}

/// Returned status for operations that can only be validated once a kernel
/// error condition is checked; kept here rather than duplicated at every
/// call site that needs "this isn't valid from an ISR".
pub(crate) fn require_thread_context() -> KernelResult {
    if kernel().port().get_irq_state() {
        Err(Status::NotFromInterrupt)
    } else {
        Ok(())
    }
}
