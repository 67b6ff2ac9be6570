//! Run loop: a per-thread cooperative multiplexer of timers, queue arrivals,
//! and posted function calls.
//!
//! Grounded on `ar_runloop.cpp`. A run loop is bound to at most one thread at
//! a time; [`RunLoop::run`] is the thread's own cooperative dispatch loop,
//! not a separate scheduling entity — it puts its thread to sleep between
//! events exactly the way any other blocking call would.

use core::cell::Cell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicI32, Ordering};

use crate::config;
use crate::kernel::kernel;
use crate::list::{List, ListNode};
use crate::status::{KernelResult, Status};
use crate::thread::Thread;
use crate::timer;

type PostedFn = fn(usize);

#[derive(Clone, Copy)]
struct PostedCall {
    function: PostedFn,
    param: usize,
}

/// What ended a call to [`RunLoop::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunLoopOutcome {
    /// `stop()` was called, or the run was nested and the outer run will
    /// keep going.
    Stopped,
    /// The overall timeout elapsed with nothing to report.
    TimedOut,
    /// A queue with no installed handler received an item; call
    /// [`RunLoop::received_queue`] to find out which one.
    QueueReceived,
}

/// The contract a run loop needs from a bound queue, independent of the
/// queue's element type and capacity. A run loop's pending-queues list holds
/// many different `Queue<T, N>` instantiations at once; this trait is how it
/// dispatches to each without caring what `T` or `N` is.
pub trait QueueSource {
    /// Number of items currently buffered.
    fn pending_count(&self) -> usize;
    /// Invoke the queue's installed handler, if any. Returns `false` if no
    /// handler was installed, in which case the run loop should surface the
    /// queue to its caller instead via [`RunLoopOutcome::QueueReceived`].
    fn invoke_handler(&self) -> bool;
    /// The queue's own address, used to identify it to the caller of `run()`.
    fn queue_ptr(&self) -> *const ();
}

/// The node type actually linked into [`RunLoop`]'s pending-queues list.
/// Every `Queue<T, N>` embeds one of these alongside its own storage so a
/// run loop can hold queues of different element types on a single
/// intrusive list: the list only ever sees this uniform wrapper, and
/// dispatch to the concrete queue happens through the [`QueueSource`]
/// trait object it carries rather than `ListNode::object::<ConcreteType>()`.
pub struct QueueSourceNode {
    pub(crate) node: ListNode,
    source: Cell<Option<&'static dyn QueueSource>>,
}

impl QueueSourceNode {
    pub const fn new() -> Self {
        QueueSourceNode { node: ListNode::new(core::ptr::null()), source: Cell::new(None) }
    }

    pub(crate) fn bind(&self, source: &'static dyn QueueSource) {
        self.node.rebind(self as *const Self as *const ());
        self.source.set(Some(source));
    }

    fn source(&self) -> &'static dyn QueueSource {
        self.source.get().expect("QueueSourceNode used before binding")
    }
}

/// A per-thread multiplexer of timers, bound queues, and posted function
/// calls. Caller-owned, `'static` storage like every other kernel object.
pub struct RunLoop {
    name: Cell<&'static str>,
    thread: Cell<*const Thread>,
    timers: List,
    /// Queues with at least one unread item, FIFO by the order they became
    /// non-empty.
    pending_queues: List,
    functions: core::cell::UnsafeCell<[MaybeUninit<PostedCall>; config::RUNLOOP_FUNCTION_QUEUE_SIZE]>,
    function_count: AtomicI32,
    function_head: Cell<i32>,
    function_tail: AtomicI32,
    is_running: Cell<bool>,
    stop_requested: Cell<bool>,
    received_queue: Cell<*const ()>,
    created_node: ListNode,
}

// SAFETY: all mutation happens under the kernel lock or via the same CAS
// discipline as the deferred-action queue; `functions` is only ever written
// through a slot reserved exclusively to one caller.
unsafe impl Sync for RunLoop {}

impl RunLoop {
    /// A run loop bound to no thread, with empty timer/queue/function lists.
    pub const fn new() -> Self {
        RunLoop {
            name: Cell::new(config::ANONYMOUS_OBJECT_NAME),
            thread: Cell::new(core::ptr::null()),
            timers: List::with_predicate(timer::sort_by_wakeup),
            pending_queues: List::new(),
            functions: core::cell::UnsafeCell::new(
                [const { MaybeUninit::uninit() }; config::RUNLOOP_FUNCTION_QUEUE_SIZE],
            ),
            function_count: AtomicI32::new(0),
            function_head: Cell::new(0),
            function_tail: AtomicI32::new(0),
            is_running: Cell::new(false),
            stop_requested: Cell::new(false),
            received_queue: Cell::new(core::ptr::null()),
            created_node: ListNode::new(core::ptr::null()),
        }
    }

    /// Register the run loop with the kernel. Must be called once on a
    /// `'static` run loop before any other method.
    pub fn init(&'static self, name: Option<&'static str>) {
        self.name.set(name.unwrap_or(config::ANONYMOUS_OBJECT_NAME));
        self.created_node.rebind(self as *const RunLoop as *const ());
        if config::GLOBAL_OBJECT_LISTS {
            unsafe { kernel().objects().run_loops.add(&self.created_node) };
        }
        log::debug!("run loop '{}' created", self.name.get());
    }

    pub fn name(&self) -> &'static str {
        self.name.get()
    }

    pub(crate) fn timers(&self) -> &List {
        &self.timers
    }

    /// Attach `timer` to this run loop, moving it here if it was previously
    /// attached elsewhere — `ar_runloop_add_timer` has no attachment guard.
    pub fn add_timer(&'static self, timer: &'static timer::Timer) {
        timer.set_run_loop(self as *const RunLoop);
    }

    /// Attach `queue` for event-driven receipt. `handler`, if given, is
    /// invoked by `run()` whenever the queue has an item instead of exiting
    /// with [`RunLoopOutcome::QueueReceived`]. Fails with
    /// [`Status::AlreadyAttached`] if the queue is already bound to a
    /// *different* run loop; re-attaching to the same one is a no-op.
    pub fn add_queue<T, const N: usize>(
        &'static self,
        queue: &'static crate::queue::Queue<T, N>,
        handler: Option<crate::queue::QueueHandler<T, N>>,
        handler_param: usize,
    ) -> KernelResult {
        if let Some(existing) = queue.bound_run_loop() {
            if !core::ptr::eq(existing, self as *const RunLoop) {
                return Err(Status::AlreadyAttached);
            }
        }
        queue.bind_run_loop(self as *const RunLoop, handler, handler_param);
        Ok(())
    }

    /// The run loop currently bound to the calling thread, if any.
    pub fn current() -> Option<&'static RunLoop> {
        let ptr = kernel().current_thread().run_loop();
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*ptr })
        }
    }

    /// Queue identity behind the most recent [`RunLoopOutcome::QueueReceived`]
    /// returned by [`RunLoop::run`].
    pub fn received_queue(&self) -> *const () {
        self.received_queue.get()
    }

    /// Resume the owning thread if the run loop is currently running (and
    /// therefore possibly asleep inside `run()`). A no-op otherwise.
    pub(crate) fn wake(&self) {
        let thread_ptr = self.thread.get();
        if self.is_running.get() && !thread_ptr.is_null() {
            let thread = unsafe { &*thread_ptr };
            let _ = thread.resume();
        }
    }

    /// Mark a bound queue's node as pending (if not already) and wake the run
    /// loop. Called by [`crate::queue::Queue::send`].
    pub(crate) fn notify_queue_pending(&self, node: &ListNode) {
        if !node.is_linked() {
            unsafe { self.pending_queues.add(node) };
        }
        self.wake();
    }

    /// Unlink a queue's node from the pending list, e.g. when the queue is
    /// deleted while still bound.
    pub(crate) fn pending_queues_remove(&self, node: &ListNode) {
        unsafe { self.pending_queues.remove(node) };
    }

    /// Drop this run loop's back-reference from a thread being deleted.
    pub(crate) fn clear_thread(&self) {
        self.thread.set(core::ptr::null());
        self.is_running.set(false);
    }

    fn pop_pending_queue_if_any(&self) -> Option<&'static dyn QueueSource> {
        let node = self.pending_queues.head()?;
        // SAFETY: every node linked on `pending_queues` was bound through
        // `QueueSourceNode::bind`, which always installs a `QueueSourceNode`.
        let source_node = unsafe { &*node.object::<QueueSourceNode>() };
        let source = source_node.source();
        if source.pending_count() < 2 {
            unsafe { self.pending_queues.remove(node) };
        }
        if source.pending_count() > 0 {
            Some(source)
        } else {
            None
        }
    }

    /// Run this run loop's dispatch loop on the calling thread for up to
    /// `timeout_ms` milliseconds, or indefinitely if
    /// [`crate::INFINITE_TIMEOUT`]. Nested calls on the same thread are
    /// allowed; only the innermost responds to [`RunLoop::stop`].
    pub fn run(&'static self, timeout_ms: u32) -> KernelResult<RunLoopOutcome> {
        if kernel().port().get_irq_state() {
            return Err(Status::NotFromInterrupt);
        }

        let current = kernel().current_thread();
        let current_run_loop = current.run_loop();
        let is_nested = self.is_running.get() && core::ptr::eq(self.thread.get(), current as *const Thread);

        if self.is_running.get() && !is_nested {
            return Err(Status::RunLoopAlreadyRunning);
        }
        if !current_run_loop.is_null() && !core::ptr::eq(current_run_loop, self as *const RunLoop) {
            return Err(Status::RunLoopAlreadyRunning);
        }

        self.received_queue.set(core::ptr::null());

        if !is_nested {
            current.set_run_loop(self as *const RunLoop);
            self.thread.set(current as *const Thread);
            self.stop_requested.set(false);
            self.is_running.set(true);
        }

        let start_tick = kernel().tick_count();
        let timeout_ticks = if timeout_ms == crate::INFINITE_TIMEOUT {
            crate::INFINITE_TIMEOUT
        } else {
            crate::milliseconds_to_ticks(timeout_ms)
        };

        let outcome = loop {
            timer::run_expired(&self.timers);

            let ran_function = self.run_one_posted_function();

            if let Some(source) = self.pop_pending_queue_if_any() {
                if !source.invoke_handler() {
                    self.received_queue.set(source.queue_ptr());
                    break RunLoopOutcome::QueueReceived;
                }
                continue;
            }

            if timeout_ticks != crate::INFINITE_TIMEOUT {
                let elapsed = kernel().tick_count().wrapping_sub(start_tick);
                if elapsed >= timeout_ticks {
                    break RunLoopOutcome::TimedOut;
                }
            }

            if self.stop_requested.get() {
                // Clear on consumption rather than only at the next `run()`
                // entry: an outer, still-running call must not also see this
                // flag and stop itself once the inner call returns.
                self.stop_requested.set(false);
                break RunLoopOutcome::Stopped;
            }

            if !ran_function {
                let mut sleep_ticks = if timeout_ticks == crate::INFINITE_TIMEOUT {
                    crate::INFINITE_TIMEOUT
                } else {
                    timeout_ticks.saturating_sub(kernel().tick_count().wrapping_sub(start_tick))
                };
                if let Some(node) = self.timers.head() {
                    let t: &timer::Timer = unsafe { &*node.object::<timer::Timer>() };
                    let wakeup_delta = t.wakeup().wrapping_sub(kernel().tick_count());
                    if wakeup_delta < sleep_ticks {
                        sleep_ticks = wakeup_delta;
                    }
                }
                if sleep_ticks != 0 {
                    let sleep_ms = if sleep_ticks == crate::INFINITE_TIMEOUT {
                        crate::INFINITE_TIMEOUT
                    } else {
                        crate::ticks_to_milliseconds(sleep_ticks)
                    };
                    let _ = crate::thread::sleep(sleep_ms);
                }
            }
        };

        if !is_nested {
            current.set_run_loop(core::ptr::null());
            self.thread.set(core::ptr::null());
            self.is_running.set(false);
        }

        Ok(outcome)
    }

    /// Stop the innermost `run()` on this run loop, waking it if it's
    /// currently asleep. Valid from any context, including ISRs.
    pub fn stop(&'static self) -> KernelResult {
        if kernel().port().get_irq_state() {
            return kernel().post_deferred(deferred_stop, self as *const RunLoop as *const ());
        }
        self.stop_requested.set(true);
        self.wake();
        Ok(())
    }

    fn run_one_posted_function(&self) -> bool {
        let count = self.function_count.load(Ordering::Acquire);
        if count == 0 {
            return false;
        }

        let head = self.function_head.get();
        let call = unsafe {
            let slots = &*self.functions.get();
            slots[head as usize].assume_init()
        };

        self.function_count.fetch_sub(1, Ordering::AcqRel);
        self.function_head.set((head + 1) % config::RUNLOOP_FUNCTION_QUEUE_SIZE as i32);

        (call.function)(call.param);
        true
    }

    /// Post a function to run on this run loop's thread the next time it
    /// dispatches, waking it if necessary. Safe to call from any context,
    /// including an ISR. Fails with [`Status::RunLoopQueueFull`] if the ring
    /// is already full. Grounded on `ar_runloop_perform`, which reserves its
    /// slot through the same atomic two-phase CAS as
    /// `ar_kernel_atomic_queue_insert`.
    pub fn perform(&'static self, function: PostedFn, param: usize) -> KernelResult {
        let size = config::RUNLOOP_FUNCTION_QUEUE_SIZE as i32;

        loop {
            let count = self.function_count.load(Ordering::Relaxed);
            if count + 1 > size {
                return Err(Status::RunLoopQueueFull);
            }
            if self
                .function_count
                .compare_exchange_weak(count, count + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        let tail = loop {
            let tail = self.function_tail.load(Ordering::Relaxed);
            let new_tail = (tail + 1) % size;
            if self
                .function_tail
                .compare_exchange_weak(tail, new_tail, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break tail;
            }
        };

        // SAFETY: the two-phase CAS above reserved slot `tail` exclusively
        // for this caller; nobody else writes it until it's drained.
        unsafe {
            let slots = &mut *self.functions.get();
            slots[tail as usize] = MaybeUninit::new(PostedCall { function, param });
        }

        self.wake();
        Ok(())
    }

    /// Tear down the run loop. Fails with [`Status::InvalidState`] while a
    /// `run()` is in progress.
    pub fn delete(&'static self) -> KernelResult {
        if self.is_running.get() {
            return Err(Status::InvalidState);
        }
        if config::GLOBAL_OBJECT_LISTS {
            unsafe { kernel().objects().run_loops.remove(&self.created_node) };
        }
        Ok(())
    }
}

fn deferred_stop(object: *const ()) {
    let run_loop = unsafe { &*(object as *const RunLoop) };
    run_loop.stop_requested.set(true);
    run_loop.wake();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_runloop_is_not_running() {
        static RL: RunLoop = RunLoop::new();
        RL.init(Some("test"));
        assert!(!RL.is_running.get());
    }
}
