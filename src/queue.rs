//! Bounded blocking message queue.
//!
//! The original kernel stores raw bytes behind a `void*` and an element-size
//! field; a Rust port can do better and be generic over the element type
//! instead, while keeping the same fixed-capacity, caller-owned storage and
//! blocking discipline.

use core::cell::Cell;
use core::mem::MaybeUninit;

use crate::config;
use crate::kernel::{kernel, KernelGuard};
use crate::list::{List, ListNode};
use crate::runloop::{QueueSource, QueueSourceNode, RunLoop};
use crate::status::{KernelResult, Status};
use crate::thread::Thread;

/// A handler invoked by a run loop when a bound queue has an item ready,
/// instead of the run loop exiting `run()` with `QueueReceived`.
pub type QueueHandler<T, const N: usize> = fn(&'static Queue<T, N>, usize);

/// A fixed-capacity FIFO of `T`, with threads blocking on send when full and
/// on receive when empty.
pub struct Queue<T, const N: usize> {
    name: Cell<&'static str>,
    storage: core::cell::UnsafeCell<[MaybeUninit<T>; N]>,
    head: Cell<usize>,
    count: Cell<usize>,
    send_blocked: List,
    receive_blocked: List,
    created_node: ListNode,
    /// Run loop this queue is bound to for event-driven receipt, if any.
    run_loop: Cell<*const RunLoop>,
    handler: Cell<Option<(QueueHandler<T, N>, usize)>>,
    /// Membership on the bound run loop's pending-queues list.
    pub(crate) run_loop_node: QueueSourceNode,
    /// Single-slot staging area for a value handed to [`Queue::send`] from
    /// interrupt context, where the call cannot block until the deferred
    /// drain actually runs. An ISR must not post a second deferred send on
    /// the same queue before the first has drained.
    isr_staging: core::cell::UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: all mutation happens under `KernelGuard`; `T` crosses threads only
// by value, through a slot reserved for exactly one reader. `isr_staging` is
// written by at most one in-flight ISR send before the deferred drain reads
// it back out.
unsafe impl<T, const N: usize> Sync for Queue<T, N> {}

impl<T, const N: usize> Queue<T, N> {
    /// An empty queue.
    pub const fn new() -> Self {
        const { assert!(N > 0, "queue capacity must be nonzero") };
        Queue {
            name: Cell::new(config::ANONYMOUS_OBJECT_NAME),
            storage: core::cell::UnsafeCell::new([const { MaybeUninit::uninit() }; N]),
            head: Cell::new(0),
            count: Cell::new(0),
            send_blocked: List::new(),
            receive_blocked: List::new(),
            created_node: ListNode::new(core::ptr::null()),
            run_loop: Cell::new(core::ptr::null()),
            handler: Cell::new(None),
            run_loop_node: QueueSourceNode::new(),
            isr_staging: core::cell::UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Register the queue with the kernel. Must be called once on a
    /// `'static` queue before any other method.
    pub fn init(&'static self, name: Option<&'static str>) {
        self.name.set(name.unwrap_or(config::ANONYMOUS_OBJECT_NAME));
        self.created_node.rebind(self as *const Self as *const ());
        if config::GLOBAL_OBJECT_LISTS {
            unsafe { kernel().objects().queues.add(&self.created_node) };
        }
        log::debug!("queue '{}' created (capacity {})", self.name.get(), N);
    }

    pub fn name(&self) -> &'static str {
        self.name.get()
    }

    pub fn count(&self) -> usize {
        self.count.get()
    }

    pub fn is_empty(&self) -> bool {
        self.count.get() == 0
    }

    pub fn is_full(&self) -> bool {
        self.count.get() == N
    }

    fn tail_index(&self) -> usize {
        (self.head.get() + self.count.get()) % N
    }

    /// The run loop this queue is currently bound to, if any.
    pub(crate) fn bound_run_loop(&self) -> Option<*const RunLoop> {
        let ptr = self.run_loop.get();
        if ptr.is_null() {
            None
        } else {
            Some(ptr)
        }
    }

    /// Bind the queue to `run_loop` for event-driven receipt. Called by
    /// [`RunLoop::add_queue`]; not meant to be called directly.
    pub(crate) fn bind_run_loop(
        &'static self,
        run_loop: *const RunLoop,
        handler: Option<QueueHandler<T, N>>,
        handler_param: usize,
    ) {
        self.run_loop.set(run_loop);
        self.handler.set(handler.map(|h| (h, handler_param)));
        self.run_loop_node.bind(self);
    }

    /// Append `value`, blocking up to `timeout_ms` if the queue is full.
    ///
    /// Calling from an ISR is only valid with `timeout_ms == 0`; the send is
    /// staged and deferred to the next scheduler entry rather than mutating
    /// the queue directly, matching the source's `ar_queue_send` IRQ path.
    pub fn send(&'static self, value: T, timeout_ms: u32) -> KernelResult {
        if kernel().port().get_irq_state() {
            if timeout_ms != 0 {
                return Err(Status::NotFromInterrupt);
            }
            // SAFETY: stashed until the deferred action below drains and
            // reads it back out; the caller must not post a second deferred
            // send on this queue before the first one has drained.
            unsafe { *self.isr_staging.get() = MaybeUninit::new(value) };
            return kernel().post_deferred(deferred_send::<T, N>, self as *const Self as *const ());
        }

        self.send_internal(value, timeout_ms)
    }

    fn send_internal(&'static self, value: T, timeout_ms: u32) -> KernelResult {
        let mut value = Some(value);
        loop {
            let _guard = KernelGuard::lock();

            if self.count.get() < N {
                let index = self.tail_index();
                unsafe {
                    let slots = &mut *self.storage.get();
                    slots[index] = MaybeUninit::new(value.take().unwrap());
                }
                self.count.set(self.count.get() + 1);

                if let Some(node) = self.receive_blocked.head() {
                    let thread = unsafe { &*node.object::<Thread>() };
                    thread.unblock_with_status(&self.receive_blocked, Status::Success);
                } else if let Some(run_loop_ptr) = self.bound_run_loop() {
                    // Nobody was directly blocked on receive; if a run loop
                    // is watching this queue, make sure it knows there's
                    // something to dispatch.
                    let run_loop = unsafe { &*run_loop_ptr };
                    run_loop.notify_queue_pending(&self.run_loop_node.node);
                }

                return Ok(());
            }

            if timeout_ms == 0 {
                return Err(Status::QueueFull);
            }

            let current = kernel().current_thread();
            current.block(&self.send_blocked, timeout_ms);
            match current.unblock_status() {
                Status::Success => continue, // recheck: room may already be gone again
                other => return Err(other),
            }
        }
    }

    /// Remove and return the oldest element, blocking up to `timeout_ms` if
    /// the queue is empty.
    pub fn receive(&'static self, timeout_ms: u32) -> KernelResult<T> {
        loop {
            let _guard = KernelGuard::lock();

            if self.count.get() > 0 {
                let index = self.head.get();
                let value = unsafe {
                    let slots = &mut *self.storage.get();
                    core::mem::replace(&mut slots[index], MaybeUninit::uninit()).assume_init()
                };
                self.head.set((index + 1) % N);
                self.count.set(self.count.get() - 1);

                if let Some(node) = self.send_blocked.head() {
                    let thread = unsafe { &*node.object::<Thread>() };
                    thread.unblock_with_status(&self.send_blocked, Status::Success);
                }

                return Ok(value);
            }

            if timeout_ms == 0 {
                return Err(Status::QueueEmpty);
            }

            let current = kernel().current_thread();
            current.block(&self.receive_blocked, timeout_ms);
            match current.unblock_status() {
                Status::Success => continue,
                other => return Err(other),
            }
        }
    }

    /// Wake every waiter with [`Status::ObjectDeleted`]. Call before letting
    /// a queue's storage be reused or go out of scope.
    pub fn delete(&'static self) {
        let _guard = KernelGuard::lock();
        while let Some(node) = self.send_blocked.head() {
            let thread = unsafe { &*node.object::<Thread>() };
            thread.unblock_with_status(&self.send_blocked, Status::ObjectDeleted);
        }
        while let Some(node) = self.receive_blocked.head() {
            let thread = unsafe { &*node.object::<Thread>() };
            thread.unblock_with_status(&self.receive_blocked, Status::ObjectDeleted);
        }
        if self.run_loop_node.node.is_linked() {
            unsafe { (*self.run_loop.get()).pending_queues_remove(&self.run_loop_node.node) };
        }
        if config::GLOBAL_OBJECT_LISTS {
            unsafe { kernel().objects().queues.remove(&self.created_node) };
        }
    }
}

impl<T, const N: usize> QueueSource for Queue<T, N> {
    fn pending_count(&self) -> usize {
        self.count.get()
    }

    fn invoke_handler(&self) -> bool {
        match self.handler.get() {
            Some((handler, param)) => {
                // SAFETY: every `Queue` reachable through a `QueueSourceNode`
                // was bound via `bind_run_loop`, which requires `&'static
                // self` in the first place.
                let this: &'static Self = unsafe { &*(self as *const Self) };
                handler(this, param);
                true
            }
            None => false,
        }
    }

    fn queue_ptr(&self) -> *const () {
        self as *const Self as *const ()
    }
}

/// Deferred `send` posted from ISR context. Always runs with an effective
/// zero timeout: if the queue is still full by the time this drains, the
/// staged value is simply dropped, matching `ar_queue_deferred_send`.
fn deferred_send<T, const N: usize>(object: *const ()) {
    let queue = unsafe { &*(object as *const Queue<T, N>) };
    let value = unsafe { core::ptr::read((*queue.isr_staging.get()).as_ptr()) };
    if queue.send_internal(value, 0).is_err() {
        log::warn!("queue '{}' deferred send found no room", queue.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_send_receive_order() {
        crate::port::test_support::install();
        static Q: Queue<u32, 4> = Queue::new();
        Q.init(Some("test"));
        Q.send(1, 0).unwrap();
        Q.send(2, 0).unwrap();
        assert_eq!(Q.receive(0).unwrap(), 1);
        assert_eq!(Q.receive(0).unwrap(), 2);
        assert!(Q.is_empty());
    }

    #[test]
    fn full_queue_rejects_zero_timeout_send() {
        crate::port::test_support::install();
        static Q: Queue<u32, 1> = Queue::new();
        Q.init(Some("test"));
        Q.send(1, 0).unwrap();
        assert_eq!(Q.send(2, 0), Err(Status::QueueFull));
    }

    #[test]
    fn empty_queue_rejects_zero_timeout_receive() {
        static Q: Queue<u32, 1> = Queue::new();
        Q.init(Some("test"));
        assert_eq!(Q.receive(0), Err(Status::QueueEmpty));
    }
}
