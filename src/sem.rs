//! Counting semaphore.

use core::cell::Cell;

use crate::config;
use crate::kernel::{kernel, KernelGuard};
use crate::list::{List, ListNode};
use crate::status::{KernelResult, Status};
use crate::thread::Thread;

/// A counting semaphore. Waiters are woken strictly FIFO — priority is
/// ignored on purpose, to preserve the primitive's traditional semantics.
pub struct Semaphore {
    name: Cell<&'static str>,
    count: Cell<u32>,
    wait_list: List,
    created_node: ListNode,
}

// SAFETY: all mutation happens under `KernelGuard`.
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// A semaphore with no waiters and the given initial count.
    pub const fn new(initial_count: u32) -> Self {
        Semaphore {
            name: Cell::new(config::ANONYMOUS_OBJECT_NAME),
            count: Cell::new(initial_count),
            wait_list: List::new(),
            created_node: ListNode::new(core::ptr::null()),
        }
    }

    /// Register the semaphore with the kernel. Must be called once on a
    /// `'static` semaphore before any other method.
    pub fn init(&'static self, name: Option<&'static str>) {
        self.name.set(name.unwrap_or(config::ANONYMOUS_OBJECT_NAME));
        self.created_node.rebind(self as *const Semaphore as *const ());
        if config::GLOBAL_OBJECT_LISTS {
            unsafe { kernel().objects().semaphores.add(&self.created_node) };
        }
        log::debug!("semaphore '{}' created (count {})", self.name.get(), self.count.get());
    }

    pub fn name(&self) -> &'static str {
        self.name.get()
    }

    pub fn count(&self) -> u32 {
        self.count.get()
    }

    /// Take one count, blocking up to `timeout_ms` if none is available.
    pub fn get(&'static self, timeout_ms: u32) -> KernelResult {
        loop {
            let _guard = KernelGuard::lock();

            if self.count.get() > 0 {
                self.count.set(self.count.get() - 1);
                return Ok(());
            }

            if timeout_ms == 0 {
                return Err(Status::Timeout);
            }

            let current = kernel().current_thread();
            current.block(&self.wait_list, timeout_ms);
            // `_guard` is re-acquired by the time `block` returns.
            match current.unblock_status() {
                Status::Timeout | Status::ObjectDeleted => return Err(current.unblock_status()),
                _ => {} // Success: loop and recheck count, a higher-priority
                        // waiter may have taken it first.
            }
        }
    }

    /// Release one count, waking the longest-waiting thread if any.
    pub fn put(&'static self) -> KernelResult {
        if kernel().port().get_irq_state() {
            return kernel().post_deferred(deferred_put, self as *const Semaphore as *const ());
        }
        self.put_internal();
        Ok(())
    }

    fn put_internal(&'static self) {
        let _guard = KernelGuard::lock();
        self.count.set(self.count.get() + 1);
        if let Some(node) = self.wait_list.head() {
            let thread = unsafe { &*node.object::<Thread>() };
            thread.unblock_with_status(&self.wait_list, Status::Success);
        }
    }

    /// Wake every waiter with [`Status::ObjectDeleted`]. Call before letting
    /// a semaphore's storage be reused or go out of scope.
    pub fn delete(&'static self) {
        let _guard = KernelGuard::lock();
        while let Some(node) = self.wait_list.head() {
            let thread = unsafe { &*node.object::<Thread>() };
            thread.unblock_with_status(&self.wait_list, Status::ObjectDeleted);
        }
        if config::GLOBAL_OBJECT_LISTS {
            unsafe { kernel().objects().semaphores.remove(&self.created_node) };
        }
    }
}

fn deferred_put(object: *const ()) {
    let sem = unsafe { &*(object as *const Semaphore) };
    sem.put_internal();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_starts_at_initial_value() {
        static SEM: Semaphore = Semaphore::new(3);
        SEM.init(Some("test"));
        assert_eq!(SEM.count(), 3);
    }

    #[test]
    fn put_then_get_is_a_no_op_on_count() {
        crate::port::test_support::install();
        static SEM: Semaphore = Semaphore::new(0);
        SEM.init(Some("test"));
        SEM.put().unwrap();
        assert_eq!(SEM.count(), 1);
        SEM.get(0).unwrap();
        assert_eq!(SEM.count(), 0);
    }

    #[test]
    fn zero_timeout_on_empty_semaphore_times_out() {
        static SEM: Semaphore = Semaphore::new(0);
        SEM.init(Some("test"));
        assert_eq!(SEM.get(0), Err(Status::Timeout));
    }
}
