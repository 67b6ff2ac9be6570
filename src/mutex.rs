//! Recursive mutex with priority inheritance.

use core::cell::Cell;

use crate::config;
use crate::kernel::{kernel, KernelGuard};
use crate::list::{List, ListNode};
use crate::status::{KernelResult, Status};
use crate::thread::{self, Thread};

/// A recursive mutex. While owned by a lower-priority thread than its
/// highest-priority waiter, the owner's priority is temporarily boosted to
/// match — priority inheritance — so a high-priority thread is never stuck
/// behind a preempted low-priority owner (priority inversion).
pub struct Mutex {
    name: Cell<&'static str>,
    owner: Cell<*const Thread>,
    owner_lock_count: Cell<u32>,
    original_priority: Cell<u8>,
    wait_list: List,
    created_node: ListNode,
}

// SAFETY: all mutation happens under `KernelGuard`.
unsafe impl Sync for Mutex {}

impl Mutex {
    /// An unowned mutex.
    pub const fn new() -> Self {
        Mutex {
            name: Cell::new(config::ANONYMOUS_OBJECT_NAME),
            owner: Cell::new(core::ptr::null()),
            owner_lock_count: Cell::new(0),
            original_priority: Cell::new(0),
            wait_list: List::with_predicate(thread::sort_by_priority),
            created_node: ListNode::new(core::ptr::null()),
        }
    }

    /// Register the mutex with the kernel. Must be called once on a
    /// `'static` mutex before any other method.
    pub fn init(&'static self, name: Option<&'static str>) {
        self.name.set(name.unwrap_or(config::ANONYMOUS_OBJECT_NAME));
        self.created_node.rebind(self as *const Mutex as *const ());
        if config::GLOBAL_OBJECT_LISTS {
            unsafe { kernel().objects().mutexes.add(&self.created_node) };
        }
        log::debug!("mutex '{}' created", self.name.get());
    }

    pub fn name(&self) -> &'static str {
        self.name.get()
    }

    pub fn is_locked(&self) -> bool {
        !self.owner.get().is_null()
    }

    /// The current owner, if any.
    pub fn owner(&self) -> Option<&'static Thread> {
        let ptr = self.owner.get();
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*ptr })
        }
    }

    /// Acquire the mutex, recursively if the caller already owns it, blocking
    /// up to `timeout_ms` otherwise.
    ///
    /// Calling from an ISR is only valid with `timeout_ms == 0`: the
    /// non-blocking fast path below never suspends, so it can run directly
    /// under the interrupted thread's identity without a deferred action.
    pub fn get(&'static self, timeout_ms: u32) -> KernelResult {
        if kernel().port().get_irq_state() && timeout_ms != 0 {
            return Err(Status::NotFromInterrupt);
        }

        loop {
            let _guard = KernelGuard::lock();
            let current = kernel().current_thread();

            match self.owner() {
                None => {
                    self.owner.set(current as *const Thread);
                    self.owner_lock_count.set(1);
                    return Ok(());
                }
                Some(owner) if core::ptr::eq(owner, current) => {
                    self.owner_lock_count.set(self.owner_lock_count.get() + 1);
                    return Ok(());
                }
                Some(owner) => {
                    if timeout_ms == 0 {
                        return Err(Status::Timeout);
                    }

                    if current.priority() > owner.priority() {
                        if self.original_priority.get() == 0 {
                            self.original_priority.set(owner.priority());
                        }
                        let _ = owner.set_priority(current.priority());
                    }

                    current.block(&self.wait_list, timeout_ms);
                    match current.unblock_status() {
                        Status::Success => {
                            self.owner.set(current as *const Thread);
                            self.owner_lock_count.set(1);
                            return Ok(());
                        }
                        other => return Err(other),
                    }
                }
            }
        }
    }

    /// Release one recursive lock level. Once the level reaches zero, restore
    /// the owner's original priority (if it was boosted) and hand the mutex
    /// to the highest-priority waiter. Never blocks, so it is valid from
    /// interrupt context with no timeout parameter to restrict.
    pub fn put(&'static self) -> KernelResult {
        let _guard = KernelGuard::lock();
        let current = kernel().current_thread();

        match self.owner() {
            None => return Err(Status::MutexAlreadyUnlocked),
            Some(owner) if !core::ptr::eq(owner, current) => return Err(Status::NotOwner),
            Some(owner) => {
                let count = self.owner_lock_count.get() - 1;
                self.owner_lock_count.set(count);
                if count > 0 {
                    return Ok(());
                }

                self.owner.set(core::ptr::null());

                if self.original_priority.get() != 0 {
                    let _ = owner.set_priority(self.original_priority.get());
                    self.original_priority.set(0);
                }

                if let Some(node) = self.wait_list.head() {
                    let waiter = unsafe { &*node.object::<Thread>() };
                    waiter.unblock_with_status(&self.wait_list, Status::Success);
                }

                Ok(())
            }
        }
    }

    /// Wake every waiter with [`Status::ObjectDeleted`]. Call before letting
    /// a mutex's storage be reused or go out of scope.
    pub fn delete(&'static self) {
        let _guard = KernelGuard::lock();
        while let Some(node) = self.wait_list.head() {
            let thread = unsafe { &*node.object::<Thread>() };
            thread.unblock_with_status(&self.wait_list, Status::ObjectDeleted);
        }
        if config::GLOBAL_OBJECT_LISTS {
            unsafe { kernel().objects().mutexes.remove(&self.created_node) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unowned_mutex_is_not_locked() {
        static M: Mutex = Mutex::new();
        M.init(Some("test"));
        assert!(!M.is_locked());
        assert!(M.owner().is_none());
    }
}
