//! Deferred-action queue: lets interrupt context postpone kernel operations
//! until the scheduler runs next, instead of mutating kernel state directly
//! from an ISR.
//!
//! The queue is a fixed-capacity ring buffer reserved with a lock-free
//! compare-and-swap loop, so [`DeferredQueue::post`] is safe to call from
//! interrupt context without disabling interrupts. Each entry is a tagged
//! action — one or two pointer-sized arguments — rather than the raw
//! function-pointer-plus-`void*` pairs a C kernel would use, since Rust's
//! enums give us a real tagged union instead of a magic sentinel value to
//! mark a "this slot holds the previous entry's second argument" row.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicI32, Ordering};

use crate::config;
use crate::status::{KernelResult, Status};

type Action1 = fn(*const ());
type Action2 = fn(*const (), *const ());

#[derive(Clone, Copy)]
enum Entry {
    One(Action1, *const ()),
    Two(Action2, *const (), *const ()),
}

/// ISR-safe queue of kernel operations deferred from interrupt context.
pub struct DeferredQueue {
    count: AtomicI32,
    first: AtomicI32,
    last: AtomicI32,
    entries: UnsafeCell<[MaybeUninit<Entry>; config::DEFERRED_ACTION_QUEUE_SIZE]>,
}

// SAFETY: slots are reserved via CAS before being written, and only the
// scheduler drains them (always from thread/exception context with the
// kernel otherwise unlocked), so there is no concurrent read/write of the
// same slot.
unsafe impl Sync for DeferredQueue {}

impl DeferredQueue {
    pub const fn new() -> Self {
        DeferredQueue {
            count: AtomicI32::new(0),
            first: AtomicI32::new(0),
            last: AtomicI32::new(0),
            entries: UnsafeCell::new(
                [const { MaybeUninit::uninit() }; config::DEFERRED_ACTION_QUEUE_SIZE],
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count.load(Ordering::Relaxed) == 0
    }

    /// Reset to empty. Only valid before the kernel starts running.
    pub(crate) fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.first.store(0, Ordering::Relaxed);
        self.last.store(0, Ordering::Relaxed);
    }

    fn reserve(&self) -> Option<i32> {
        let size = config::DEFERRED_ACTION_QUEUE_SIZE as i32;

        loop {
            let count = self.count.load(Ordering::Relaxed);
            if count + 1 > size {
                return None;
            }
            if self
                .count
                .compare_exchange_weak(count, count + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        loop {
            let last = self.last.load(Ordering::Relaxed);
            let new_last = (last + 1) % size;
            if self
                .last
                .compare_exchange_weak(last, new_last, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(last);
            }
        }
    }

    fn write(&self, index: i32, entry: Entry) {
        // SAFETY: `index` was just returned by `reserve`, which guarantees no
        // other caller holds the same slot until it is drained.
        unsafe {
            let slots = &mut *self.entries.get();
            slots[index as usize] = MaybeUninit::new(entry);
        }
    }

    /// Enqueue a one-argument deferred action.
    pub fn post(&self, action: Action1, object: *const ()) -> KernelResult {
        let index = match self.reserve() {
            Some(i) => i,
            None => crate::kernel::kernel().port().halt("deferred action queue overflow"),
        };
        self.write(index, Entry::One(action, object));
        crate::kernel::kernel().enter_scheduler();
        Ok(())
    }

    /// Enqueue a two-argument deferred action.
    pub fn post2(&self, action: Action2, object: *const (), arg: *const ()) -> KernelResult {
        let index = match self.reserve() {
            Some(i) => i,
            None => crate::kernel::kernel().port().halt("deferred action queue overflow"),
        };
        self.write(index, Entry::Two(action, object, arg));
        crate::kernel::kernel().enter_scheduler();
        Ok(())
    }

    /// Drain and execute every currently queued action, in FIFO order. Only
    /// the scheduler entry path calls this, with the kernel unlocked.
    pub(crate) fn run_pending(&self) {
        loop {
            if self.is_empty() {
                break;
            }

            let i = self.first.load(Ordering::Relaxed);
            let entry = unsafe {
                let slots = &*self.entries.get();
                slots[i as usize].assume_init()
            };

            match entry {
                Entry::One(action, object) => action(object),
                Entry::Two(action, object, arg) => action(object, arg),
            }

            let size = config::DEFERRED_ACTION_QUEUE_SIZE as i32;
            let next = (i + 1) % size;
            self.count.fetch_sub(1, Ordering::AcqRel);
            self.first.store(next, Ordering::Release);
        }
    }
}
