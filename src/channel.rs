//! Rendezvous channel: zero-capacity synchronous hand-off of a value between
//! exactly one sender and one receiver.
//!
//! Unlike [`crate::queue::Queue`], a channel never buffers. A `send` that
//! finds no waiting receiver blocks the sender and leaves its value parked on
//! the sender's own stack; the eventual receiver (or, symmetrically, a
//! blocked receiver) copies it out directly. This mirrors the source's
//! `ar_channel_t`, which stashes a `void*` into the blocked thread's
//! `m_channelData` field rather than allocating a buffer.

use core::cell::Cell;
use core::mem::MaybeUninit;

use crate::config;
use crate::kernel::{kernel, KernelGuard};
use crate::list::{List, ListNode};
use crate::status::{KernelResult, Status};
use crate::thread::Thread;

/// A synchronous, unbuffered hand-off channel for values of type `T`.
pub struct Channel<T> {
    name: Cell<&'static str>,
    blocked_senders: List,
    blocked_receivers: List,
    created_node: ListNode,
    /// Single-slot staging area for a value handed to [`Channel::send`] from
    /// interrupt context, where the call cannot block until the deferred
    /// drain actually runs. An ISR must not post a second deferred send on
    /// the same channel before the first has drained; this mirrors the
    /// source, which likewise assumes the caller-owned `value` pointer stays
    /// valid until the deferred action executes.
    isr_staging: core::cell::UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: all mutation happens under `KernelGuard`; a value crosses from
// sender to receiver by direct copy while both threads are parked, never
// concurrently accessed.
unsafe impl<T> Sync for Channel<T> {}

impl<T> Channel<T> {
    /// A channel with nobody waiting on either side.
    pub const fn new() -> Self {
        Channel {
            name: Cell::new(config::ANONYMOUS_OBJECT_NAME),
            blocked_senders: List::new(),
            blocked_receivers: List::new(),
            created_node: ListNode::new(core::ptr::null()),
            isr_staging: core::cell::UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Register the channel with the kernel. Must be called once on a
    /// `'static` channel before any other method.
    pub fn init(&'static self, name: Option<&'static str>) {
        self.name.set(name.unwrap_or(config::ANONYMOUS_OBJECT_NAME));
        self.created_node.rebind(self as *const Self as *const ());
        if config::GLOBAL_OBJECT_LISTS {
            unsafe { kernel().objects().channels.add(&self.created_node) };
        }
        log::debug!("channel '{}' created", self.name.get());
    }

    pub fn name(&self) -> &'static str {
        self.name.get()
    }

    /// Hand `value` to a receiver, blocking up to `timeout_ms` if none is
    /// currently waiting.
    ///
    /// Calling from an ISR is only valid with `timeout_ms == 0`; the hand-off
    /// (or the decision that nobody was waiting) is deferred to the next
    /// scheduler entry, matching the source's `ar_channel_send` IRQ handling.
    pub fn send(&'static self, value: T, timeout_ms: u32) -> KernelResult {
        if kernel().port().get_irq_state() {
            if timeout_ms != 0 {
                return Err(Status::NotFromInterrupt);
            }
            // SAFETY: stashed until the deferred action below drains and
            // reads it back out; see the field doc on `isr_staging`.
            unsafe { *self.isr_staging.get() = MaybeUninit::new(value) };
            return kernel().post_deferred(deferred_send::<T>, self as *const Self as *const ());
        }

        self.send_receive_internal(true, value, timeout_ms)
    }

    /// Take a value from a sender, blocking up to `timeout_ms` if none is
    /// currently waiting. Not valid from interrupt context under any
    /// timeout: a receiver must actually be able to block.
    pub fn receive(&'static self, timeout_ms: u32) -> KernelResult<T> {
        if kernel().port().get_irq_state() {
            return Err(Status::NotFromInterrupt);
        }

        let _guard = KernelGuard::lock();

        if let Some(node) = self.blocked_senders.head() {
            let sender = unsafe { &*node.object::<Thread>() };
            let src = sender.channel_data() as *const T;
            let value = unsafe { core::ptr::read(src) };
            sender.unblock_with_status(&self.blocked_senders, Status::Success);
            return Ok(value);
        }

        if timeout_ms == 0 {
            return Err(Status::ChannelEmpty);
        }

        let mut slot: MaybeUninit<T> = MaybeUninit::uninit();
        let current = kernel().current_thread();
        current.set_channel_data(slot.as_mut_ptr() as *mut ());
        current.block(&self.blocked_receivers, timeout_ms);

        match current.unblock_status() {
            Status::Success => Ok(unsafe { slot.assume_init() }),
            other => {
                unsafe { self.blocked_receivers.remove(current.blocked_node()) };
                Err(other)
            }
        }
    }

    fn send_receive_internal(&'static self, _is_sending: bool, value: T, timeout_ms: u32) -> KernelResult {
        let _guard = KernelGuard::lock();

        if let Some(node) = self.blocked_receivers.head() {
            let receiver = unsafe { &*node.object::<Thread>() };
            let dest = receiver.channel_data() as *mut T;
            unsafe { core::ptr::write(dest, value) };
            receiver.unblock_with_status(&self.blocked_receivers, Status::Success);
            return Ok(());
        }

        if timeout_ms == 0 {
            return Err(Status::ChannelEmpty);
        }

        let mut slot = MaybeUninit::new(value);
        let current = kernel().current_thread();
        current.set_channel_data(slot.as_mut_ptr() as *mut ());
        current.block(&self.blocked_senders, timeout_ms);

        match current.unblock_status() {
            Status::Success => {
                // The receiver already read the value out of `slot` by the
                // time we're resumed; forget it instead of dropping so we
                // don't double-drop (the receiver now owns it).
                core::mem::forget(slot);
                Ok(())
            }
            other => {
                unsafe { self.blocked_senders.remove(current.blocked_node()) };
                // Nobody ever read `slot`; drop it normally by letting
                // `slot` go out of scope here with its value intact.
                Err(other)
            }
        }
    }

    /// Wake every waiter with [`Status::ObjectDeleted`]. Call before letting
    /// a channel's storage be reused or go out of scope.
    pub fn delete(&'static self) {
        let _guard = KernelGuard::lock();
        while let Some(node) = self.blocked_senders.head() {
            let thread = unsafe { &*node.object::<Thread>() };
            thread.unblock_with_status(&self.blocked_senders, Status::ObjectDeleted);
        }
        while let Some(node) = self.blocked_receivers.head() {
            let thread = unsafe { &*node.object::<Thread>() };
            thread.unblock_with_status(&self.blocked_receivers, Status::ObjectDeleted);
        }
        if config::GLOBAL_OBJECT_LISTS {
            unsafe { kernel().objects().channels.remove(&self.created_node) };
        }
    }
}

/// Deferred `send` posted from ISR context. Always runs with an effective
/// zero timeout: if nobody happens to be receiving yet, the value is simply
/// dropped, matching `ar_channel_deferred_send`'s use of `kArNoTimeout`.
fn deferred_send<T>(object: *const ()) {
    let channel = unsafe { &*(object as *const Channel<T>) };
    let value = unsafe { core::ptr::read((*channel.isr_staging.get()).as_ptr()) };
    if channel.send_receive_internal(true, value, 0).is_err() {
        log::warn!("channel '{}' deferred send found no receiver", channel.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_send_with_no_receiver_fails() {
        crate::port::test_support::install();
        static CH: Channel<u32> = Channel::new();
        CH.init(Some("test"));
        assert_eq!(CH.send(5, 0), Err(Status::ChannelEmpty));
    }

    #[test]
    fn zero_timeout_receive_with_no_sender_fails() {
        crate::port::test_support::install();
        static CH: Channel<u32> = Channel::new();
        CH.init(Some("test"));
        assert_eq!(CH.receive(0), Err(Status::ChannelEmpty));
    }
}
