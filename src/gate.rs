//! Single-slot pending-reply gate.
//!
//! The coprocessor protocol carries no request/response correlation IDs, so the
//! only way to attribute a completion event to a caller is to allow at most one
//! outstanding wait per logical channel. [`ReplyGate`] enforces that discipline:
//! [`ReplyGate::begin`] claims the slot *before* the command is posted and a
//! second claim is a reported error, never silent corruption.
//!
//! A release with no claimed slot is dropped: a later wait must observe the
//! *next* release, not a stale one. A release landing between `begin` and
//! `wait` is latched, which closes the race where the coprocessor answers
//! before the caller reaches its suspension point.

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::WakerRegistration;
use embassy_time::{with_timeout, Duration};

/// The gate already has an outstanding wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GateBusy;

/// No release arrived within the configured window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WaitTimeout;

struct Slot<T> {
    occupied: bool,
    value: Option<T>,
    waker: WakerRegistration,
}

/// One logical reply channel: at most one outstanding wait at a time.
///
/// `release` is callable from interrupt context and never blocks.
pub struct ReplyGate<T> {
    slot: Mutex<CriticalSectionRawMutex, RefCell<Slot<T>>>,
}

impl<T: Copy> ReplyGate<T> {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(RefCell::new(Slot {
                occupied: false,
                value: None,
                waker: WakerRegistration::new(),
            })),
        }
    }

    /// Claim the slot for an upcoming wait.
    ///
    /// Call this before posting the command whose completion will be awaited,
    /// so that a reply delivered before [`PendingReply::wait`] is not lost.
    /// Fails with [`GateBusy`] while a previous claim is still outstanding.
    pub fn begin(&self) -> Result<PendingReply<'_, T>, GateBusy> {
        self.slot.lock(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.occupied {
                return Err(GateBusy);
            }
            slot.occupied = true;
            slot.value = None;
            Ok(())
        })?;
        Ok(PendingReply { gate: self })
    }

    /// Deliver a reply, waking the outstanding wait if there is one.
    ///
    /// Returns `false` if no wait was outstanding; the value is dropped in
    /// that case and the next wait will block for a subsequent release.
    pub fn release(&self, value: T) -> bool {
        self.slot.lock(|slot| {
            let mut slot = slot.borrow_mut();
            if !slot.occupied {
                return false;
            }
            slot.value = Some(value);
            slot.waker.wake();
            true
        })
    }
}

impl<T: Copy> Default for ReplyGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// An outstanding claim on a [`ReplyGate`].
///
/// Dropping it without waiting vacates the slot, so a claim made for a command
/// that failed to submit costs nothing.
#[must_use = "the gate slot stays claimed until this is awaited or dropped"]
pub struct PendingReply<'a, T: Copy> {
    gate: &'a ReplyGate<T>,
}

impl<T: Copy> PendingReply<'_, T> {
    /// Suspend until the matching release arrives.
    pub async fn wait(self) -> T {
        poll_fn(|cx| {
            self.gate.slot.lock(|slot| {
                let mut slot = slot.borrow_mut();
                match slot.value.take() {
                    Some(value) => Poll::Ready(value),
                    None => {
                        slot.waker.register(cx.waker());
                        Poll::Pending
                    }
                }
            })
        })
        .await
    }

    /// [`wait`](Self::wait) bounded by `timeout`.
    ///
    /// On timeout the slot is vacated; a release arriving afterwards is
    /// dropped like any other release with no waiter.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<T, WaitTimeout> {
        with_timeout(timeout, self.wait()).await.map_err(|_| WaitTimeout)
    }
}

impl<T: Copy> Drop for PendingReply<'_, T> {
    fn drop(&mut self) {
        self.gate.slot.lock(|slot| {
            let mut slot = slot.borrow_mut();
            slot.occupied = false;
            slot.value = None;
        });
    }
}
