//! Blocking call adapter: synchronous command/response over the mailbox.
//!
//! [`CommandChannel`] is the generic bridge used by both stacks: post a
//! command, suspend the caller, resume it when the interrupt-context
//! response delivery releases the gate. Callers are serialized through an
//! async mutex — the vendor protocol has no correlation IDs, so one
//! outstanding request per channel is the correctness mechanism, not an
//! optimization.
//!
//! Responses are delivered through [`CommandChannel::on_response`] directly
//! from the receive interrupt, bypassing the event queue. This keeps the
//! event consumer free to issue commands of its own while it handles an
//! event without deadlocking on its own queue.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::Duration;

use crate::gate::{GateBusy, ReplyGate};
use crate::transport::{Mailbox, SubmitError};

/// Failure of a bridged command/response round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestError {
    /// The reply gate was already claimed. Cannot happen through
    /// [`CommandChannel::request`], which serializes callers; it is
    /// reported rather than ignored in case a raw gate user races us.
    Busy,
    /// The mailbox rejected the command synchronously. Nothing was sent.
    Submit(SubmitError),
    /// No response arrived within the configured timeout.
    Timeout,
}

impl From<GateBusy> for RequestError {
    fn from(_: GateBusy) -> Self {
        Self::Busy
    }
}

impl From<SubmitError> for RequestError {
    fn from(e: SubmitError) -> Self {
        Self::Submit(e)
    }
}

/// Synchronous-call-over-asynchronous-channel bridge for one mailbox channel.
///
/// `T` is the typed reply released by the receive path.
pub struct CommandChannel<'d, M: Mailbox, T> {
    mailbox: &'d M,
    lock: Mutex<CriticalSectionRawMutex, ()>,
    gate: ReplyGate<T>,
    timeout: Option<Duration>,
}

impl<'d, M: Mailbox, T: Copy> CommandChannel<'d, M, T> {
    /// `timeout` bounds every request; `None` blocks indefinitely, which is
    /// what the vendor glue historically did.
    pub fn new(mailbox: &'d M, timeout: Option<Duration>) -> Self {
        Self {
            mailbox,
            lock: Mutex::new(()),
            gate: ReplyGate::new(),
            timeout,
        }
    }

    /// Send `cmd` and block the calling task until the response is released.
    ///
    /// A second caller suspends on the channel lock until the first round
    /// trip has fully completed; no two commands are ever in flight at once.
    pub async fn request(&self, cmd: M::Command) -> Result<T, RequestError> {
        let _permit = self.lock.lock().await;

        // Claim the slot before posting so a response that beats us to the
        // suspension point is latched, not lost.
        let pending = self.gate.begin()?;
        self.mailbox.post(&cmd)?;

        match self.timeout {
            Some(timeout) => pending
                .wait_timeout(timeout)
                .await
                .map_err(|_| RequestError::Timeout),
            None => Ok(pending.wait().await),
        }
    }

    /// Interrupt-context delivery of the command response.
    ///
    /// Returns `false` if no request was waiting (stale or duplicate
    /// response); the value is dropped in that case.
    pub fn on_response(&self, value: T) -> bool {
        self.gate.release(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::{Cell, RefCell};

    use embassy_futures::select::{select, Either};
    use embassy_futures::{block_on, join::join, yield_now};

    struct FakeMailbox {
        posted: RefCell<Vec<u32>>,
        outstanding: Cell<bool>,
        fail_next: Cell<bool>,
    }

    impl FakeMailbox {
        fn new() -> Self {
            Self {
                posted: RefCell::new(Vec::new()),
                outstanding: Cell::new(false),
                fail_next: Cell::new(false),
            }
        }
    }

    impl Mailbox for FakeMailbox {
        type Command = u32;

        fn post(&self, cmd: &u32) -> Result<(), SubmitError> {
            if self.fail_next.take() {
                return Err(SubmitError::QueueFull);
            }
            // A post while a previous command is unanswered would be a
            // mutual-exclusion violation.
            assert!(!self.outstanding.get(), "overlapping requests on one channel");
            self.outstanding.set(true);
            self.posted.borrow_mut().push(*cmd);
            Ok(())
        }
    }

    async fn respond_forever(channel: &CommandChannel<'_, FakeMailbox, u8>, fake: &FakeMailbox) {
        loop {
            if fake.outstanding.get() {
                fake.outstanding.set(false);
                channel.on_response(0);
            }
            yield_now().await;
        }
    }

    #[test]
    fn requests_are_serialized() {
        let fake = FakeMailbox::new();
        let channel: CommandChannel<'_, _, u8> = CommandChannel::new(&fake, None);

        let both = join(channel.request(1), channel.request(2));
        let result = block_on(select(both, respond_forever(&channel, &fake)));

        match result {
            Either::First((a, b)) => {
                assert_eq!(a, Ok(0));
                assert_eq!(b, Ok(0));
            }
            Either::Second(_) => unreachable!(),
        }
        assert_eq!(*fake.posted.borrow(), vec![1, 2]);
    }

    #[test]
    fn timeout_is_enforced_and_channel_recovers() {
        let fake = FakeMailbox::new();
        let channel: CommandChannel<'_, _, u8> =
            CommandChannel::new(&fake, Some(Duration::from_millis(10)));

        // No responder: the request must come back with Timeout instead of
        // blocking forever.
        let result = block_on(channel.request(1));
        assert_eq!(result, Err(RequestError::Timeout));

        // The timed-out slot is vacated; the channel keeps working.
        fake.outstanding.set(false);
        let result = block_on(select(channel.request(2), respond_forever(&channel, &fake)));
        match result {
            Either::First(r) => assert_eq!(r, Ok(0)),
            Either::Second(_) => unreachable!(),
        }
    }

    #[test]
    fn submit_failure_returns_immediately() {
        let fake = FakeMailbox::new();
        let channel: CommandChannel<'_, _, u8> = CommandChannel::new(&fake, None);

        fake.fail_next.set(true);
        let result = block_on(channel.request(1));
        assert_eq!(result, Err(RequestError::Submit(SubmitError::QueueFull)));

        // The failed submit released its claim without waiting.
        let result = block_on(select(channel.request(2), respond_forever(&channel, &fake)));
        match result {
            Either::First(r) => assert_eq!(r, Ok(0)),
            Either::Second(_) => unreachable!(),
        }
    }
}
