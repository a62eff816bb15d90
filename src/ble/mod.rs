//! BLE GAP session management over the coprocessor mailbox.
//!
//! [`BleLink`] owns the GAP/GATT side of the bridge: stack bring-up, the
//! advertising lifecycle, the session state machine and the GAP event
//! demultiplexer. Events arrive from the receive interrupt through
//! [`BleLink::on_event`] and are consumed by [`BleLink::run`]; all session
//! state mutation happens on the consumer side.
//!
//! GAP procedures that span a command *and* a later completion event
//! (terminate, security request) go through a dedicated [`ReplyGate`] layered
//! on top of the command channel: the command's own status release comes back
//! through the channel, the procedure completion through the gate.

pub mod types;

use core::cell::{Cell, RefCell};

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_time::{Instant, Timer};

use crate::channel::{CommandChannel, RequestError};
use crate::config::LinkConfig;
use crate::gate::{PendingReply, ReplyGate};
use crate::transport::{AppEvent, FlowControl, InitError, Mailbox, Notifier, PowerControl, PowerMode};

use types::{
    AdvKind, BleCommand, BleEvent, BleStatus, ConfigValue, ConnHandle, ConnStatus, DisconnectReason,
    GapProc, PairingStatus, Reply, SessionState,
};

/// Depth of the interrupt-to-consumer event queue.
const EVENT_QUEUE_DEPTH: usize = 8;

/// Failure of a GAP procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProcError {
    /// The procedure needs a connection and there is none.
    NotConnected,
    /// Another gated procedure is still outstanding.
    Busy,
    /// The completion event did not arrive within the GAP timeout.
    Timeout,
    /// The underlying command round trip failed.
    Request(RequestError),
}

impl From<RequestError> for ProcError {
    fn from(e: RequestError) -> Self {
        Self::Request(e)
    }
}

/// BLE session layer for one mailbox.
pub struct BleLink<'d, M: Mailbox<Command = BleCommand>> {
    config: LinkConfig,
    cmd: CommandChannel<'d, M, Reply>,
    gap_gate: ReplyGate<BleStatus>,
    session: Mutex<CriticalSectionRawMutex, RefCell<SessionState>>,
    events: Channel<CriticalSectionRawMutex, BleEvent, EVENT_QUEUE_DEPTH>,
    adv_deadline: Mutex<CriticalSectionRawMutex, Cell<Option<Instant>>>,
    notifier: &'d dyn Notifier,
    power: &'d dyn PowerControl,
}

impl<'d, M: Mailbox<Command = BleCommand>> BleLink<'d, M> {
    pub fn new(
        mailbox: &'d M,
        notifier: &'d dyn Notifier,
        power: &'d dyn PowerControl,
        config: LinkConfig,
    ) -> Self {
        Self {
            cmd: CommandChannel::new(mailbox, config.request_timeout),
            gap_gate: ReplyGate::new(),
            session: Mutex::new(RefCell::new(SessionState::new())),
            events: Channel::new(),
            adv_deadline: Mutex::new(Cell::new(None)),
            notifier,
            power,
            config,
        }
    }

    /// Snapshot of the session state.
    pub fn session(&self) -> SessionState {
        self.session.lock(|s| *s.borrow())
    }

    pub fn status(&self) -> ConnStatus {
        self.session.lock(|s| s.borrow().status)
    }

    fn handle(&self) -> Option<ConnHandle> {
        self.session.lock(|s| s.borrow().handle)
    }

    /// Bring up the BLE stack and start fast advertising.
    ///
    /// The coprocessor loses its BLE state in Off mode, so Off stays vetoed
    /// for as long as the stack runs.
    pub async fn init(&self) -> Result<(), InitError> {
        self.power.request(PowerMode::Off, false);

        let status = self.cmd.request(BleCommand::StackInit).await?.status();
        if !status.is_success() {
            return Err(InitError::Coprocessor(status.0));
        }

        self.bringup(BleCommand::Reset).await?;
        self.bringup(BleCommand::WriteConfig(ConfigValue::PublicAddress(
            self.config.bd_addr,
        )))
        .await?;
        self.bringup(BleCommand::WriteConfig(ConfigValue::StaticRandomAddress(
            self.config.static_random_addr,
        )))
        .await?;
        self.bringup(BleCommand::WriteConfig(ConfigValue::IdentityRoot(
            self.config.identity_root,
        )))
        .await?;
        self.bringup(BleCommand::WriteConfig(ConfigValue::EncryptionRoot(
            self.config.encryption_root,
        )))
        .await?;
        self.bringup(BleCommand::SetTxPowerLevel(self.config.tx_power_level))
            .await?;
        self.bringup(BleCommand::GattInit).await?;
        self.bringup(BleCommand::GapInit {
            role: self.config.role,
        })
        .await?;

        let sec = &self.config.security;
        self.bringup(BleCommand::SetIoCapability(sec.io_capability)).await?;
        self.bringup(BleCommand::SetAuthenticationRequirement {
            mitm: sec.mitm,
            bonding: sec.bonding,
            use_fixed_pin: sec.use_fixed_pin,
            fixed_pin: sec.fixed_pin,
            key_size_min: sec.key_size_min,
            key_size_max: sec.key_size_max,
        })
        .await?;
        if sec.bonding {
            self.bringup(BleCommand::ConfigureWhitelist).await?;
        }

        self.advertise(AdvKind::Fast).await?;
        Ok(())
    }

    /// One bring-up command; a controller-reported failure is logged but not
    /// fatal, matching how the vendor sequence treats these.
    async fn bringup(&self, cmd: BleCommand) -> Result<(), RequestError> {
        let status = self.cmd.request(cmd).await?.status();
        if !status.is_success() {
            warn!("bringup command {:?} failed with status {:?}", cmd, status);
        }
        Ok(())
    }

    /// Interrupt-context event delivery.
    ///
    /// Returns [`FlowControl::Disable`] when the queue is full; the event was
    /// not consumed and the transport must pace and re-offer it.
    pub fn on_event(&self, event: BleEvent) -> FlowControl {
        match self.events.try_send(event) {
            Ok(()) => FlowControl::Enable,
            Err(_) => FlowControl::Disable,
        }
    }

    /// Interrupt-context delivery of a command response.
    pub fn on_command_response(&self, reply: Reply) -> bool {
        self.cmd.on_response(reply)
    }

    /// Event consumer loop. Run this as its own task.
    pub async fn run(&self) -> ! {
        loop {
            let deadline = self.adv_deadline.lock(|d| d.get());
            let event = match deadline {
                Some(at) => match select(self.events.receive(), Timer::at(at)).await {
                    Either::First(event) => event,
                    Either::Second(()) => {
                        self.adv_deadline.lock(|d| d.set(None));
                        if self.status() == ConnStatus::FastAdv {
                            debug!("initial advertising window over, switching to low power");
                            if let Err(e) = self.advertise(AdvKind::LowPower).await {
                                warn!("advertising downgrade failed: {:?}", e);
                            }
                        }
                        continue;
                    }
                },
                None => self.events.receive().await,
            };
            self.handle_event(event).await;
        }
    }

    /// Start (or restart) advertising in the given regime.
    pub async fn advertise(&self, kind: AdvKind) -> Result<(), RequestError> {
        if self.status() != ConnStatus::Idle {
            self.bringup(BleCommand::SetNonDiscoverable).await?;
        }
        let (interval_min, interval_max) = match kind {
            AdvKind::Fast => self.config.fast_adv_interval,
            AdvKind::LowPower => self.config.lp_adv_interval,
        };
        self.bringup(BleCommand::SetDiscoverable {
            interval_min,
            interval_max,
        })
        .await?;

        let (status, deadline) = match kind {
            AdvKind::Fast => (
                ConnStatus::FastAdv,
                Some(Instant::now() + self.config.initial_adv_timeout),
            ),
            AdvKind::LowPower => (ConnStatus::LowPowerAdv, None),
        };
        self.session.lock(|s| s.borrow_mut().status = status);
        self.adv_deadline.lock(|d| d.set(deadline));
        Ok(())
    }

    /// Process one GAP event. Called from [`run`](Self::run); exposed for
    /// applications that drive their own consumer loop.
    pub async fn handle_event(&self, event: BleEvent) {
        match event {
            BleEvent::ConnectionComplete { handle, peer } => {
                info!("connected, handle {:?}", handle);
                self.adv_deadline.lock(|d| d.set(None));
                let bonded = match self.cmd.request(BleCommand::IsDeviceBonded { peer }).await {
                    Ok(reply) => reply.status().is_success(),
                    Err(e) => {
                        warn!("bonded-device lookup failed: {:?}", e);
                        false
                    }
                };
                self.session.lock(|s| {
                    let mut s = s.borrow_mut();
                    s.status = ConnStatus::ConnectedServer;
                    s.handle = Some(handle);
                    s.peer = Some(peer);
                    s.peer_bonded = bonded;
                });
                if let Err(e) = self.refresh_peer_security().await {
                    warn!("security level query failed: {:?}", e);
                }
                self.notifier.notify(AppEvent::Connected, Some(handle));
            }

            BleEvent::DisconnectionComplete { handle, reason } => {
                let (known, peer) = self.session.lock(|s| {
                    let s = s.borrow();
                    (s.handle, s.peer)
                });
                if known.is_none() || known == Some(handle) {
                    info!("disconnected, handle {:?} reason {:?}", handle, reason);
                    self.session.lock(|s| *s.borrow_mut() = SessionState::new());
                    if reason.is_mic_failure() {
                        // The peer's keys no longer match ours. Drop its bond
                        // and start over from a clean security database so the
                        // next pairing can succeed.
                        warn!("MIC failure, purging bonding state");
                        if let Some(peer) = peer {
                            if let Err(e) = self
                                .cmd
                                .request(BleCommand::RemoveBondedDevice { peer })
                                .await
                            {
                                warn!("bonded device removal failed: {:?}", e);
                            }
                        }
                        if let Err(e) = self.cmd.request(BleCommand::ClearSecurityDb).await {
                            warn!("security database purge failed: {:?}", e);
                        }
                    }
                    self.notifier.notify(AppEvent::Disconnected, Some(handle));
                    self.gap_gate.release(BleStatus::SUCCESS);
                } else {
                    warn!("disconnection for unknown handle {:?}", handle);
                }
                // The device must always come back discoverable after a
                // disconnection event, whatever its cause or handle.
                if let Err(e) = self.advertise(AdvKind::Fast).await {
                    warn!("re-advertise after disconnect failed: {:?}", e);
                }
            }

            BleEvent::PairingComplete { handle, status } => {
                let (in_flight, was_bonded) = self.session.lock(|s| {
                    let s = s.borrow();
                    (s.security_request_in_flight, s.peer_bonded)
                });
                if in_flight {
                    self.gap_gate.release(pairing_status_code(status));
                }
                match status {
                    PairingStatus::Success => {
                        info!("pairing complete");
                        if let Err(e) = self.refresh_peer_security().await {
                            warn!("security level query failed: {:?}", e);
                        }
                        // Re-query the bonded flag so a repeated
                        // pairing-complete on the same link does not rerun the
                        // forced disconnect below.
                        self.refresh_peer_bonded().await;
                        if !was_bonded {
                            // First pairing with this peer: leave the
                            // controller a quiet window to commit the bond to
                            // NVM, then disconnect so the peer reconnects on
                            // the encrypted link.
                            Timer::after(self.config.settle_delay).await;
                            self.notifier.notify(AppEvent::Disconnecting, Some(handle));
                            if let Err(e) = self
                                .cmd
                                .request(BleCommand::Terminate {
                                    handle,
                                    reason: DisconnectReason::REMOTE_USER_TERMINATED,
                                })
                                .await
                            {
                                warn!("post-pairing disconnect failed: {:?}", e);
                            }
                        }
                    }
                    PairingStatus::Timeout | PairingStatus::Failed => {
                        // Half-established keys are worse than none.
                        warn!("pairing did not complete: {:?}", status);
                        if let Err(e) = self.cmd.request(BleCommand::ClearSecurityDb).await {
                            warn!("security database purge failed: {:?}", e);
                        }
                    }
                }
            }

            BleEvent::PasskeyRequest { handle } => {
                if self.config.security.use_fixed_pin {
                    if let Err(e) = self
                        .cmd
                        .request(BleCommand::PasskeyResponse {
                            handle,
                            pin: self.config.security.fixed_pin,
                        })
                        .await
                    {
                        warn!("passkey response failed: {:?}", e);
                    }
                } else {
                    info!("passkey requested, waiting for application response");
                }
            }

            BleEvent::NumericComparisonRequest { handle, value } => {
                info!("numeric comparison value {}", value);
                if let Err(e) = self
                    .cmd
                    .request(BleCommand::NumericComparisonConfirm {
                        handle,
                        confirm: true,
                    })
                    .await
                {
                    warn!("numeric comparison confirm failed: {:?}", e);
                }
            }

            BleEvent::BondLost { handle } => {
                info!("peer lost its bond, re-allowing pairing");
                if let Err(e) = self.cmd.request(BleCommand::AllowRebond { handle }).await {
                    warn!("allow-rebond failed: {:?}", e);
                }
            }

            BleEvent::SlaveSecurityInitiated => {
                debug!("slave security request acknowledged");
            }

            BleEvent::GapProcComplete { status } => {
                if status.is_success() {
                    debug!("GAP procedure complete");
                } else {
                    warn!("GAP procedure failed with status {:?}", status);
                }
            }
        }
    }

    /// Run a GAP procedure against the current connection.
    ///
    /// Terminate and security-request span a later completion event and block
    /// until it arrives (bounded by the configured GAP timeout); the others
    /// complete with the command status.
    pub async fn run_procedure(&self, proc: GapProc) -> Result<BleStatus, ProcError> {
        let handle = self.handle().ok_or(ProcError::NotConnected)?;
        match proc {
            GapProc::Terminate(reason) => {
                let pending = self.gap_gate.begin().map_err(|_| ProcError::Busy)?;
                let status = self
                    .cmd
                    .request(BleCommand::Terminate { handle, reason })
                    .await?
                    .status();
                if !status.is_success() {
                    // Command rejected: no disconnection event will follow.
                    return Ok(status);
                }
                self.wait_gap(pending).await
            }
            GapProc::SecurityRequest => {
                let pending = self.gap_gate.begin().map_err(|_| ProcError::Busy)?;
                self.session
                    .lock(|s| s.borrow_mut().security_request_in_flight = true);
                let status = self
                    .cmd
                    .request(BleCommand::SlaveSecurityRequest { handle })
                    .await?
                    .status();
                if !status.is_success() {
                    self.session
                        .lock(|s| s.borrow_mut().security_request_in_flight = false);
                    return Ok(status);
                }
                let result = self.wait_gap(pending).await;
                self.session
                    .lock(|s| s.borrow_mut().security_request_in_flight = false);
                result
            }
            GapProc::AllowRebond => Ok(self
                .cmd
                .request(BleCommand::AllowRebond { handle })
                .await?
                .status()),
            GapProc::PasskeyResponse => Ok(self
                .cmd
                .request(BleCommand::PasskeyResponse {
                    handle,
                    pin: self.config.security.fixed_pin,
                })
                .await?
                .status()),
            GapProc::NumericComparisonConfirm => Ok(self
                .cmd
                .request(BleCommand::NumericComparisonConfirm {
                    handle,
                    confirm: true,
                })
                .await?
                .status()),
        }
    }

    async fn wait_gap(&self, pending: PendingReply<'_, BleStatus>) -> Result<BleStatus, ProcError> {
        match self.config.gap_timeout {
            Some(timeout) => pending
                .wait_timeout(timeout)
                .await
                .map_err(|_| ProcError::Timeout),
            None => Ok(pending.wait().await),
        }
    }

    /// Ask the central to initiate pairing, if the link is not already
    /// adequately secured.
    ///
    /// Skipped when the peer is bonded and the link is past security mode 1
    /// level 1; returns success without touching the controller in that case.
    pub async fn slave_security_request(&self) -> Result<BleStatus, ProcError> {
        let (bonded, mode, level) = self.session.lock(|s| {
            let s = s.borrow();
            (s.peer_bonded, s.security_mode, s.security_level)
        });
        if !bonded || (mode == 1 && level == 1) {
            self.run_procedure(GapProc::SecurityRequest).await
        } else {
            Ok(BleStatus::SUCCESS)
        }
    }

    /// Re-read the link's security mode and level from the controller.
    pub async fn refresh_peer_security(&self) -> Result<(u8, u8), ProcError> {
        let handle = self.handle().ok_or(ProcError::NotConnected)?;
        match self.cmd.request(BleCommand::GetSecurityLevel { handle }).await? {
            Reply::SecurityLevel { mode, level } => {
                self.session.lock(|s| {
                    let mut s = s.borrow_mut();
                    s.security_mode = mode;
                    s.security_level = level;
                });
                Ok((mode, level))
            }
            Reply::Status(status) => {
                warn!("security level query rejected: {:?}", status);
                Ok(self.session.lock(|s| {
                    let s = s.borrow();
                    (s.security_mode, s.security_level)
                }))
            }
        }
    }

    /// Re-query whether the current peer has a stored bond and update the
    /// session flag.
    async fn refresh_peer_bonded(&self) {
        let peer = self.session.lock(|s| s.borrow().peer);
        if let Some(peer) = peer {
            let bonded = match self.cmd.request(BleCommand::IsDeviceBonded { peer }).await {
                Ok(reply) => reply.status().is_success(),
                Err(e) => {
                    // Pairing just succeeded; assume the bond stuck.
                    warn!("bonded-device lookup failed: {:?}", e);
                    true
                }
            };
            self.session.lock(|s| s.borrow_mut().peer_bonded = bonded);
        }
    }

    /// Drop every stored bond.
    pub async fn clear_security_db(&self) -> Result<BleStatus, ProcError> {
        Ok(self.cmd.request(BleCommand::ClearSecurityDb).await?.status())
    }
}

fn pairing_status_code(status: PairingStatus) -> BleStatus {
    match status {
        PairingStatus::Success => BleStatus::SUCCESS,
        // Callers only branch on success; any non-zero code marks failure.
        PairingStatus::Timeout | PairingStatus::Failed => BleStatus(0x01),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::{Cell, RefCell};

    use embassy_futures::select::{select, select3, Either, Either3};
    use embassy_futures::{block_on, join::join, yield_now};
    use embassy_time::Duration;

    use crate::transport::SubmitError;
    use super::types::PeerAddress;

    const HANDLE: ConnHandle = ConnHandle(0x0801);
    const PEER: PeerAddress = PeerAddress {
        kind: 0,
        addr: [1, 2, 3, 4, 5, 6],
    };

    struct FakeMailbox {
        posted: RefCell<Vec<BleCommand>>,
        outstanding: Cell<Option<BleCommand>>,
        stack_init_status: Cell<u8>,
        bonded: Cell<bool>,
        security: Cell<(u8, u8)>,
    }

    impl FakeMailbox {
        fn new() -> Self {
            Self {
                posted: RefCell::new(Vec::new()),
                outstanding: Cell::new(None),
                stack_init_status: Cell::new(0),
                bonded: Cell::new(false),
                security: Cell::new((1, 1)),
            }
        }
    }

    impl Mailbox for FakeMailbox {
        type Command = BleCommand;

        fn post(&self, cmd: &BleCommand) -> Result<(), SubmitError> {
            assert!(
                self.outstanding.get().is_none(),
                "overlapping commands on the BLE channel"
            );
            self.outstanding.set(Some(*cmd));
            self.posted.borrow_mut().push(*cmd);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        events: RefCell<Vec<AppEvent>>,
    }

    impl Notifier for FakeNotifier {
        fn notify(&self, event: AppEvent, _handle: Option<ConnHandle>) {
            self.events.borrow_mut().push(event);
        }
    }

    #[derive(Default)]
    struct FakePower {
        requests: RefCell<Vec<(PowerMode, bool)>>,
    }

    impl PowerControl for FakePower {
        fn request(&self, mode: PowerMode, enable: bool) {
            self.requests.borrow_mut().push((mode, enable));
        }
    }

    async fn respond_forever(link: &BleLink<'_, FakeMailbox>, fake: &FakeMailbox) {
        loop {
            if let Some(cmd) = fake.outstanding.take() {
                let reply = match cmd {
                    BleCommand::StackInit => Reply::Status(BleStatus(fake.stack_init_status.get())),
                    BleCommand::IsDeviceBonded { .. } => Reply::Status(if fake.bonded.get() {
                        BleStatus::SUCCESS
                    } else {
                        BleStatus(0x41)
                    }),
                    BleCommand::GetSecurityLevel { .. } => {
                        let (mode, level) = fake.security.get();
                        Reply::SecurityLevel { mode, level }
                    }
                    _ => Reply::Status(BleStatus::SUCCESS),
                };
                link.on_command_response(reply);
            }
            yield_now().await;
        }
    }

    fn run_with_responder<F: core::future::Future>(
        link: &BleLink<'_, FakeMailbox>,
        fake: &FakeMailbox,
        work: F,
    ) -> F::Output {
        match block_on(select(work, respond_forever(link, fake))) {
            Either::First(out) => out,
            Either::Second(()) => unreachable!("responder never completes"),
        }
    }

    async fn connect(link: &BleLink<'_, FakeMailbox>) {
        link.handle_event(BleEvent::ConnectionComplete {
            handle: HANDLE,
            peer: PEER,
        })
        .await;
    }

    fn posted_contains(fake: &FakeMailbox, wanted: &BleCommand) -> bool {
        fake.posted.borrow().iter().any(|c| c == wanted)
    }

    #[test]
    fn init_runs_bringup_sequence_and_starts_fast_advertising() {
        let fake = FakeMailbox::new();
        let notifier = FakeNotifier::default();
        let power = FakePower::default();
        let link = BleLink::new(&fake, &notifier, &power, LinkConfig::default());

        run_with_responder(&link, &fake, link.init()).unwrap();

        let posted = fake.posted.borrow();
        assert_eq!(posted[0], BleCommand::StackInit);
        assert_eq!(posted[1], BleCommand::Reset);
        assert!(matches!(posted.last(), Some(BleCommand::SetDiscoverable { interval_min: 0x80, .. })));
        assert!(posted.contains(&BleCommand::GattInit));
        assert!(posted.contains(&BleCommand::GapInit { role: 0x01 }));
        assert!(posted.contains(&BleCommand::ConfigureWhitelist));
        drop(posted);

        assert_eq!(link.status(), ConnStatus::FastAdv);
        // BLE state does not survive Off mode.
        assert_eq!(power.requests.borrow()[0], (PowerMode::Off, false));
    }

    #[test]
    fn stack_init_rejection_is_fatal() {
        let fake = FakeMailbox::new();
        let notifier = FakeNotifier::default();
        let power = FakePower::default();
        let link = BleLink::new(&fake, &notifier, &power, LinkConfig::default());

        fake.stack_init_status.set(0x42);
        let result = run_with_responder(&link, &fake, link.init());
        assert_eq!(result, Err(InitError::Coprocessor(0x42)));
        // Nothing past the failed stack start.
        assert_eq!(fake.posted.borrow().len(), 1);
    }

    #[test]
    fn first_pairing_forces_disconnect_after_settle_delay() {
        let fake = FakeMailbox::new();
        let notifier = FakeNotifier::default();
        let power = FakePower::default();
        let config = LinkConfig::default().settle_delay(Duration::from_millis(10));
        let link = BleLink::new(&fake, &notifier, &power, config);

        run_with_responder(&link, &fake, async {
            connect(&link).await; // not previously bonded
            let before = Instant::now();
            link.handle_event(BleEvent::PairingComplete {
                handle: HANDLE,
                status: PairingStatus::Success,
            })
            .await;
            assert!(Instant::now() - before >= Duration::from_millis(10));
        });

        assert!(posted_contains(
            &fake,
            &BleCommand::Terminate {
                handle: HANDLE,
                reason: DisconnectReason::REMOTE_USER_TERMINATED,
            }
        ));
        assert_eq!(
            *notifier.events.borrow(),
            vec![AppEvent::Connected, AppEvent::Disconnecting]
        );
    }

    #[test]
    fn repeat_pairing_with_bonded_peer_keeps_the_link() {
        let fake = FakeMailbox::new();
        let notifier = FakeNotifier::default();
        let power = FakePower::default();
        let link = BleLink::new(&fake, &notifier, &power, LinkConfig::default());

        fake.bonded.set(true);
        run_with_responder(&link, &fake, async {
            connect(&link).await;
            link.handle_event(BleEvent::PairingComplete {
                handle: HANDLE,
                status: PairingStatus::Success,
            })
            .await;
        });

        assert!(!fake
            .posted
            .borrow()
            .iter()
            .any(|c| matches!(c, BleCommand::Terminate { .. })));
        assert_eq!(link.status(), ConnStatus::ConnectedServer);
    }

    #[test]
    fn mic_failure_purges_security_database() {
        let fake = FakeMailbox::new();
        let notifier = FakeNotifier::default();
        let power = FakePower::default();
        let link = BleLink::new(&fake, &notifier, &power, LinkConfig::default());

        run_with_responder(&link, &fake, async {
            connect(&link).await;
            link.handle_event(BleEvent::DisconnectionComplete {
                handle: HANDLE,
                reason: DisconnectReason::MIC_FAILURE,
            })
            .await;
        });

        assert!(posted_contains(
            &fake,
            &BleCommand::RemoveBondedDevice { peer: PEER }
        ));
        assert!(posted_contains(&fake, &BleCommand::ClearSecurityDb));
        assert_eq!(link.status(), ConnStatus::FastAdv);
    }

    #[test]
    fn disconnect_always_restarts_fast_advertising() {
        let fake = FakeMailbox::new();
        let notifier = FakeNotifier::default();
        let power = FakePower::default();
        let link = BleLink::new(&fake, &notifier, &power, LinkConfig::default());

        run_with_responder(&link, &fake, async {
            connect(&link).await;
            link.handle_event(BleEvent::DisconnectionComplete {
                handle: HANDLE,
                reason: DisconnectReason::REMOTE_USER_TERMINATED,
            })
            .await;
        });

        assert!(!posted_contains(&fake, &BleCommand::ClearSecurityDb));
        // Exactly one restart for one disconnection.
        let adv_starts = fake
            .posted
            .borrow()
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    BleCommand::SetDiscoverable {
                        interval_min: 0x80,
                        interval_max: 0xA0,
                    }
                )
            })
            .count();
        assert_eq!(adv_starts, 1);
        assert_eq!(link.status(), ConnStatus::FastAdv);
        assert_eq!(link.session().handle, None);
        assert_eq!(
            *notifier.events.borrow(),
            vec![AppEvent::Connected, AppEvent::Disconnected]
        );
    }

    #[test]
    fn forced_disconnect_is_not_repeated_on_second_pairing_event() {
        let fake = FakeMailbox::new();
        let notifier = FakeNotifier::default();
        let power = FakePower::default();
        let config = LinkConfig::default().settle_delay(Duration::from_millis(1));
        let link = BleLink::new(&fake, &notifier, &power, config);

        run_with_responder(&link, &fake, async {
            connect(&link).await; // not previously bonded
            // The controller reports the bond once the first pairing lands.
            fake.bonded.set(true);
            link.handle_event(BleEvent::PairingComplete {
                handle: HANDLE,
                status: PairingStatus::Success,
            })
            .await;
            link.handle_event(BleEvent::PairingComplete {
                handle: HANDLE,
                status: PairingStatus::Success,
            })
            .await;
        });

        let terminates = fake
            .posted
            .borrow()
            .iter()
            .filter(|c| matches!(c, BleCommand::Terminate { .. }))
            .count();
        assert_eq!(terminates, 1);
        assert!(link.session().peer_bonded);
    }

    #[test]
    fn disconnect_for_other_handle_still_restarts_advertising() {
        let fake = FakeMailbox::new();
        let notifier = FakeNotifier::default();
        let power = FakePower::default();
        let link = BleLink::new(&fake, &notifier, &power, LinkConfig::default());

        run_with_responder(&link, &fake, async {
            connect(&link).await;
            link.handle_event(BleEvent::DisconnectionComplete {
                handle: ConnHandle(0x0999),
                reason: DisconnectReason::REMOTE_USER_TERMINATED,
            })
            .await;
        });

        // The session is untouched but advertising restarts regardless.
        assert_eq!(link.session().handle, Some(HANDLE));
        assert!(posted_contains(
            &fake,
            &BleCommand::SetDiscoverable {
                interval_min: 0x80,
                interval_max: 0xA0,
            }
        ));
        assert!(!notifier.events.borrow().contains(&AppEvent::Disconnected));
    }

    #[test]
    fn security_request_wait_is_released_by_pairing_event() {
        let fake = FakeMailbox::new();
        let notifier = FakeNotifier::default();
        let power = FakePower::default();
        let link = BleLink::new(&fake, &notifier, &power, LinkConfig::default());

        fake.bonded.set(true);
        let result = run_with_responder(&link, &fake, async {
            connect(&link).await;
            let proc = link.run_procedure(GapProc::SecurityRequest);
            let feed = async {
                Timer::after(Duration::from_millis(5)).await;
                link.handle_event(BleEvent::PairingComplete {
                    handle: HANDLE,
                    status: PairingStatus::Success,
                })
                .await;
            };
            join(proc, feed).await.0
        });

        assert_eq!(result, Ok(BleStatus::SUCCESS));
        assert!(posted_contains(
            &fake,
            &BleCommand::SlaveSecurityRequest { handle: HANDLE }
        ));
        assert!(!link.session().security_request_in_flight);
    }

    #[test]
    fn security_request_is_skipped_on_secured_bonded_link() {
        let fake = FakeMailbox::new();
        let notifier = FakeNotifier::default();
        let power = FakePower::default();
        let link = BleLink::new(&fake, &notifier, &power, LinkConfig::default());

        fake.bonded.set(true);
        fake.security.set((1, 2)); // already past mode 1 level 1
        let result = run_with_responder(&link, &fake, async {
            connect(&link).await;
            link.slave_security_request().await
        });

        assert_eq!(result, Ok(BleStatus::SUCCESS));
        assert!(!fake
            .posted
            .borrow()
            .iter()
            .any(|c| matches!(c, BleCommand::SlaveSecurityRequest { .. })));
    }

    #[test]
    fn fast_advertising_downgrades_after_initial_window() {
        let fake = FakeMailbox::new();
        let notifier = FakeNotifier::default();
        let power = FakePower::default();
        let config = LinkConfig::default().initial_adv_timeout(Duration::from_millis(20));
        let link = BleLink::new(&fake, &notifier, &power, config);

        run_with_responder(&link, &fake, link.advertise(AdvKind::Fast)).unwrap();
        assert_eq!(link.status(), ConnStatus::FastAdv);

        let result = block_on(select3(
            link.run(),
            respond_forever(&link, &fake),
            Timer::after(Duration::from_millis(60)),
        ));
        assert!(matches!(result, Either3::Third(())));

        assert_eq!(link.status(), ConnStatus::LowPowerAdv);
        assert!(posted_contains(&fake, &BleCommand::SetNonDiscoverable));
        assert!(posted_contains(
            &fake,
            &BleCommand::SetDiscoverable {
                interval_min: 0x640,
                interval_max: 0xFA0,
            }
        ));
    }

    #[test]
    fn full_event_queue_asks_for_backpressure() {
        let fake = FakeMailbox::new();
        let notifier = FakeNotifier::default();
        let power = FakePower::default();
        let link = BleLink::new(&fake, &notifier, &power, LinkConfig::default());

        for _ in 0..EVENT_QUEUE_DEPTH {
            assert_eq!(
                link.on_event(BleEvent::SlaveSecurityInitiated),
                FlowControl::Enable
            );
        }
        assert_eq!(
            link.on_event(BleEvent::SlaveSecurityInitiated),
            FlowControl::Disable
        );
    }
}
