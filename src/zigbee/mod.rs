//! Zigbee network join/rejoin over the coprocessor mailbox.
//!
//! [`ZigbeeLink`] drives a sleepy end device's network membership: the
//! initial join loop, the parent-link-failure watcher and the delayed rejoin
//! loop. Startup attempts are blocking calls bridged over the mailbox the
//! same way GAP procedures are on the BLE side: the command's status comes
//! back through the command channel, the asynchronous startup confirm through
//! a dedicated [`ReplyGate`].
//!
//! [`ZigbeeLink::handle_notification`] is the notification filter. It is
//! synchronous and safe to call from the receive path; everything that needs
//! to wait (the rejoin itself) runs in [`ZigbeeLink::run_network`] and is
//! triggered through a signal.

pub mod types;

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::Timer;

use crate::channel::{CommandChannel, RequestError};
use crate::config::ZigbeeConfig;
use crate::gate::ReplyGate;
use crate::transport::{
    AppEvent, InitError, Mailbox, Notifier, PowerControl, PowerMode, StackType, WirelessFwInfo,
};

use types::{
    ApsAttr, BdbAttr, FilterAction, JoinState, NwkAttr, NwkStatusCode, StackDispatch, ZbCommand,
    ZbStatus, ZigbeeEvent,
};

/// Failure of a blocking startup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum JoinError {
    /// A previous startup attempt is still outstanding.
    Busy,
    /// The startup confirm did not arrive within the configured timeout.
    Timeout,
    /// The underlying command round trip failed.
    Request(RequestError),
}

impl From<RequestError> for JoinError {
    fn from(e: RequestError) -> Self {
        Self::Request(e)
    }
}

/// Zigbee network layer for one mailbox.
pub struct ZigbeeLink<'d, M: Mailbox<Command = ZbCommand>> {
    config: ZigbeeConfig,
    cmd: CommandChannel<'d, M, ZbStatus>,
    startup_gate: ReplyGate<ZbStatus>,
    state: Mutex<CriticalSectionRawMutex, Cell<JoinState>>,
    rejoin: Signal<CriticalSectionRawMutex, ()>,
    notifier: &'d dyn Notifier,
    power: &'d dyn PowerControl,
    dispatch: &'d dyn StackDispatch,
}

impl<'d, M: Mailbox<Command = ZbCommand>> ZigbeeLink<'d, M> {
    pub fn new(
        mailbox: &'d M,
        notifier: &'d dyn Notifier,
        power: &'d dyn PowerControl,
        dispatch: &'d dyn StackDispatch,
        config: ZigbeeConfig,
    ) -> Self {
        Self {
            cmd: CommandChannel::new(mailbox, config.startup_timeout),
            startup_gate: ReplyGate::new(),
            state: Mutex::new(Cell::new(JoinState::Uninitialized)),
            rejoin: Signal::new(),
            notifier,
            power,
            dispatch,
            config,
        }
    }

    pub fn state(&self) -> JoinState {
        self.state.lock(|s| s.get())
    }

    fn set_state(&self, state: JoinState) {
        self.state.lock(|s| s.set(state));
    }

    /// Verify the coprocessor runs a Zigbee-capable firmware image.
    pub fn check_firmware(&self, info: WirelessFwInfo) -> Result<(), InitError> {
        match info.stack_type {
            StackType::ZigbeeFfd | StackType::ZigbeeRfd => {
                info!(
                    "zigbee firmware {}.{}.{}",
                    info.version_major, info.version_minor, info.version_sub
                );
                Ok(())
            }
            other => Err(InitError::UnsupportedStack(other)),
        }
    }

    /// One blocking startup attempt: write the scan parameters, start the
    /// stack and wait for the asynchronous confirm.
    ///
    /// A stack-reported failure comes back as `Ok(status)`; errors are
    /// transport-level problems.
    pub async fn startup(&self) -> Result<ZbStatus, JoinError> {
        self.attempt(false).await
    }

    async fn attempt(&self, rejoin: bool) -> Result<ZbStatus, JoinError> {
        self.write_config(ZbCommand::BdbSet(BdbAttr::IgnoreNwkCost(true)))
            .await?;
        self.write_config(ZbCommand::BdbSet(BdbAttr::ScanDuration(
            self.config.scan_duration,
        )))
        .await?;
        self.write_config(ZbCommand::ApsSet(ApsAttr::ScanCount(self.config.scan_count)))
            .await?;
        self.write_config(ZbCommand::SetTxPower(self.config.tx_power_dbm))
            .await?;

        // Claim the confirm slot before the command goes out; the stack can
        // answer before this task reaches its suspension point.
        let pending = self.startup_gate.begin().map_err(|_| JoinError::Busy)?;
        let command = if rejoin {
            ZbCommand::Rejoin
        } else {
            ZbCommand::Startup(self.config.startup)
        };
        let status = self.cmd.request(command).await?;
        if !status.is_success() {
            // Rejected synchronously: no confirm will follow.
            return Ok(status);
        }
        let status = match self.config.startup_timeout {
            Some(timeout) => pending
                .wait_timeout(timeout)
                .await
                .map_err(|_| JoinError::Timeout)?,
            None => pending.wait().await,
        };

        if status.is_success() {
            self.write_config(ZbCommand::NwkSet(NwkAttr::FastPollPeriod(
                self.config.fast_poll_period,
            )))
            .await?;
        }
        Ok(status)
    }

    async fn write_config(&self, cmd: ZbCommand) -> Result<(), RequestError> {
        let status = self.cmd.request(cmd).await?;
        if !status.is_success() {
            warn!("config write {:?} failed with status {:?}", cmd, status);
        }
        Ok(())
    }

    /// Join the network, then keep it joined. Run this as its own task.
    ///
    /// Retries the initial join until it succeeds, then sleeps until the
    /// notification filter reports a parent link failure, backs off and runs
    /// the rejoin loop.
    pub async fn run_network(&self) -> ! {
        self.set_state(JoinState::AwaitingJoin);
        loop {
            match self.attempt(false).await {
                Ok(status) if status.is_success() => break,
                Ok(status) => warn!("network join failed with status {:?}", status),
                Err(e) => warn!("network join attempt failed: {:?}", e),
            }
            Timer::after(self.config.join_retry_delay).await;
        }
        self.on_joined().await;

        loop {
            self.rejoin.wait().await;
            // Give the neighborhood time to recover before scanning; an
            // immediate rejoin against a rebooting parent just burns power.
            Timer::after(self.config.rejoin_delay).await;
            loop {
                match self.attempt(true).await {
                    Ok(status) if status.is_success() => break,
                    Ok(status) => warn!("rejoin failed with status {:?}", status),
                    Err(e) => warn!("rejoin attempt failed: {:?}", e),
                }
                Timer::after(self.config.rejoin_retry_delay).await;
            }
            self.on_joined().await;
        }
    }

    async fn on_joined(&self) {
        info!("network joined");
        self.set_state(JoinState::Joined);
        // Stop mode keeps the network context alive, Off would lose it.
        self.power.request(PowerMode::Stop, true);
        self.power.request(PowerMode::Off, false);
        if let Err(e) = self
            .write_config(ZbCommand::NwkSet(NwkAttr::BroadcastDeliveryTime(
                self.config.broadcast_delivery_time,
            )))
            .await
        {
            warn!("broadcast delivery time write failed: {:?}", e);
        }
        self.notifier.notify(AppEvent::NetworkJoined, None);
    }

    /// Interrupt-context delivery of a command status.
    pub fn on_command_response(&self, status: ZbStatus) -> bool {
        self.cmd.on_response(status)
    }

    /// Filter one coprocessor notification. Safe to call from the receive
    /// path; never blocks.
    ///
    /// A parent link failure is consumed here: the triggering record is
    /// discarded, the session drops to [`JoinState::AwaitingRejoin`] and the
    /// rejoin loop is woken. Everything the glue does not consume goes to the
    /// registered [`StackDispatch`].
    pub fn handle_notification(&self, event: ZigbeeEvent) -> FilterAction {
        match event {
            ZigbeeEvent::StartupConfirm { status } => {
                if !self.startup_gate.release(status) {
                    warn!("unsolicited startup confirm {:?} dropped", status);
                }
                FilterAction::Discard
            }
            ZigbeeEvent::NetworkStatus { status } => {
                if status == NwkStatusCode::PARENT_LINK_FAILURE
                    && self.state() == JoinState::Joined
                {
                    warn!("parent link failure, scheduling rejoin");
                    self.set_state(JoinState::AwaitingRejoin);
                    self.notifier.notify(AppEvent::NetworkLost, None);
                    self.rejoin.signal(());
                    FilterAction::Discard
                } else {
                    FilterAction::Continue
                }
            }
            ZigbeeEvent::StackNotification { .. } | ZigbeeEvent::StackRequest { .. } => {
                self.dispatch.dispatch(event)
            }
        }
    }
}
