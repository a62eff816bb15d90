//! Zigbee stack wire types and status codes.

use crate::config::StartupConfig;

/// Status code reported by the Zigbee stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ZbStatus(pub u8);

impl ZbStatus {
    pub const SUCCESS: Self = Self(0x00);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

/// NLME network status indication code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NwkStatusCode(pub u8);

impl NwkStatusCode {
    /// The end device has lost contact with its parent router.
    pub const PARENT_LINK_FAILURE: Self = Self(0x14);
}

/// Network membership as tracked by the join state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum JoinState {
    Uninitialized,
    AwaitingJoin,
    Joined,
    AwaitingRejoin,
}

/// BDB information-base writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BdbAttr {
    ScanDuration(u8),
    /// Accept any parent during the scan instead of filtering on link cost.
    IgnoreNwkCost(bool),
}

/// APS information-base writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ApsAttr {
    ScanCount(u8),
}

/// NWK information-base writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NwkAttr {
    FastPollPeriod(u16),
    BroadcastDeliveryTime(u32),
}

/// Commands posted to the Zigbee channel of the mailbox.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ZbCommand {
    /// Form-or-join startup with the given parameters.
    Startup(StartupConfig),
    /// NWK rejoin using the persisted network context.
    Rejoin,
    BdbSet(BdbAttr),
    ApsSet(ApsAttr),
    NwkSet(NwkAttr),
    SetTxPower(i8),
}

/// Decoded coprocessor-to-application notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ZigbeeEvent {
    /// Asynchronous confirm for a startup or rejoin attempt.
    StartupConfirm { status: ZbStatus },
    /// NLME network status indication.
    NetworkStatus { status: NwkStatusCode },
    /// Stack notification destined for the message dispatcher.
    StackNotification { id: u8 },
    /// Stack request destined for the message dispatcher.
    StackRequest { id: u8 },
}

/// Verdict on one coprocessor notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterAction {
    /// Hand the record on to the stack's normal processing.
    Continue,
    /// The record was consumed (or must be suppressed); the stack must not
    /// process it.
    Discard,
}

/// Application-side handler for stack messages the glue does not consume.
pub trait StackDispatch {
    fn dispatch(&self, event: ZigbeeEvent) -> FilterAction;
}
