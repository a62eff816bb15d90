//! Collaborator interfaces: the mailbox transport, the application
//! notification sink, and low-power mode requests.
//!
//! The mailbox buffers are owned by the transport layer and are only valid
//! for the duration of a delivery callback; anything the glue needs to keep
//! must be copied out into the typed event enums before returning.

use crate::ble::types::ConnHandle;

/// Outbound command path to the coprocessor.
///
/// `post` queues a command for delivery; the matching response or completion
/// event arrives later through the interrupt-driven receive path. A `post`
/// error is a synchronous, local failure — nothing was sent and no reply will
/// follow.
pub trait Mailbox {
    type Command;

    fn post(&self, cmd: &Self::Command) -> Result<(), SubmitError>;
}

/// Synchronous command submission failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubmitError {
    /// The transport queue has no room for the command.
    QueueFull,
    /// The transport rejected the command with a vendor status code.
    Rejected(u8),
}

/// Backpressure signal returned to the transport after event delivery.
///
/// `Disable` tells the transport to pace delivery: the record was not
/// consumed and must be offered again once the consumer has drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlowControl {
    Enable,
    Disable,
}

/// Categorized events handed to the application outside this crate
/// (device-specific behavior, UI feedback).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AppEvent {
    Connected,
    Disconnected,
    /// A deliberate disconnect is in progress (bonding persistence quirk).
    Disconnecting,
    NetworkJoined,
    NetworkLost,
}

/// Asynchronous notification sink registered by the application.
pub trait Notifier {
    fn notify(&self, event: AppEvent, handle: Option<ConnHandle>);
}

/// Low-power modes the glue gates on behalf of the stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerMode {
    /// Stop mode (wake on radio activity).
    Stop,
    /// Off/standby mode (loses wireless state).
    Off,
}

/// Platform low-power manager.
pub trait PowerControl {
    fn request(&self, mode: PowerMode, enable: bool);
}

/// Wireless coprocessor firmware identification, read over the system channel
/// at bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WirelessFwInfo {
    pub version_major: u8,
    pub version_minor: u8,
    pub version_sub: u8,
    pub stack_type: StackType,
}

/// Stack flavor reported by the coprocessor firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StackType {
    BleFull,
    ZigbeeFfd,
    ZigbeeRfd,
    Other(u8),
}

/// Unrecoverable bring-up failure.
///
/// Everything here is fatal to the subsystem and surfaced to the caller;
/// procedure-level failures during operation are handled locally instead
/// (retry, re-advertise, state update).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitError {
    /// The coprocessor rejected stack initialization. Usually means the
    /// wireless firmware is absent or incompatible.
    Coprocessor(u8),
    /// The loaded coprocessor firmware does not support the requested stack.
    UnsupportedStack(StackType),
    /// A bring-up command failed at the transport level.
    Request(crate::channel::RequestError),
}

impl From<crate::channel::RequestError> for InitError {
    fn from(e: crate::channel::RequestError) -> Self {
        Self::Request(e)
    }
}
