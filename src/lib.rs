#![cfg_attr(not(test), no_std)]
#![doc = "Application-layer glue for the STM32WB dual-core wireless coprocessor."]
#![doc = ""]
#![doc = "The application core (CM4) talks to the closed wireless firmware on the"]
#![doc = "coprocessor (CM0+) through a shared-memory mailbox. This crate turns that"]
#![doc = "interrupt-driven command/event stream into blocking calls usable from"]
#![doc = "ordinary task code: BLE GAP session management and Zigbee network"]
#![doc = "join/rejoin, both built on a single-slot pending-reply gate."]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod ble;
pub mod channel;
pub mod config;
pub mod gate;
pub mod transport;
pub mod zigbee;

pub use ble::{BleLink, ProcError};
pub use channel::{CommandChannel, RequestError};
pub use config::{LinkConfig, SecurityConfig, StartupConfig, ZigbeeConfig};
pub use gate::{GateBusy, PendingReply, ReplyGate, WaitTimeout};
pub use transport::{
    AppEvent, FlowControl, InitError, Mailbox, Notifier, PowerControl, PowerMode, StackType,
    SubmitError, WirelessFwInfo,
};
pub use zigbee::{JoinError, ZigbeeLink};
