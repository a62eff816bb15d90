//! BLE GAP wire types and status codes.

/// GAP role bitmask values.
pub mod gap_role {
    pub const PERIPHERAL: u8 = 0x01;
    pub const BROADCASTER: u8 = 0x02;
    pub const CENTRAL: u8 = 0x04;
    pub const OBSERVER: u8 = 0x08;
}

/// Connection handle assigned by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnHandle(pub u16);

/// Peer device address with its type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress {
    /// 0 = public, 1 = static random.
    pub kind: u8,
    pub addr: [u8; 6],
}

/// Controller status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BleStatus(pub u8);

impl BleStatus {
    pub const SUCCESS: Self = Self(0x00);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

/// HCI disconnection reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DisconnectReason(pub u8);

impl DisconnectReason {
    /// Remote user terminated the connection.
    pub const REMOTE_USER_TERMINATED: Self = Self(0x13);
    /// Local host terminated the connection.
    pub const LOCAL_HOST_TERMINATED: Self = Self(0x16);
    /// Connection terminated due to MIC failure: the peer's keys no longer
    /// match ours.
    pub const MIC_FAILURE: Self = Self(0x3D);

    pub fn is_mic_failure(self) -> bool {
        self == Self::MIC_FAILURE
    }
}

/// Outcome reported by the pairing-complete event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PairingStatus {
    Success,
    Timeout,
    Failed,
}

/// Link state as tracked by the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnStatus {
    Idle,
    FastAdv,
    LowPowerAdv,
    Connecting,
    ConnectedServer,
    ConnectedClient,
}

/// Session state snapshot, mutated only by the event consumer.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionState {
    pub status: ConnStatus,
    pub handle: Option<ConnHandle>,
    pub peer: Option<PeerAddress>,
    /// Whether the current peer was already bonded when it connected.
    pub peer_bonded: bool,
    pub security_mode: u8,
    pub security_level: u8,
    /// Set while a locally initiated security request is pending, so the
    /// pairing-complete event knows whether a caller is gated on it.
    pub(crate) security_request_in_flight: bool,
}

impl SessionState {
    pub(crate) const fn new() -> Self {
        Self {
            status: ConnStatus::Idle,
            handle: None,
            peer: None,
            peer_bonded: false,
            security_mode: 0,
            security_level: 0,
            security_request_in_flight: false,
        }
    }
}

/// Decoded GAP/GATT events delivered by the receive interrupt.
///
/// The transport layer decodes the vendor event buffers into these before
/// enqueueing; the buffers themselves never cross into the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleEvent {
    ConnectionComplete {
        handle: ConnHandle,
        peer: PeerAddress,
    },
    DisconnectionComplete {
        handle: ConnHandle,
        reason: DisconnectReason,
    },
    PairingComplete {
        handle: ConnHandle,
        status: PairingStatus,
    },
    PasskeyRequest {
        handle: ConnHandle,
    },
    NumericComparisonRequest {
        handle: ConnHandle,
        value: u32,
    },
    /// The peer holds keys we no longer recognize; it must delete its bond
    /// and pair again.
    BondLost {
        handle: ConnHandle,
    },
    /// The controller acknowledged our slave security request.
    SlaveSecurityInitiated,
    /// A non-waited GAP procedure finished.
    GapProcComplete {
        status: BleStatus,
    },
}

/// GAP procedures run through the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GapProc {
    /// Terminate the connection and wait for the disconnection-complete event.
    Terminate(DisconnectReason),
    /// Ask the central to initiate pairing, then wait for pairing-complete.
    SecurityRequest,
    /// Re-grant pairing permission after a bond-lost indication.
    AllowRebond,
    /// Reply to a passkey request with the configured fixed PIN.
    PasskeyResponse,
    /// Confirm a numeric comparison value.
    NumericComparisonConfirm,
}

/// Commands posted to the BLE channel of the mailbox.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleCommand {
    /// Start the BLE stack on the coprocessor.
    StackInit,
    Reset,
    WriteConfig(ConfigValue),
    SetTxPowerLevel(u8),
    GattInit,
    GapInit {
        role: u8,
    },
    SetIoCapability(u8),
    SetAuthenticationRequirement {
        mitm: bool,
        bonding: bool,
        use_fixed_pin: bool,
        fixed_pin: u32,
        key_size_min: u8,
        key_size_max: u8,
    },
    ConfigureWhitelist,
    SetDiscoverable {
        interval_min: u16,
        interval_max: u16,
    },
    SetNonDiscoverable,
    Terminate {
        handle: ConnHandle,
        reason: DisconnectReason,
    },
    SlaveSecurityRequest {
        handle: ConnHandle,
    },
    PasskeyResponse {
        handle: ConnHandle,
        pin: u32,
    },
    NumericComparisonConfirm {
        handle: ConnHandle,
        confirm: bool,
    },
    AllowRebond {
        handle: ConnHandle,
    },
    IsDeviceBonded {
        peer: PeerAddress,
    },
    RemoveBondedDevice {
        peer: PeerAddress,
    },
    GetSecurityLevel {
        handle: ConnHandle,
    },
    ClearSecurityDb,
}

/// Controller configuration writes issued during bring-up.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigValue {
    PublicAddress([u8; 6]),
    StaticRandomAddress([u8; 6]),
    IdentityRoot([u8; 16]),
    EncryptionRoot([u8; 16]),
}

/// Typed command responses released by the receive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reply {
    Status(BleStatus),
    SecurityLevel { mode: u8, level: u8 },
}

impl Reply {
    /// Collapse to the status code; a structured reply counts as success.
    pub(crate) fn status(self) -> BleStatus {
        match self {
            Reply::Status(s) => s,
            Reply::SecurityLevel { .. } => BleStatus::SUCCESS,
        }
    }
}

/// Advertising regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvKind {
    /// Short-interval advertising for quick discovery after boot or
    /// disconnect.
    Fast,
    /// Long-interval advertising for steady-state power saving.
    LowPower,
}
