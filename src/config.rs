//! Link configuration types.
//!
//! Builder-pattern configs in the same shape as the rest of the crate's
//! public surface: every timeout and delay the vendor glue hard-codes is a
//! field here, with the vendor value as default.

use embassy_time::Duration;

/// Pairing/bonding parameters applied during GAP bring-up.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SecurityConfig {
    /// GAP IO capability code.
    pub(crate) io_capability: u8,
    /// Require man-in-the-middle protection.
    pub(crate) mitm: bool,
    /// Enable bonding (and whitelist configuration).
    pub(crate) bonding: bool,
    /// Answer passkey requests with [`fixed_pin`](Self::fixed_pin) instead of
    /// asking the application.
    pub(crate) use_fixed_pin: bool,
    pub(crate) fixed_pin: u32,
    pub(crate) key_size_min: u8,
    pub(crate) key_size_max: u8,
}

impl SecurityConfig {
    pub const fn new() -> Self {
        Self {
            io_capability: 0x01, // display yes/no
            mitm: true,
            bonding: true,
            use_fixed_pin: true,
            fixed_pin: 111111,
            key_size_min: 8,
            key_size_max: 16,
        }
    }

    pub const fn io_capability(mut self, io_capability: u8) -> Self {
        self.io_capability = io_capability;
        self
    }

    pub const fn mitm(mut self, mitm: bool) -> Self {
        self.mitm = mitm;
        self
    }

    pub const fn bonding(mut self, bonding: bool) -> Self {
        self.bonding = bonding;
        self
    }

    pub const fn fixed_pin(mut self, pin: u32) -> Self {
        self.fixed_pin = pin;
        self.use_fixed_pin = true;
        self
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// BLE link configuration.
///
/// # Example
///
/// ```ignore
/// use stm32wb_wpan::LinkConfig;
/// let config = LinkConfig::default().bd_addr([0x12, 0x34, 0x56, 0x78, 0xAB, 0xCD]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    /// Bound on every bridged command/response round trip. `None` blocks
    /// indefinitely, matching the vendor glue (which names a 30 s timeout
    /// but never enforces it).
    pub(crate) request_timeout: Option<Duration>,
    /// Bound on GAP sub-protocol waits (pairing complete, disconnection
    /// complete).
    pub(crate) gap_timeout: Option<Duration>,
    /// Blank window left after a first-ever pairing before the deliberate
    /// disconnect, so the controller can persist bonding data to NVM.
    pub(crate) settle_delay: Duration,
    /// Fast advertising window before downgrading to low-power advertising.
    pub(crate) initial_adv_timeout: Duration,
    /// Fast advertising interval (min, max) in 0.625 ms units.
    pub(crate) fast_adv_interval: (u16, u16),
    /// Low-power advertising interval (min, max) in 0.625 ms units.
    pub(crate) lp_adv_interval: (u16, u16),
    /// GAP role bitmask, see [`crate::ble::types::gap_role`].
    pub(crate) role: u8,
    /// Transmit power level code handed to the controller.
    pub(crate) tx_power_level: u8,
    pub(crate) bd_addr: [u8; 6],
    pub(crate) static_random_addr: [u8; 6],
    /// Identity root key used to derive LTK and CSRK.
    pub(crate) identity_root: [u8; 16],
    /// Encryption root key used to derive LTK and CSRK.
    pub(crate) encryption_root: [u8; 16],
    pub(crate) security: SecurityConfig,
}

impl LinkConfig {
    pub const fn new() -> Self {
        Self {
            request_timeout: Some(Duration::from_millis(30_000)),
            gap_timeout: Some(Duration::from_millis(30_000)),
            settle_delay: Duration::from_millis(1_000),
            initial_adv_timeout: Duration::from_secs(60),
            fast_adv_interval: (0x80, 0xA0),
            lp_adv_interval: (0x640, 0xFA0),
            role: crate::ble::types::gap_role::PERIPHERAL,
            tx_power_level: 0x19, // 0 dBm
            bd_addr: [0; 6],
            static_random_addr: [0; 6],
            identity_root: [0; 16],
            encryption_root: [0; 16],
            security: SecurityConfig::new(),
        }
    }

    pub const fn bd_addr(mut self, addr: [u8; 6]) -> Self {
        self.bd_addr = addr;
        self
    }

    pub const fn static_random_addr(mut self, addr: [u8; 6]) -> Self {
        self.static_random_addr = addr;
        self
    }

    pub const fn root_keys(mut self, identity: [u8; 16], encryption: [u8; 16]) -> Self {
        self.identity_root = identity;
        self.encryption_root = encryption;
        self
    }

    pub const fn security(mut self, security: SecurityConfig) -> Self {
        self.security = security;
        self
    }

    /// Bound every command round trip; `None` restores the vendor behavior
    /// of blocking indefinitely.
    pub const fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub const fn gap_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.gap_timeout = timeout;
        self
    }

    pub const fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub const fn initial_adv_timeout(mut self, timeout: Duration) -> Self {
        self.initial_adv_timeout = timeout;
        self
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Default Home Automation preconfigured link key ("ZigBeeAlliance09").
pub const HA_LINK_KEY: [u8; 16] = *b"ZigBeeAlliance09";

/// Zigbee network startup parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StartupConfig {
    /// Channel pages bitmask (2.4 GHz channels 11..=26).
    pub channel_mask: u32,
    pub preconfigured_link_key: [u8; 16],
    /// MAC association capability bits; 0 is a sleepy end device.
    pub capability: u8,
    /// End-device poll timeout code (vendor units, 1 = 30 s).
    pub end_device_timeout: u8,
}

impl StartupConfig {
    pub const fn new() -> Self {
        Self {
            channel_mask: (1 << 16) | (1 << 21) | (1 << 24),
            preconfigured_link_key: HA_LINK_KEY,
            capability: 0,
            end_device_timeout: 1,
        }
    }

    pub const fn channel_mask(mut self, mask: u32) -> Self {
        self.channel_mask = mask;
        self
    }

    pub const fn preconfigured_link_key(mut self, key: [u8; 16]) -> Self {
        self.preconfigured_link_key = key;
        self
    }

    pub const fn capability(mut self, capability: u8) -> Self {
        self.capability = capability;
        self
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Zigbee join/rejoin configuration.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ZigbeeConfig {
    pub(crate) startup: StartupConfig,
    /// Delay between failed initial join attempts.
    pub(crate) join_retry_delay: Duration,
    /// Delay between a reported parent link failure and the first rejoin
    /// attempt.
    pub(crate) rejoin_delay: Duration,
    /// Delay between failed rejoin attempts.
    pub(crate) rejoin_retry_delay: Duration,
    /// Bound on the startup/rejoin confirm wait; `None` trusts the stack to
    /// always confirm.
    pub(crate) startup_timeout: Option<Duration>,
    /// APS scan count written before each attempt.
    pub(crate) scan_count: u8,
    /// BDB scan duration written before each attempt.
    pub(crate) scan_duration: u8,
    /// Interface transmit power in dBm.
    pub(crate) tx_power_dbm: i8,
    /// Fast poll period written after each startup attempt.
    pub(crate) fast_poll_period: u16,
    /// Broadcast delivery timeout written once joined.
    pub(crate) broadcast_delivery_time: u32,
}

impl ZigbeeConfig {
    pub const fn new() -> Self {
        Self {
            startup: StartupConfig::new(),
            join_retry_delay: Duration::from_millis(113),
            rejoin_delay: Duration::from_secs(20),
            rejoin_retry_delay: Duration::from_secs(4),
            startup_timeout: None,
            scan_count: 1,
            scan_duration: 3,
            tx_power_dbm: -20,
            fast_poll_period: 550,
            broadcast_delivery_time: 3,
        }
    }

    pub const fn startup(mut self, startup: StartupConfig) -> Self {
        self.startup = startup;
        self
    }

    pub const fn join_retry_delay(mut self, delay: Duration) -> Self {
        self.join_retry_delay = delay;
        self
    }

    pub const fn rejoin_delay(mut self, delay: Duration) -> Self {
        self.rejoin_delay = delay;
        self
    }

    pub const fn rejoin_retry_delay(mut self, delay: Duration) -> Self {
        self.rejoin_retry_delay = delay;
        self
    }

    pub const fn tx_power_dbm(mut self, dbm: i8) -> Self {
        self.tx_power_dbm = dbm;
        self
    }
}

impl Default for ZigbeeConfig {
    fn default() -> Self {
        Self::new()
    }
}
