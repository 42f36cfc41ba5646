use core::fmt;

/// The privilege level requested for the IPMI session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PrivilegeLevel {
    /// Callback privilege.
    Callback = 0x01,
    /// User privilege.
    User = 0x02,
    /// Operator privilege.
    Operator = 0x03,
    /// Administrator privilege.
    Administrator = 0x04,
    /// OEM-defined privilege.
    Oem = 0x05,
}

impl PrivilegeLevel {
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value & 0x0F {
            0x01 => Some(Self::Callback),
            0x02 => Some(Self::User),
            0x03 => Some(Self::Operator),
            0x04 => Some(Self::Administrator),
            0x05 => Some(Self::Oem),
            _ => None,
        }
    }
}

/// IPMI v1.5 session authentication type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthType {
    /// No auth code field in the session header.
    None = 0x00,
    /// MD5 digest over password, session id, message and sequence.
    Md5 = 0x02,
    /// The clear-text password is the auth code ("password key").
    Password = 0x04,
}

impl AuthType {
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value & 0x0F {
            0x00 => Some(Self::None),
            0x02 => Some(Self::Md5),
            0x04 => Some(Self::Password),
            _ => None,
        }
    }

    /// Bit advertised for this type in `Get Channel Authentication Capabilities`.
    pub(crate) fn support_bit(self) -> u8 {
        match self {
            Self::None => 0x01,
            Self::Md5 => 0x04,
            Self::Password => 0x10,
        }
    }

    /// Whether the session header carries a 16-byte auth code.
    pub fn has_auth_code(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Completion codes the engine reacts to.
pub mod completion_code {
    /// Command completed normally.
    pub const OK: u8 = 0x00;
    /// Node busy.
    pub const NODE_BUSY: u8 = 0xC0;
    /// Invalid or unsupported command.
    pub const INVALID_COMMAND: u8 = 0xC1;
    /// Timeout while processing command.
    pub const TIMEOUT: u8 = 0xC3;
    /// Reservation canceled or invalid reservation id.
    pub const RESERVATION_CANCELED: u8 = 0xC5;
    /// Request data truncated.
    pub const DATA_TRUNCATED: u8 = 0xC6;
    /// Request data length invalid.
    pub const DATA_LENGTH_INVALID: u8 = 0xC7;
    /// Request data field length limit exceeded.
    pub const DATA_LENGTH_EXCEEDED: u8 = 0xC8;
    /// Parameter out of range.
    pub const PARAMETER_OUT_OF_RANGE: u8 = 0xC9;
    /// Cannot return number of requested data bytes.
    pub const CANNOT_RETURN_BYTES: u8 = 0xCA;
    /// Requested sensor, data, or record not present.
    pub const NOT_PRESENT: u8 = 0xCB;
    /// Invalid data field in request.
    pub const INVALID_DATA_FIELD: u8 = 0xCC;
    /// Destination unavailable.
    pub const DESTINATION_UNAVAILABLE: u8 = 0xD3;
    /// Insufficient privilege level.
    pub const INSUFFICIENT_PRIVILEGE: u8 = 0xD4;
    /// Unspecified error.
    pub const UNSPECIFIED: u8 = 0xFF;

    /// Human-readable description for log messages.
    pub fn describe(code: u8) -> &'static str {
        match code {
            OK => "ok",
            NODE_BUSY => "node busy",
            INVALID_COMMAND => "invalid command",
            TIMEOUT => "timeout while processing command",
            RESERVATION_CANCELED => "reservation canceled",
            DATA_TRUNCATED => "request data truncated",
            DATA_LENGTH_INVALID => "request data length invalid",
            DATA_LENGTH_EXCEEDED => "request data length exceeded",
            PARAMETER_OUT_OF_RANGE => "parameter out of range",
            CANNOT_RETURN_BYTES => "cannot return requested number of bytes",
            NOT_PRESENT => "requested sensor, data or record not present",
            INVALID_DATA_FIELD => "invalid data field",
            DESTINATION_UNAVAILABLE => "destination unavailable",
            INSUFFICIENT_PRIVILEGE => "insufficient privilege",
            UNSPECIFIED => "unspecified error",
            _ => "unknown completion code",
        }
    }
}

/// A raw IPMI response.
#[derive(Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// IPMI completion code.
    pub completion_code: u8,
    /// Payload bytes after the completion code.
    pub data: Vec<u8>,
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field(
                "completion_code",
                &format_args!("{:#04x}", self.completion_code),
            )
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Parsed response for the `Get Device ID` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId {
    /// Device ID (BMC-defined).
    pub device_id: u8,
    /// Device revision (lower 4 bits are the revision).
    pub device_revision: u8,
    /// Firmware major revision.
    pub firmware_major: u8,
    /// Firmware minor revision.
    pub firmware_minor: u8,
    /// IPMI version as BCD (e.g. 0x51 for 1.5).
    pub ipmi_version: u8,
    /// Additional device support bits (sensor device, SDR repository, FRU inventory, ...).
    pub additional_support: u8,
    /// Manufacturer ID (24-bit, least-significant byte first).
    pub manufacturer_id: u32,
    /// Product ID.
    pub product_id: u16,
}

/// Power restore policy reported by `Get Chassis Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerRestorePolicy {
    /// Always remain off after AC loss.
    AlwaysOff,
    /// Restore previous power state after AC loss.
    Previous,
    /// Always power on after AC loss.
    AlwaysOn,
    /// Reserved or unknown value.
    Unknown(u8),
}

/// Last power event flags reported by `Get Chassis Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastPowerEvent {
    /// AC failed.
    pub ac_failed: bool,
    /// Power overload.
    pub power_overload: bool,
    /// Power interlock activated.
    pub power_interlock: bool,
    /// Power fault.
    pub power_fault: bool,
    /// Power on command issued.
    pub power_on_command: bool,
}

/// Parsed response for the `Get Chassis Status` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChassisStatus {
    /// System power state.
    pub system_power_on: bool,
    /// Power overload state.
    pub power_overload: bool,
    /// Power interlock state.
    pub power_interlock: bool,
    /// Main power fault state.
    pub main_power_fault: bool,
    /// Power control fault state.
    pub power_control_fault: bool,
    /// Power restore policy.
    pub power_restore_policy: PowerRestorePolicy,
    /// Last power event flags.
    pub last_power_event: LastPowerEvent,
    /// Chassis intrusion state.
    pub chassis_intrusion: bool,
    /// Front panel lockout state.
    pub front_panel_lockout: bool,
    /// Drive fault state.
    pub drive_fault: bool,
    /// Cooling/fan fault state.
    pub cooling_fan_fault: bool,
}

/// Chassis control operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChassisControl {
    /// Power down the system.
    PowerDown,
    /// Power up the system.
    PowerUp,
    /// Power cycle the system.
    PowerCycle,
    /// Hard reset the system.
    HardReset,
    /// Pulse diagnostic interrupt.
    PulseDiagnostic,
    /// ACPI soft shutdown.
    AcpiSoft,
}

impl ChassisControl {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::PowerDown => 0x00,
            Self::PowerUp => 0x01,
            Self::PowerCycle => 0x02,
            Self::HardReset => 0x03,
            Self::PulseDiagnostic => 0x04,
            Self::AcpiSoft => 0x05,
        }
    }
}

/// Parsed response for `Get Channel Authentication Capabilities`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAuthCapabilities {
    /// Channel number.
    pub channel_number: u8,
    /// IPMI v1.5 enabled authentication types (bitmask).
    pub enabled_auth_types: u8,
    /// Per-message authentication is disabled when true.
    pub per_message_auth_disabled: bool,
    /// User-level authentication is disabled when true.
    pub user_level_auth_disabled: bool,
    /// One or more non-null user names exist.
    pub non_null_usernames: bool,
    /// One or more null user names with non-null passwords exist.
    pub null_usernames: bool,
    /// Anonymous login (null user/null password) is enabled.
    pub anonymous_login_enabled: bool,
    /// OEM IANA enterprise number for OEM auth types, if present.
    pub oem_id: Option<u32>,
}

impl ChannelAuthCapabilities {
    /// Whether the channel advertises `auth`.
    pub fn supports(&self, auth: AuthType) -> bool {
        self.enabled_auth_types & auth.support_bit() != 0
    }
}

/// Parsed response for `Get Session Challenge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChallenge {
    /// Temporary session id used for `Activate Session`.
    pub temporary_session_id: u32,
    /// 16-byte challenge string to echo back.
    pub challenge: [u8; 16],
}

/// Parsed response for `Activate Session`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivatedSession {
    /// Auth type for the remainder of the session.
    pub auth_type: u8,
    /// Session id for the remainder of the session.
    pub session_id: u32,
    /// Session sequence the controller expects on our next message.
    pub initial_inbound_seq: u32,
    /// Maximum privilege allowed for this session.
    pub max_privilege: u8,
}

/// Parsed response for `Get SDR Repository Info` / `Get Device SDR Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepositoryInfo {
    /// SDR version (BCD), zero for device SDR info.
    pub version: u8,
    /// Number of records in the repository.
    pub record_count: u16,
    /// Most recent addition timestamp.
    pub addition_timestamp: u32,
    /// Most recent erase timestamp.
    pub erase_timestamp: u32,
}

impl RepositoryInfo {
    /// Whether the add/erase timestamps differ from `other`.
    pub fn changed_since(&self, other: &Self) -> bool {
        self.addition_timestamp != other.addition_timestamp
            || self.erase_timestamp != other.erase_timestamp
            || self.record_count != other.record_count
    }
}

/// Parsed response for `Get FRU Inventory Area Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FruAreaInfo {
    /// Inventory area size in bytes.
    pub size: u16,
    /// Device is accessed by words rather than bytes.
    pub word_access: bool,
}

/// Parsed response for `Get Sensor Reading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorReading {
    /// Raw analog reading byte.
    pub raw: u8,
    /// Event messages enabled.
    pub event_messages_enabled: bool,
    /// Sensor scanning enabled.
    pub scanning_enabled: bool,
    /// Reading/state unavailable.
    pub unavailable: bool,
    /// Threshold comparison status (bit 0 = at or below LNC, ... bit 5 = at or above UNR).
    pub threshold_state: u8,
}

/// Parsed response for PICMG `Get Address Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressInfo {
    /// Hardware address.
    pub hardware_address: u8,
    /// IPMB-0 address.
    pub ipmb_address: u8,
    /// FRU device id.
    pub fru_id: u8,
    /// Physical site number.
    pub site_number: u8,
    /// Physical site type.
    pub site_type: u8,
}

/// Parsed response for PICMG `Get Fan Speed Properties`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanProperties {
    /// Minimum speed level.
    pub min_level: u8,
    /// Maximum speed level.
    pub max_level: u8,
    /// Normal operating level.
    pub nominal_level: u8,
    /// Fan tray supports automatic (local) control.
    pub local_control_supported: bool,
}

/// Parsed response for PICMG `Get Fan Level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanLevel {
    /// Level set by the shelf/carrier manager (0xFE = shut down, 0xFF = local control).
    pub override_level: u8,
    /// Level chosen by the fan tray's local control, if reported.
    pub local_level: Option<u8>,
    /// Local control enabled, if reported.
    pub local_control_enabled: Option<bool>,
}

/// Parsed response for PICMG `Get Power Level`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PowerLevel {
    /// FRU supports dynamic power reconfiguration.
    pub dynamic: bool,
    /// Current power level.
    pub level: u8,
    /// Delay to stable power, in tenths of a second.
    pub delay_to_stable: u8,
    /// Power multiplier, in tenths of a watt.
    pub multiplier: u8,
    /// Power draw for each level, in multiplier units.
    pub levels: Vec<u8>,
}

impl PowerLevel {
    /// Power draw at the current level in watts, if the level is listed.
    pub fn current_watts(&self) -> Option<f64> {
        let index = usize::from(self.level).checked_sub(1)?;
        let draw = *self.levels.get(index)?;
        Some(f64::from(draw) * f64::from(self.multiplier) / 10.0)
    }
}
