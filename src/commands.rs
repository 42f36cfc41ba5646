use crate::error::{Error, Result};
use crate::protocol::netfn;
use crate::types::{
    ActivatedSession, AddressInfo, AuthType, ChannelAuthCapabilities, ChassisControl,
    ChassisStatus, DeviceId, FanLevel, FanProperties, FruAreaInfo, LastPowerEvent, PowerLevel,
    PowerRestorePolicy, PrivilegeLevel, RawResponse, RepositoryInfo, SensorReading,
    SessionChallenge,
};

/// A typed IPMI command (single request/response).
pub trait Command {
    /// Parsed output type.
    type Output;

    /// Network Function (NetFn) for the request.
    const NETFN: u8;

    /// Command number.
    const CMD: u8;

    /// Encode request payload bytes (excluding NetFn/Cmd framing).
    fn request_data(&self) -> Vec<u8>;

    /// Number of payload bytes a successful reply must carry, `None` if unknown.
    fn expected_len(&self) -> Option<usize> {
        None
    }

    /// Parse a raw response into the typed output.
    fn parse_response(&self, response: RawResponse) -> Result<Self::Output>;
}

fn ok_data(response: &RawResponse) -> Result<&[u8]> {
    if response.completion_code != 0x00 {
        return Err(Error::CompletionCode {
            completion_code: response.completion_code,
        });
    }
    Ok(&response.data)
}

/// Check and strip the PICMG identifier byte leading every PICMG reply.
fn picmg_data(response: &RawResponse) -> Result<&[u8]> {
    let data = ok_data(response)?;
    match data.split_first() {
        Some((&PICMG_ID, rest)) => Ok(rest),
        Some(_) => Err(Error::Decode("PICMG identifier mismatch")),
        None => Err(Error::Decode("PICMG reply too short")),
    }
}

/// PICMG identifier carried in the first data byte of every PICMG command.
pub const PICMG_ID: u8 = 0x00;

/// `Get Device ID` (App NetFn, cmd 0x01).
#[derive(Debug, Clone, Copy)]
pub struct GetDeviceId;

impl Command for GetDeviceId {
    type Output = DeviceId;
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x01;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn expected_len(&self) -> Option<usize> {
        Some(11)
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_device_id(ok_data(&response)?)
    }
}

/// `Get Channel Authentication Capabilities` (App NetFn, cmd 0x38).
#[derive(Debug, Clone, Copy)]
pub struct GetChannelAuthCapabilities {
    /// Channel number (low nibble), 0x0E for the current channel.
    pub channel: u8,
    /// Privilege to query.
    pub privilege: PrivilegeLevel,
}

impl GetChannelAuthCapabilities {
    /// Query the given channel for IPMI v1.5 authentication types.
    pub fn new(channel: u8, privilege: PrivilegeLevel) -> Self {
        Self { channel, privilege }
    }
}

impl Command for GetChannelAuthCapabilities {
    type Output = ChannelAuthCapabilities;
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x38;

    fn request_data(&self) -> Vec<u8> {
        vec![self.channel & 0x0F, self.privilege.as_u8() & 0x0F]
    }

    fn expected_len(&self) -> Option<usize> {
        Some(8)
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_channel_auth_capabilities(ok_data(&response)?)
    }
}

/// `Get Session Challenge` (App NetFn, cmd 0x39).
#[derive(Debug, Clone, Copy)]
pub struct GetSessionChallenge {
    /// Auth type the session will use.
    pub auth: AuthType,
    /// User name, zero padded.
    pub username: [u8; 16],
}

impl Command for GetSessionChallenge {
    type Output = SessionChallenge;
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x39;

    fn request_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(17);
        data.push(self.auth.as_u8());
        data.extend_from_slice(&self.username);
        data
    }

    fn expected_len(&self) -> Option<usize> {
        Some(20)
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.len() < 20 {
            return Err(Error::Decode("Get Session Challenge response too short"));
        }
        let mut challenge = [0u8; 16];
        challenge.copy_from_slice(&data[4..20]);
        Ok(SessionChallenge {
            temporary_session_id: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            challenge,
        })
    }
}

/// `Activate Session` (App NetFn, cmd 0x3A).
#[derive(Debug, Clone, Copy)]
pub struct ActivateSession {
    /// Auth type for the remainder of the session.
    pub auth: AuthType,
    /// Maximum privilege requested for the session.
    pub privilege: PrivilegeLevel,
    /// Challenge returned by `Get Session Challenge`.
    pub challenge: [u8; 16],
    /// Sequence number the controller starts its replies with.
    pub initial_outbound_seq: u32,
}

impl Command for ActivateSession {
    type Output = ActivatedSession;
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x3A;

    fn request_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(22);
        data.push(self.auth.as_u8());
        data.push(self.privilege.as_u8());
        data.extend_from_slice(&self.challenge);
        data.extend_from_slice(&self.initial_outbound_seq.to_le_bytes());
        data
    }

    fn expected_len(&self) -> Option<usize> {
        Some(10)
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.len() < 10 {
            return Err(Error::Decode("Activate Session response too short"));
        }
        Ok(ActivatedSession {
            auth_type: data[0] & 0x0F,
            session_id: u32::from_le_bytes([data[1], data[2], data[3], data[4]]),
            initial_inbound_seq: u32::from_le_bytes([data[5], data[6], data[7], data[8]]),
            max_privilege: data[9] & 0x0F,
        })
    }
}

/// `Set Session Privilege Level` (App NetFn, cmd 0x3B).
#[derive(Debug, Clone, Copy)]
pub struct SetSessionPrivilege {
    /// Requested privilege.
    pub privilege: PrivilegeLevel,
}

impl Command for SetSessionPrivilege {
    type Output = Option<PrivilegeLevel>;
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x3B;

    fn request_data(&self) -> Vec<u8> {
        vec![self.privilege.as_u8()]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        Ok(data.first().copied().and_then(PrivilegeLevel::from_u8))
    }
}

/// `Close Session` (App NetFn, cmd 0x3C).
#[derive(Debug, Clone, Copy)]
pub struct CloseSession {
    /// Session to close.
    pub session_id: u32,
}

impl Command for CloseSession {
    type Output = ();
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x3C;

    fn request_data(&self) -> Vec<u8> {
        self.session_id.to_le_bytes().to_vec()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let _ = ok_data(&response)?;
        Ok(())
    }
}

/// `Get Chassis Status` (Chassis NetFn, cmd 0x01).
#[derive(Debug, Clone, Copy)]
pub struct GetChassisStatus;

impl Command for GetChassisStatus {
    type Output = ChassisStatus;
    const NETFN: u8 = netfn::CHASSIS;
    const CMD: u8 = 0x01;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn expected_len(&self) -> Option<usize> {
        Some(3)
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_chassis_status(ok_data(&response)?)
    }
}

/// `Chassis Control` (Chassis NetFn, cmd 0x02).
#[derive(Debug, Clone, Copy)]
pub struct ChassisControlCommand {
    /// Control operation.
    pub control: ChassisControl,
}

impl Command for ChassisControlCommand {
    type Output = ();
    const NETFN: u8 = netfn::CHASSIS;
    const CMD: u8 = 0x02;

    fn request_data(&self) -> Vec<u8> {
        vec![self.control.as_u8()]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let _ = ok_data(&response)?;
        Ok(())
    }
}

/// A slice of one SDR as returned by `Get SDR` / `Get Device SDR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdrChunk {
    /// Id of the record following the one read; `0xFFFF` after the last record.
    pub next_record_id: u16,
    /// Record bytes starting at the requested offset.
    pub data: Vec<u8>,
}

/// Which repository an SDR command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repository {
    /// The SDR repository of the LAN-attached controller (Storage NetFn).
    Primary,
    /// A controller's own device SDR repository (Sensor/Event NetFn).
    Device,
}

/// `Get SDR Repository Info` (Storage NetFn, cmd 0x20).
#[derive(Debug, Clone, Copy)]
pub struct GetSdrRepositoryInfo;

impl Command for GetSdrRepositoryInfo {
    type Output = RepositoryInfo;
    const NETFN: u8 = netfn::STORAGE;
    const CMD: u8 = 0x20;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn expected_len(&self) -> Option<usize> {
        Some(13)
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.len() < 13 {
            return Err(Error::Decode("Get SDR Repository Info response too short"));
        }
        Ok(RepositoryInfo {
            version: data[0],
            record_count: u16::from_le_bytes([data[1], data[2]]),
            addition_timestamp: u32::from_le_bytes([data[5], data[6], data[7], data[8]]),
            erase_timestamp: u32::from_le_bytes([data[9], data[10], data[11], data[12]]),
        })
    }
}

/// `Get Device SDR Info` (Sensor/Event NetFn, cmd 0x20).
#[derive(Debug, Clone, Copy)]
pub struct GetDeviceSdrInfo;

impl Command for GetDeviceSdrInfo {
    type Output = RepositoryInfo;
    const NETFN: u8 = netfn::SENSOR;
    const CMD: u8 = 0x20;

    fn request_data(&self) -> Vec<u8> {
        // Operation: get SDR count (bit 0 set).
        vec![0x01]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.len() < 2 {
            return Err(Error::Decode("Get Device SDR Info response too short"));
        }
        // Dynamic sensor population (flag bit 7) carries a change timestamp.
        let addition_timestamp = match data.get(2..6) {
            Some(ts) if data[1] & 0x80 != 0 => u32::from_le_bytes([ts[0], ts[1], ts[2], ts[3]]),
            _ => 0,
        };
        Ok(RepositoryInfo {
            version: 0,
            record_count: u16::from(data[0]),
            addition_timestamp,
            erase_timestamp: 0,
        })
    }
}

/// `Reserve SDR Repository` (Storage NetFn 0x22) or `Reserve Device SDR
/// Repository` (Sensor/Event NetFn 0x22).
#[derive(Debug, Clone, Copy)]
pub struct ReserveSdrRepository;

impl Command for ReserveSdrRepository {
    type Output = u16;
    const NETFN: u8 = netfn::STORAGE;
    const CMD: u8 = 0x22;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn expected_len(&self) -> Option<usize> {
        Some(2)
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_reservation(ok_data(&response)?)
    }
}

/// `Reserve Device SDR Repository` (Sensor/Event NetFn, cmd 0x22).
#[derive(Debug, Clone, Copy)]
pub struct ReserveDeviceSdrRepository;

impl Command for ReserveDeviceSdrRepository {
    type Output = u16;
    const NETFN: u8 = netfn::SENSOR;
    const CMD: u8 = 0x22;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn expected_len(&self) -> Option<usize> {
        Some(2)
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_reservation(ok_data(&response)?)
    }
}

fn parse_reservation(data: &[u8]) -> Result<u16> {
    if data.len() < 2 {
        return Err(Error::Decode("reservation response too short"));
    }
    Ok(u16::from_le_bytes([data[0], data[1]]))
}

/// Request fields shared by `Get SDR` and `Get Device SDR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdrRead {
    /// Reservation id from the matching reserve command.
    pub reservation: u16,
    /// Record to read.
    pub record_id: u16,
    /// Offset into the record.
    pub offset: u8,
    /// Number of bytes to read (0xFF = entire record).
    pub count: u8,
}

impl SdrRead {
    fn request_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(6);
        data.extend_from_slice(&self.reservation.to_le_bytes());
        data.extend_from_slice(&self.record_id.to_le_bytes());
        data.push(self.offset);
        data.push(self.count);
        data
    }

    fn expected_len(&self) -> Option<usize> {
        (self.count != 0xFF).then(|| 2 + usize::from(self.count))
    }
}

fn parse_sdr_chunk(data: &[u8]) -> Result<SdrChunk> {
    if data.len() < 2 {
        return Err(Error::Decode("Get SDR response too short"));
    }
    Ok(SdrChunk {
        next_record_id: u16::from_le_bytes([data[0], data[1]]),
        data: data[2..].to_vec(),
    })
}

/// `Get SDR` (Storage NetFn, cmd 0x23).
#[derive(Debug, Clone, Copy)]
pub struct GetSdr(pub SdrRead);

impl Command for GetSdr {
    type Output = SdrChunk;
    const NETFN: u8 = netfn::STORAGE;
    const CMD: u8 = 0x23;

    fn request_data(&self) -> Vec<u8> {
        self.0.request_data()
    }

    fn expected_len(&self) -> Option<usize> {
        self.0.expected_len()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_sdr_chunk(ok_data(&response)?)
    }
}

/// `Get Device SDR` (Sensor/Event NetFn, cmd 0x21).
#[derive(Debug, Clone, Copy)]
pub struct GetDeviceSdr(pub SdrRead);

impl Command for GetDeviceSdr {
    type Output = SdrChunk;
    const NETFN: u8 = netfn::SENSOR;
    const CMD: u8 = 0x21;

    fn request_data(&self) -> Vec<u8> {
        self.0.request_data()
    }

    fn expected_len(&self) -> Option<usize> {
        self.0.expected_len()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_sdr_chunk(ok_data(&response)?)
    }
}

/// `Get FRU Inventory Area Info` (Storage NetFn, cmd 0x10).
#[derive(Debug, Clone, Copy)]
pub struct GetFruInventoryAreaInfo {
    /// FRU device id on the addressed controller.
    pub fru_id: u8,
}

impl Command for GetFruInventoryAreaInfo {
    type Output = FruAreaInfo;
    const NETFN: u8 = netfn::STORAGE;
    const CMD: u8 = 0x10;

    fn request_data(&self) -> Vec<u8> {
        vec![self.fru_id]
    }

    fn expected_len(&self) -> Option<usize> {
        Some(3)
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.len() < 3 {
            return Err(Error::Decode("Get FRU Inventory Area Info response too short"));
        }
        Ok(FruAreaInfo {
            size: u16::from_le_bytes([data[0], data[1]]),
            word_access: data[2] & 0x01 != 0,
        })
    }
}

/// `Read FRU Data` (Storage NetFn, cmd 0x11).
#[derive(Debug, Clone, Copy)]
pub struct ReadFruData {
    /// FRU device id on the addressed controller.
    pub fru_id: u8,
    /// Inventory offset.
    pub offset: u16,
    /// Number of bytes to read.
    pub count: u8,
}

impl Command for ReadFruData {
    type Output = Vec<u8>;
    const NETFN: u8 = netfn::STORAGE;
    const CMD: u8 = 0x11;

    fn request_data(&self) -> Vec<u8> {
        let [lo, hi] = self.offset.to_le_bytes();
        vec![self.fru_id, lo, hi, self.count]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        let (&count, bytes) = data
            .split_first()
            .ok_or(Error::Decode("Read FRU Data response too short"))?;
        let n = usize::from(count).min(bytes.len());
        Ok(bytes[..n].to_vec())
    }
}

/// `Get Sensor Reading` (Sensor/Event NetFn, cmd 0x2D).
#[derive(Debug, Clone, Copy)]
pub struct GetSensorReading {
    /// Sensor number on the owning controller.
    pub sensor_number: u8,
}

impl Command for GetSensorReading {
    type Output = SensorReading;
    const NETFN: u8 = netfn::SENSOR;
    const CMD: u8 = 0x2D;

    fn request_data(&self) -> Vec<u8> {
        vec![self.sensor_number]
    }

    fn expected_len(&self) -> Option<usize> {
        Some(2)
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        if data.len() < 2 {
            return Err(Error::Decode("Get Sensor Reading response too short"));
        }
        Ok(SensorReading {
            raw: data[0],
            event_messages_enabled: data[1] & 0x80 != 0,
            scanning_enabled: data[1] & 0x40 != 0,
            unavailable: data[1] & 0x20 != 0,
            threshold_state: data.get(2).copied().unwrap_or(0) & 0x3F,
        })
    }
}

/// PICMG `Get Address Info` (cmd 0x01).
#[derive(Debug, Clone, Copy)]
pub struct GetAddressInfo {
    /// FRU device id.
    pub fru_id: u8,
}

impl Command for GetAddressInfo {
    type Output = AddressInfo;
    const NETFN: u8 = netfn::PICMG;
    const CMD: u8 = 0x01;

    fn request_data(&self) -> Vec<u8> {
        vec![PICMG_ID, self.fru_id]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = picmg_data(&response)?;
        if data.len() < 6 {
            return Err(Error::Decode("Get Address Info response too short"));
        }
        Ok(AddressInfo {
            hardware_address: data[0],
            ipmb_address: data[1],
            fru_id: data[3],
            site_number: data[4],
            site_type: data[5],
        })
    }
}

/// PICMG `Set FRU Activation` (cmd 0x0C).
#[derive(Debug, Clone, Copy)]
pub struct SetFruActivation {
    /// FRU device id.
    pub fru_id: u8,
    /// Activate (`true`) or deactivate (`false`).
    pub activate: bool,
}

impl Command for SetFruActivation {
    type Output = ();
    const NETFN: u8 = netfn::PICMG;
    const CMD: u8 = 0x0C;

    fn request_data(&self) -> Vec<u8> {
        vec![PICMG_ID, self.fru_id, u8::from(self.activate)]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let _ = picmg_data(&response)?;
        Ok(())
    }
}

/// Power type selector for PICMG `Get Power Level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerType {
    /// Steady state power draw levels.
    SteadyState = 0x00,
    /// Desired steady state draw levels.
    DesiredSteadyState = 0x01,
    /// Early power draw levels.
    Early = 0x02,
    /// Desired early levels.
    DesiredEarly = 0x03,
}

/// PICMG `Get Power Level` (cmd 0x12).
#[derive(Debug, Clone, Copy)]
pub struct GetPowerLevel {
    /// FRU device id.
    pub fru_id: u8,
    /// Which levels to report.
    pub power_type: PowerType,
}

impl Command for GetPowerLevel {
    type Output = PowerLevel;
    const NETFN: u8 = netfn::PICMG;
    const CMD: u8 = 0x12;

    fn request_data(&self) -> Vec<u8> {
        vec![PICMG_ID, self.fru_id, self.power_type as u8]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = picmg_data(&response)?;
        if data.len() < 3 {
            return Err(Error::Decode("Get Power Level response too short"));
        }
        Ok(PowerLevel {
            dynamic: data[0] & 0x80 != 0,
            level: data[0] & 0x1F,
            delay_to_stable: data[1],
            multiplier: data[2],
            levels: data[3..].iter().copied().take(20).collect(),
        })
    }
}

/// PICMG `Get Fan Speed Properties` (cmd 0x14).
#[derive(Debug, Clone, Copy)]
pub struct GetFanSpeedProperties {
    /// FRU device id of the fan tray.
    pub fru_id: u8,
}

impl Command for GetFanSpeedProperties {
    type Output = FanProperties;
    const NETFN: u8 = netfn::PICMG;
    const CMD: u8 = 0x14;

    fn request_data(&self) -> Vec<u8> {
        vec![PICMG_ID, self.fru_id]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = picmg_data(&response)?;
        if data.len() < 4 {
            return Err(Error::Decode("Get Fan Speed Properties response too short"));
        }
        Ok(FanProperties {
            min_level: data[0],
            max_level: data[1],
            nominal_level: data[2],
            local_control_supported: data[3] & 0x80 != 0,
        })
    }
}

/// PICMG `Set Fan Level` (cmd 0x15).
#[derive(Debug, Clone, Copy)]
pub struct SetFanLevel {
    /// FRU device id of the fan tray.
    pub fru_id: u8,
    /// New override level.
    pub level: u8,
}

impl Command for SetFanLevel {
    type Output = ();
    const NETFN: u8 = netfn::PICMG;
    const CMD: u8 = 0x15;

    fn request_data(&self) -> Vec<u8> {
        vec![PICMG_ID, self.fru_id, self.level]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let _ = picmg_data(&response)?;
        Ok(())
    }
}

/// PICMG `Get Fan Level` (cmd 0x16).
#[derive(Debug, Clone, Copy)]
pub struct GetFanLevel {
    /// FRU device id of the fan tray.
    pub fru_id: u8,
}

impl Command for GetFanLevel {
    type Output = FanLevel;
    const NETFN: u8 = netfn::PICMG;
    const CMD: u8 = 0x16;

    fn request_data(&self) -> Vec<u8> {
        vec![PICMG_ID, self.fru_id]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = picmg_data(&response)?;
        let (&override_level, rest) = data
            .split_first()
            .ok_or(Error::Decode("Get Fan Level response too short"))?;
        Ok(FanLevel {
            override_level,
            local_level: rest.first().copied(),
            local_control_enabled: rest.get(1).map(|&b| b & 0x01 != 0),
        })
    }
}

pub(crate) fn parse_device_id(data: &[u8]) -> Result<DeviceId> {
    // Aux firmware revision (bytes 12..15) is optional.
    if data.len() < 11 {
        return Err(Error::Decode("Get Device ID response too short"));
    }

    let manufacturer_id =
        u32::from(data[6]) | (u32::from(data[7]) << 8) | (u32::from(data[8]) << 16);
    let product_id = u16::from(data[9]) | (u16::from(data[10]) << 8);

    Ok(DeviceId {
        device_id: data[0],
        device_revision: data[1] & 0x0F,
        firmware_major: data[2] & 0x7F,
        firmware_minor: data[3],
        ipmi_version: data[4],
        additional_support: data[5],
        manufacturer_id,
        product_id,
    })
}

pub(crate) fn parse_chassis_status(data: &[u8]) -> Result<ChassisStatus> {
    if data.len() < 3 {
        return Err(Error::Decode("Get Chassis Status response too short"));
    }

    let b1 = data[0];
    let b2 = data[1];
    let b3 = data[2];

    let power_restore_policy = match (b1 >> 5) & 0x03 {
        0x00 => PowerRestorePolicy::AlwaysOff,
        0x01 => PowerRestorePolicy::Previous,
        0x02 => PowerRestorePolicy::AlwaysOn,
        other => PowerRestorePolicy::Unknown(other),
    };

    let last_power_event = LastPowerEvent {
        ac_failed: b2 & 0x01 != 0,
        power_overload: b2 & 0x02 != 0,
        power_interlock: b2 & 0x04 != 0,
        power_fault: b2 & 0x08 != 0,
        power_on_command: b2 & 0x10 != 0,
    };

    Ok(ChassisStatus {
        system_power_on: b1 & 0x01 != 0,
        power_overload: b1 & 0x02 != 0,
        power_interlock: b1 & 0x04 != 0,
        main_power_fault: b1 & 0x08 != 0,
        power_control_fault: b1 & 0x10 != 0,
        power_restore_policy,
        last_power_event,
        chassis_intrusion: b3 & 0x01 != 0,
        front_panel_lockout: b3 & 0x02 != 0,
        drive_fault: b3 & 0x04 != 0,
        cooling_fan_fault: b3 & 0x08 != 0,
    })
}

pub(crate) fn parse_channel_auth_capabilities(data: &[u8]) -> Result<ChannelAuthCapabilities> {
    if data.len() < 8 {
        return Err(Error::Decode(
            "Get Channel Authentication Capabilities response too short",
        ));
    }

    let enabled_auth_types = data[1] & 0x3F;
    let has_oem = enabled_auth_types & 0x20 != 0;
    let oem_id = has_oem
        .then(|| u32::from(data[4]) | (u32::from(data[5]) << 8) | (u32::from(data[6]) << 16));

    Ok(ChannelAuthCapabilities {
        channel_number: data[0] & 0x0F,
        enabled_auth_types,
        per_message_auth_disabled: data[2] & 0x10 != 0,
        user_level_auth_disabled: data[2] & 0x08 != 0,
        non_null_usernames: data[2] & 0x04 != 0,
        null_usernames: data[2] & 0x02 != 0,
        anonymous_login_enabled: data[2] & 0x01 != 0,
        oem_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(data: &[u8]) -> RawResponse {
        RawResponse {
            completion_code: 0x00,
            data: data.to_vec(),
        }
    }

    #[test]
    fn parse_chassis_status_fields() {
        let status = parse_chassis_status(&[0x5F, 0x19, 0x0F]).expect("parse");

        assert!(status.system_power_on);
        assert!(status.power_overload);
        assert!(status.power_interlock);
        assert!(status.main_power_fault);
        assert!(status.power_control_fault);
        assert!(matches!(
            status.power_restore_policy,
            PowerRestorePolicy::AlwaysOn
        ));

        assert!(status.last_power_event.ac_failed);
        assert!(!status.last_power_event.power_overload);
        assert!(status.last_power_event.power_fault);
        assert!(status.last_power_event.power_on_command);

        assert!(status.chassis_intrusion);
        assert!(status.cooling_fan_fault);
    }

    #[test]
    fn parse_channel_auth_capabilities_with_oem() {
        let data = [0x02, 0x35, 0x1D, 0x00, 0x33, 0x22, 0x11, 0x77];
        let caps = parse_channel_auth_capabilities(&data).expect("parse");

        assert_eq!(caps.channel_number, 0x02);
        assert_eq!(caps.enabled_auth_types, 0x35);
        assert!(caps.supports(AuthType::None));
        assert!(caps.supports(AuthType::Md5));
        assert!(caps.supports(AuthType::Password));
        assert!(caps.per_message_auth_disabled);
        assert!(caps.user_level_auth_disabled);
        assert!(caps.non_null_usernames);
        assert!(!caps.null_usernames);
        assert!(caps.anonymous_login_enabled);
        assert_eq!(caps.oem_id, Some(0x112233));
    }

    #[test]
    fn parse_channel_auth_capabilities_without_oem() {
        let data = [0x01, 0x10, 0x00, 0x00, 0xAA, 0xBB, 0xCC, 0xDD];
        let caps = parse_channel_auth_capabilities(&data).expect("parse");
        assert!(!caps.supports(AuthType::None));
        assert!(caps.supports(AuthType::Password));
        assert_eq!(caps.oem_id, None);
    }

    #[test]
    fn session_challenge_and_activation() {
        let mut data = vec![0x01, 0x00, 0x00, 0x00];
        data.extend_from_slice(&[0x5A; 16]);
        let challenge = GetSessionChallenge {
            auth: AuthType::None,
            username: [0; 16],
        }
        .parse_response(ok(&data))
        .expect("challenge");
        assert_eq!(challenge.temporary_session_id, 1);
        assert_eq!(challenge.challenge, [0x5A; 16]);

        let activate = ActivateSession {
            auth: AuthType::Password,
            privilege: PrivilegeLevel::Operator,
            challenge: challenge.challenge,
            initial_outbound_seq: 0x10,
        };
        let request = activate.request_data();
        assert_eq!(request.len(), 22);
        assert_eq!(request[0], 0x04);
        assert_eq!(request[1], 0x03);
        assert_eq!(&request[18..], &[0x10, 0, 0, 0]);

        let reply = activate
            .parse_response(ok(&[0x04, 0x02, 0, 0, 0, 0x05, 0, 0, 0, 0x04]))
            .expect("activate");
        assert_eq!(reply.session_id, 2);
        assert_eq!(reply.initial_inbound_seq, 5);
    }

    #[test]
    fn sdr_read_request_and_chunk() {
        let read = GetSdr(SdrRead {
            reservation: 0x1234,
            record_id: 0x0002,
            offset: 5,
            count: 22,
        });
        assert_eq!(read.request_data(), vec![0x34, 0x12, 0x02, 0x00, 0x05, 22]);
        assert_eq!(read.expected_len(), Some(24));

        let chunk = read.parse_response(ok(&[0xFF, 0xFF, 1, 2, 3])).expect("chunk");
        assert_eq!(chunk.next_record_id, 0xFFFF);
        assert_eq!(chunk.data, vec![1, 2, 3]);
    }

    #[test]
    fn read_fru_data_honours_count_byte() {
        let read = ReadFruData {
            fru_id: 3,
            offset: 0x0110,
            count: 16,
        };
        assert_eq!(read.request_data(), vec![3, 0x10, 0x01, 16]);
        let bytes = read.parse_response(ok(&[2, 0xAA, 0xBB, 0xCC])).expect("read");
        assert_eq!(bytes, vec![0xAA, 0xBB]);
    }

    #[test]
    fn sensor_reading_flags() {
        let reading = GetSensorReading { sensor_number: 4 }
            .parse_response(ok(&[0x64, 0x60, 0x08]))
            .expect("reading");
        assert_eq!(reading.raw, 0x64);
        assert!(reading.scanning_enabled);
        assert!(reading.unavailable);
        assert_eq!(reading.threshold_state, 0x08);
    }

    #[test]
    fn picmg_replies_require_identifier() {
        let err = GetFanLevel { fru_id: 40 }
            .parse_response(ok(&[0x01, 0x05]))
            .expect_err("bad identifier");
        assert!(matches!(err, Error::Decode(_)));

        let level = GetFanLevel { fru_id: 40 }
            .parse_response(ok(&[0x00, 0x05, 0x07, 0x01]))
            .expect("level");
        assert_eq!(level.override_level, 5);
        assert_eq!(level.local_level, Some(7));
        assert_eq!(level.local_control_enabled, Some(true));
    }

    #[test]
    fn power_level_watts() {
        let level = GetPowerLevel {
            fru_id: 5,
            power_type: PowerType::SteadyState,
        }
        .parse_response(ok(&[0x00, 0x82, 0x00, 100, 20, 40]))
        .expect("power");
        assert!(level.dynamic);
        assert_eq!(level.level, 2);
        assert_eq!(level.current_watts(), Some(400.0));
    }
}
