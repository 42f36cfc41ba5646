//! Sensor Data Record decoding.
//!
//! Offsets below are zero-based from the start of the record, header
//! included.

use crate::error::{Error, Result};
use crate::fru::decode_field;

/// Length of the record header (id, version, type, remaining length).
pub const SDR_HEADER_LEN: usize = 5;

/// A record id in an SDR repository.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RecordId(u16);

impl RecordId {
    /// Id used to request the first record.
    pub const FIRST: Self = Self(0);
    /// "No more records" marker returned as the next record id.
    pub const LAST: Self = Self(0xFFFF);

    /// Wrap a raw id.
    pub fn new_raw(value: u16) -> Self {
        Self(value)
    }

    /// Whether this is the end-of-repository marker.
    pub fn is_last(&self) -> bool {
        self.0 == Self::LAST.0
    }

    /// Raw value.
    pub fn value(&self) -> u16 {
        self.0
    }
}

/// Record type codes.
pub mod record_type {
    /// Full sensor record.
    pub const FULL_SENSOR: u8 = 0x01;
    /// Compact sensor record.
    pub const COMPACT_SENSOR: u8 = 0x02;
    /// Entity association record.
    pub const ENTITY_ASSOCIATION: u8 = 0x08;
    /// Device-relative entity association record.
    pub const DEVICE_RELATIVE_ASSOCIATION: u8 = 0x09;
    /// FRU device locator record.
    pub const FRU_LOCATOR: u8 = 0x11;
    /// Management controller device locator record.
    pub const MC_LOCATOR: u8 = 0x12;
}

/// Entity id codes used by the topology resolver.
pub mod entity_id {
    /// Power supply / power module.
    pub const POWER_MODULE: u8 = 0x0A;
    /// Cooling unit (fan tray).
    pub const COOLING_UNIT: u8 = 0x1E;
    /// PICMG front board (ATCA blade).
    pub const FRONT_BOARD: u8 = 0xA0;
    /// PICMG rear transition module.
    pub const RTM: u8 = 0xC0;
    /// PICMG Advanced Mezzanine Card.
    pub const AMC: u8 = 0xC1;
    /// MicroTCA Carrier Hub.
    pub const MCH: u8 = 0xC2;
    /// PICMG shelf management controller.
    pub const SHELF_MANAGER: u8 = 0xF0;
    /// PICMG shelf FRU information.
    pub const SHELF_FRU: u8 = 0xF2;
}

/// Sensor type codes.
pub mod sensor_type {
    /// Temperature.
    pub const TEMPERATURE: u8 = 0x01;
    /// Voltage.
    pub const VOLTAGE: u8 = 0x02;
    /// Current.
    pub const CURRENT: u8 = 0x03;
    /// Fan.
    pub const FAN: u8 = 0x04;
    /// Power supply.
    pub const POWER_SUPPLY: u8 = 0x08;
    /// PICMG FRU hot swap.
    pub const HOT_SWAP: u8 = 0xF0;
    /// PICMG IPMB physical link.
    pub const IPMB_LINK: u8 = 0xF1;
}

/// The 5-byte header every record starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdrHeader {
    /// Record id.
    pub record_id: u16,
    /// SDR version (BCD).
    pub version: u8,
    /// Record type code.
    pub record_type: u8,
    /// Bytes following the header.
    pub body_len: u8,
}

impl SdrHeader {
    /// Decode the header.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let h = data
            .get(..SDR_HEADER_LEN)
            .ok_or(Error::Decode("SDR header too short"))?;
        Ok(Self {
            record_id: u16::from_le_bytes([h[0], h[1]]),
            version: h[2],
            record_type: h[3],
            body_len: h[4],
        })
    }

    /// Total record length, header included.
    pub fn record_len(&self) -> usize {
        SDR_HEADER_LEN + usize::from(self.body_len)
    }
}

/// Numeric format of analog readings (units 1, bits 7:6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalogFormat {
    /// Unsigned.
    #[default]
    Unsigned,
    /// One's complement.
    OnesComplement,
    /// Two's complement.
    TwosComplement,
    /// No analog reading.
    NonNumeric,
}

impl AnalogFormat {
    fn from_units1(units1: u8) -> Self {
        match units1 >> 6 {
            0 => Self::Unsigned,
            1 => Self::OnesComplement,
            2 => Self::TwosComplement,
            _ => Self::NonNumeric,
        }
    }
}

/// Raw threshold bytes from a full sensor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawThresholds {
    /// Upper non-recoverable.
    pub upper_non_recoverable: u8,
    /// Upper critical.
    pub upper_critical: u8,
    /// Upper non-critical.
    pub upper_non_critical: u8,
    /// Lower non-recoverable.
    pub lower_non_recoverable: u8,
    /// Lower critical.
    pub lower_critical: u8,
    /// Lower non-critical.
    pub lower_non_critical: u8,
}

/// Readable-threshold mask bits.
pub mod readable {
    /// Lower non-critical.
    pub const LOWER_NON_CRITICAL: u8 = 0x01;
    /// Lower critical.
    pub const LOWER_CRITICAL: u8 = 0x02;
    /// Lower non-recoverable.
    pub const LOWER_NON_RECOVERABLE: u8 = 0x04;
    /// Upper non-critical.
    pub const UPPER_NON_CRITICAL: u8 = 0x08;
    /// Upper critical.
    pub const UPPER_CRITICAL: u8 = 0x10;
    /// Upper non-recoverable.
    pub const UPPER_NON_RECOVERABLE: u8 = 0x20;
}

/// A full or compact sensor record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensorRecord {
    /// Record id.
    pub record_id: u16,
    /// Decoded from a full (not compact) record.
    pub full: bool,
    /// Owner slave address.
    pub owner: u8,
    /// Owner LUN.
    pub lun: u8,
    /// Owner channel.
    pub channel: u8,
    /// Sensor number.
    pub number: u8,
    /// Entity id.
    pub entity_id: u8,
    /// Entity instance (bits 6:0).
    pub entity_instance: u8,
    /// Sensor type code.
    pub sensor_type: u8,
    /// Event/reading type code.
    pub event_type: u8,
    /// Readable threshold mask.
    pub readable_thresholds: u8,
    /// Analog data format.
    pub format: AnalogFormat,
    /// Base unit code.
    pub base_unit: u8,
    /// Modifier unit code.
    pub modifier_unit: u8,
    /// Linearization code.
    pub linearization: u8,
    /// Signed 10-bit M.
    pub m: i16,
    /// Signed 10-bit B.
    pub b: i16,
    /// Signed 4-bit result exponent.
    pub r_exp: i8,
    /// Signed 4-bit B exponent.
    pub b_exp: i8,
    /// Nominal reading.
    pub nominal: u8,
    /// Raw thresholds.
    pub thresholds: RawThresholds,
    /// Id string.
    pub id: String,
}

impl SensorRecord {
    /// Whether the sensor has a threshold-based event/reading type.
    pub fn is_threshold(&self) -> bool {
        self.event_type == 0x01
    }

    /// Whether raw readings of this sensor can be converted.
    pub fn is_analog(&self) -> bool {
        self.full && self.format != AnalogFormat::NonNumeric
    }
}

/// A FRU device locator record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FruLocator {
    /// Record id.
    pub record_id: u16,
    /// Address of the controller giving access to the FRU.
    pub address: u8,
    /// FRU device id.
    pub fru_id: u8,
    /// Logical FRU device (accessed through FRU commands).
    pub logical: bool,
    /// Access LUN.
    pub lun: u8,
    /// Channel.
    pub channel: u8,
    /// Device type.
    pub device_type: u8,
    /// Entity id.
    pub entity_id: u8,
    /// Entity instance.
    pub entity_instance: u8,
    /// Id string.
    pub id: String,
}

/// A management controller device locator record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct McLocator {
    /// Record id.
    pub record_id: u16,
    /// Slave address.
    pub address: u8,
    /// Channel.
    pub channel: u8,
    /// Device capability bits.
    pub capabilities: u8,
    /// Entity id.
    pub entity_id: u8,
    /// Entity instance.
    pub entity_instance: u8,
    /// Id string.
    pub id: String,
}

impl McLocator {
    /// Controller advertises FRU inventory support.
    pub fn has_fru_inventory(&self) -> bool {
        self.capabilities & 0x08 != 0
    }

    /// Controller advertises a device SDR repository.
    pub fn has_sensors(&self) -> bool {
        self.capabilities & 0x01 != 0
    }
}

/// An entity reference in an association record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EntityRef {
    /// Entity id.
    pub id: u8,
    /// Entity instance.
    pub instance: u8,
}

/// An entity association record (plain or device-relative).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntityAssociation {
    /// Record id.
    pub record_id: u16,
    /// Containing entity.
    pub container: EntityRef,
    /// Container address and channel for device-relative records.
    pub device: Option<(u8, u8)>,
    /// Entries are two ranges rather than a list.
    pub ranges: bool,
    /// Further records extend this association.
    pub linked: bool,
    /// Up to four raw entries; unused slots have entity id 0.
    pub entries: [EntityRef; 4],
}

impl EntityAssociation {
    /// Contained entities, ranges expanded.
    pub fn contained(&self) -> Vec<EntityRef> {
        if !self.ranges {
            return self.entries.iter().copied().filter(|e| e.id != 0).collect();
        }
        let mut out = Vec::new();
        for pair in self.entries.chunks(2) {
            let (start, end) = (pair[0], pair[1]);
            if start.id == 0 {
                continue;
            }
            if end.id != start.id || end.instance < start.instance {
                out.push(start);
                continue;
            }
            out.extend((start.instance..=end.instance).map(|instance| EntityRef {
                id: start.id,
                instance,
            }));
        }
        out
    }
}

/// A decoded repository record.
#[derive(Debug, Clone, PartialEq)]
pub enum SdrRecord {
    /// Full sensor record.
    FullSensor(SensorRecord),
    /// Compact sensor record.
    CompactSensor(SensorRecord),
    /// FRU device locator.
    FruLocator(FruLocator),
    /// Management controller device locator.
    McLocator(McLocator),
    /// Entity association or device-relative entity association.
    EntityAssociation(EntityAssociation),
    /// A record type the engine does not use.
    Other {
        /// Record id.
        record_id: u16,
        /// Record type code.
        record_type: u8,
    },
}

impl SdrRecord {
    /// Decode a complete record.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = SdrHeader::parse(data)?;
        let record = match header.record_type {
            record_type::FULL_SENSOR => Self::FullSensor(parse_full_sensor(&header, data)?),
            record_type::COMPACT_SENSOR => {
                Self::CompactSensor(parse_compact_sensor(&header, data)?)
            }
            record_type::FRU_LOCATOR => Self::FruLocator(parse_fru_locator(&header, data)?),
            record_type::MC_LOCATOR => Self::McLocator(parse_mc_locator(&header, data)?),
            record_type::ENTITY_ASSOCIATION => {
                Self::EntityAssociation(parse_entity_association(&header, data)?)
            }
            record_type::DEVICE_RELATIVE_ASSOCIATION => {
                Self::EntityAssociation(parse_device_relative_association(&header, data)?)
            }
            other => Self::Other {
                record_id: header.record_id,
                record_type: other,
            },
        };
        Ok(record)
    }
}

fn require(data: &[u8], len: usize, what: &'static str) -> Result<()> {
    if data.len() < len {
        return Err(Error::Decode(what));
    }
    Ok(())
}

/// Decode an id string from its type/length byte at `offset`.
fn id_string(data: &[u8], offset: usize) -> String {
    match data.get(offset) {
        Some(&type_length) => {
            let bytes = data.get(offset + 1..).unwrap_or_default();
            decode_field(type_length, bytes, None).value
        }
        None => String::new(),
    }
}

/// Sign-extend the low `bits` bits of `value`.
fn sign_extend(value: u16, bits: u32) -> i16 {
    let shift = 16 - bits;
    ((value << shift) as i16) >> shift
}

/// Fields shared by full and compact sensor records (offsets 5..=13).
fn sensor_common(header: &SdrHeader, data: &[u8], full: bool) -> SensorRecord {
    SensorRecord {
        record_id: header.record_id,
        full,
        owner: data[5],
        lun: data[6] & 0x03,
        channel: data[6] >> 4,
        number: data[7],
        entity_id: data[8],
        entity_instance: data[9] & 0x7F,
        sensor_type: data[12],
        event_type: data[13],
        readable_thresholds: data[18] & 0x3F,
        ..SensorRecord::default()
    }
}

fn parse_full_sensor(header: &SdrHeader, data: &[u8]) -> Result<SensorRecord> {
    require(data, 48, "full sensor record too short")?;
    let mut sensor = sensor_common(header, data, true);

    sensor.format = AnalogFormat::from_units1(data[20]);
    sensor.base_unit = data[21];
    sensor.modifier_unit = data[22];
    sensor.linearization = data[23] & 0x7F;
    sensor.m = sign_extend(u16::from(data[24]) | (u16::from(data[25] >> 6) << 8), 10);
    sensor.b = sign_extend(u16::from(data[26]) | (u16::from(data[27] >> 6) << 8), 10);
    sensor.r_exp = sign_extend(u16::from(data[29] >> 4), 4) as i8;
    sensor.b_exp = sign_extend(u16::from(data[29] & 0x0F), 4) as i8;
    sensor.nominal = data[31];
    sensor.thresholds = RawThresholds {
        upper_non_recoverable: data[36],
        upper_critical: data[37],
        upper_non_critical: data[38],
        lower_non_recoverable: data[39],
        lower_critical: data[40],
        lower_non_critical: data[41],
    };
    sensor.id = id_string(data, 47);
    Ok(sensor)
}

fn parse_compact_sensor(header: &SdrHeader, data: &[u8]) -> Result<SensorRecord> {
    require(data, 32, "compact sensor record too short")?;
    let mut sensor = sensor_common(header, data, false);
    sensor.format = AnalogFormat::NonNumeric;
    sensor.base_unit = data[21];
    sensor.modifier_unit = data[22];
    sensor.id = id_string(data, 31);
    Ok(sensor)
}

fn parse_fru_locator(header: &SdrHeader, data: &[u8]) -> Result<FruLocator> {
    require(data, 16, "FRU locator record too short")?;
    Ok(FruLocator {
        record_id: header.record_id,
        address: data[5],
        fru_id: data[6],
        logical: data[7] & 0x80 != 0,
        lun: (data[7] >> 3) & 0x03,
        channel: data[8] >> 4,
        device_type: data[10],
        entity_id: data[12],
        entity_instance: data[13] & 0x7F,
        id: id_string(data, 15),
    })
}

fn parse_mc_locator(header: &SdrHeader, data: &[u8]) -> Result<McLocator> {
    require(data, 16, "MC locator record too short")?;
    Ok(McLocator {
        record_id: header.record_id,
        address: data[5],
        channel: data[6] & 0x0F,
        capabilities: data[8],
        entity_id: data[12],
        entity_instance: data[13] & 0x7F,
        id: id_string(data, 15),
    })
}

fn entity(id: u8, instance: u8) -> EntityRef {
    EntityRef {
        id,
        instance: instance & 0x7F,
    }
}

fn parse_entity_association(header: &SdrHeader, data: &[u8]) -> Result<EntityAssociation> {
    require(data, 16, "entity association record too short")?;
    let mut entries = [EntityRef::default(); 4];
    for (i, entry) in entries.iter_mut().enumerate() {
        *entry = entity(data[8 + 2 * i], data[9 + 2 * i]);
    }
    Ok(EntityAssociation {
        record_id: header.record_id,
        container: entity(data[5], data[6]),
        device: None,
        ranges: data[7] & 0x80 != 0,
        linked: data[7] & 0x40 != 0,
        entries,
    })
}

fn parse_device_relative_association(
    header: &SdrHeader,
    data: &[u8],
) -> Result<EntityAssociation> {
    require(data, 26, "device-relative association record too short")?;
    let mut entries = [EntityRef::default(); 4];
    for (i, entry) in entries.iter_mut().enumerate() {
        let base = 10 + 4 * i;
        *entry = entity(data[base + 2], data[base + 3]);
    }
    Ok(EntityAssociation {
        record_id: header.record_id,
        container: entity(data[5], data[6]),
        device: Some((data[7], data[8] >> 4)),
        ranges: data[9] & 0x80 != 0,
        linked: data[9] & 0x40 != 0,
        entries,
    })
}

/// Builders for raw records, used by tests and the simulated controller.
#[cfg(test)]
pub(crate) mod build {
    use super::record_type;

    fn header(record_id: u16, kind: u8, body: Vec<u8>) -> Vec<u8> {
        let mut out = record_id.to_le_bytes().to_vec();
        out.extend([0x51, kind, body.len() as u8]);
        out.extend(body);
        out
    }

    fn id_bytes(id: &str) -> Vec<u8> {
        let mut out = vec![0xC0 | id.len() as u8];
        out.extend_from_slice(id.as_bytes());
        out
    }

    /// Parameters of a synthetic full sensor record.
    #[derive(Debug, Clone)]
    pub(crate) struct FullSensor {
        pub owner: u8,
        pub number: u8,
        pub entity_id: u8,
        pub entity_instance: u8,
        pub sensor_type: u8,
        pub m: i16,
        pub b: i16,
        pub r_exp: i8,
        pub b_exp: i8,
        pub units1: u8,
        pub linearization: u8,
        pub readable: u8,
        pub thresholds: [u8; 6],
        pub id: &'static str,
    }

    impl Default for FullSensor {
        fn default() -> Self {
            Self {
                owner: 0x20,
                number: 1,
                entity_id: 0xC2,
                entity_instance: 1,
                sensor_type: 0x01,
                m: 1,
                b: 0,
                r_exp: 0,
                b_exp: 0,
                units1: 0x00,
                linearization: 0,
                readable: 0x1B,
                thresholds: [0; 6],
                id: "Temp",
            }
        }
    }

    impl FullSensor {
        pub(crate) fn encode(&self, record_id: u16) -> Vec<u8> {
            let mut body = vec![0u8; 43];
            let m = self.m as u16 & 0x3FF;
            let b = self.b as u16 & 0x3FF;
            body[0] = self.owner;
            body[1] = 0x00;
            body[2] = self.number;
            body[3] = self.entity_id;
            body[4] = self.entity_instance;
            body[7] = self.sensor_type;
            body[8] = 0x01;
            body[13] = self.readable;
            body[15] = self.units1;
            body[16] = 0x01;
            body[18] = self.linearization;
            body[19] = m as u8;
            body[20] = ((m >> 8) as u8) << 6;
            body[21] = b as u8;
            body[22] = ((b >> 8) as u8) << 6;
            body[24] = ((self.r_exp as u8 & 0x0F) << 4) | (self.b_exp as u8 & 0x0F);
            body[31..37].copy_from_slice(&self.thresholds);
            body.truncate(42);
            body.extend(id_bytes(self.id));
            header(record_id, record_type::FULL_SENSOR, body)
        }
    }

    pub(crate) fn compact_sensor(
        record_id: u16,
        owner: u8,
        number: u8,
        entity_id: u8,
        entity_instance: u8,
        sensor_type: u8,
        id: &str,
    ) -> Vec<u8> {
        let mut body = vec![0u8; 26];
        body[0] = owner;
        body[2] = number;
        body[3] = entity_id;
        body[4] = entity_instance;
        body[7] = sensor_type;
        body[8] = 0x6F;
        body.extend(id_bytes(id));
        header(record_id, record_type::COMPACT_SENSOR, body)
    }

    pub(crate) fn fru_locator(
        record_id: u16,
        address: u8,
        fru_id: u8,
        entity_id: u8,
        entity_instance: u8,
        id: &str,
    ) -> Vec<u8> {
        let mut body = vec![0u8; 10];
        body[0] = address;
        body[1] = fru_id;
        body[2] = 0x80;
        body[5] = 0x10;
        body[7] = entity_id;
        body[8] = entity_instance;
        body.extend(id_bytes(id));
        header(record_id, record_type::FRU_LOCATOR, body)
    }

    pub(crate) fn mc_locator(
        record_id: u16,
        address: u8,
        capabilities: u8,
        entity_id: u8,
        entity_instance: u8,
        id: &str,
    ) -> Vec<u8> {
        let mut body = vec![0u8; 10];
        body[0] = address;
        body[3] = capabilities;
        body[7] = entity_id;
        body[8] = entity_instance;
        body.extend(id_bytes(id));
        header(record_id, record_type::MC_LOCATOR, body)
    }

    pub(crate) fn entity_association(
        record_id: u16,
        container: (u8, u8),
        flags: u8,
        entries: [(u8, u8); 4],
    ) -> Vec<u8> {
        let mut body = vec![container.0, container.1, flags];
        for (id, instance) in entries {
            body.extend([id, instance]);
        }
        header(record_id, record_type::ENTITY_ASSOCIATION, body)
    }
}
