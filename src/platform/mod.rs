//! Platform families and their adapters.
//!
//! One engine serves MicroTCA (two MCH vendors), ATCA shelf managers and
//! plain server BMCs. Everything family-specific sits behind
//! [`PlatformAdapter`]; operations a family lacks keep the default
//! `Unsupported`/`None` implementation.

use std::time::Duration;

use crate::client::Connection;
use crate::commands::{
    GetAddressInfo, GetChassisStatus, GetFanLevel, GetFanSpeedProperties, GetPowerLevel,
    PowerType, SetFanLevel, SetFruActivation,
};
use crate::error::{Error, Result};
use crate::protocol::{BMC_ADDR, BridgeReply, Route};
use crate::sdr::{EntityRef, SensorRecord};
use crate::session::{DEFAULT_TIMEOUT, SessionFeatures};
use crate::topology::{Fru, Owner, Site, Topology};
use crate::types::{ChassisStatus, DeviceId, FanLevel, FanProperties, PowerLevel};

mod atca;
mod mtca;
mod nat;
mod server;
mod vadatech;

pub use atca::Atca;
pub use nat::Nat;
pub use server::Server;
pub use vadatech::Vadatech;

/// IANA enterprise numbers used for identification.
pub mod manufacturer {
    /// N.A.T. GmbH (MicroTCA MCH).
    pub const NAT: u32 = 0x00_6C78;
    /// Vadatech (MicroTCA MCH).
    pub const VADATECH: u32 = 0x00_5D32;
    /// Pigeon Point Systems (ATCA shelf manager).
    pub const PIGEON_POINT: u32 = 0x00_400A;
    /// Artesyn (ATCA shelf manager).
    pub const ARTESYN: u32 = 0x00_65CD;
    /// Super Micro Computer (server BMC).
    pub const SUPERMICRO: u32 = 0x00_2A7C;
    /// Dell (server BMC).
    pub const DELL: u32 = 0x00_02A2;
}

/// Platform family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// MicroTCA crate managed by an MCH.
    MicroTca,
    /// ATCA shelf managed by a shelf manager.
    Atca,
    /// Server with a single BMC.
    Server,
}

/// Container sizes for one device's topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    /// Maximum FRU records.
    pub max_frus: usize,
    /// Maximum management controller records.
    pub max_mcs: usize,
    /// Maximum sensor records.
    pub max_sensors: usize,
    /// Size of the lookup-id table (ids `0..lookup_ids`).
    pub lookup_ids: usize,
    /// Maximum instances of one sensor type on one FRU.
    pub max_sensor_instances: usize,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            max_frus: 256,
            max_mcs: 64,
            max_sensors: 1024,
            lookup_ids: 256,
            max_sensor_instances: 32,
        }
    }
}

/// Family-specific behavior behind a uniform interface.
pub trait PlatformAdapter: core::fmt::Debug + Send + Sync {
    /// Family this adapter serves.
    fn family(&self) -> Family;

    /// Vendor name for logs.
    fn name(&self) -> &'static str;

    /// Route to the controller at `address`.
    fn route(&self, address: u8, lun: u8) -> Route {
        if address == BMC_ADDR {
            Route::Direct { lun }
        } else {
            Route::Bridged {
                channel: 0,
                target: address,
                lun,
            }
        }
    }

    /// How bridged requests are answered.
    fn bridge_reply(&self) -> BridgeReply {
        BridgeReply::Combined
    }

    /// Replies may arrive with non-monotonic session sequences.
    fn tolerates_nonmonotonic_seq(&self) -> bool {
        false
    }

    /// Per-request timeout.
    fn timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    /// Lookup id whose sensors are never published.
    fn reserved_lookup_id(&self) -> Option<usize> {
        None
    }

    /// The repository's FRU locators are ignored and one baseboard FRU is
    /// synthesized in their place.
    fn baseboard_fru_only(&self) -> bool {
        false
    }

    /// Session behaviors derived from the flags above.
    fn session_features(&self) -> SessionFeatures {
        SessionFeatures {
            bridge_reply: self.bridge_reply(),
            tolerate_nonmonotonic_seq: self.tolerates_nonmonotonic_seq(),
        }
    }

    /// Container sizes.
    fn size_limits(&self) -> SizeLimits {
        SizeLimits::default()
    }

    /// Fill in physical site information for every FRU.
    fn discover_sites(&self, _conn: &mut Connection, _topology: &mut Topology) -> Result<()> {
        Ok(())
    }

    /// Stable lookup id of a FRU, `None` if it gets none.
    fn fru_lookup_id(&self, fru: &Fru) -> Option<usize>;

    /// Read family-specific extras (fan bounds, power properties) into `fru`.
    fn supplement_fru(&self, _conn: &mut Connection, _fru: &mut Fru) -> Result<()> {
        Ok(())
    }

    /// Decide which FRU or controller owns a sensor.
    fn associate_sensor(&self, topology: &Topology, sensor: &SensorRecord) -> Owner {
        topology.default_owner(sensor)
    }

    /// Read chassis status.
    fn chassis_status(&self, _conn: &mut Connection) -> Result<ChassisStatus> {
        Err(Error::Unsupported("chassis status"))
    }

    /// Activate or deactivate a FRU.
    fn set_fru_activation(
        &self,
        _conn: &mut Connection,
        _fru: &Fru,
        _activate: bool,
    ) -> Result<()> {
        Err(Error::Unsupported("FRU activation"))
    }

    /// Read fan speed properties of a cooling unit.
    fn fan_properties(&self, _conn: &mut Connection, _fru: &Fru) -> Result<FanProperties> {
        Err(Error::Unsupported("fan properties"))
    }

    /// Read the current fan level of a cooling unit.
    fn fan_level(&self, _conn: &mut Connection, _fru: &Fru) -> Result<FanLevel> {
        Err(Error::Unsupported("fan level"))
    }

    /// Set the fan level of a cooling unit.
    fn set_fan_level(&self, _conn: &mut Connection, _fru: &Fru, _level: u8) -> Result<()> {
        Err(Error::Unsupported("set fan level"))
    }

    /// Read the power level of a FRU.
    fn power_level(&self, _conn: &mut Connection, _fru: &Fru) -> Result<PowerLevel> {
        Err(Error::Unsupported("power level"))
    }
}

/// The identified platform of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    /// MicroTCA crate with a Vadatech MCH.
    MicroTcaVadatech(Vadatech),
    /// MicroTCA crate with an N.A.T. MCH.
    MicroTcaNat(Nat),
    /// ATCA shelf.
    Atca(Atca),
    /// Server BMC.
    GenericServer(Server),
}

impl Platform {
    /// Match the manufacturer in `Get Device ID` against the known vendors.
    pub fn identify(id: &DeviceId) -> Result<Self> {
        let platform = match id.manufacturer_id {
            manufacturer::VADATECH => Self::MicroTcaVadatech(Vadatech),
            manufacturer::NAT => Self::MicroTcaNat(Nat),
            manufacturer::PIGEON_POINT | manufacturer::ARTESYN => Self::Atca(Atca),
            manufacturer::SUPERMICRO | manufacturer::DELL => Self::GenericServer(Server),
            _ => return Err(Error::Negotiation("unrecognized manufacturer")),
        };
        Ok(platform)
    }

    /// The adapter for this platform.
    pub fn adapter(&self) -> &(dyn PlatformAdapter + 'static) {
        match self {
            Self::MicroTcaVadatech(p) => p,
            Self::MicroTcaNat(p) => p,
            Self::Atca(p) => p,
            Self::GenericServer(p) => p,
        }
    }
}

impl core::ops::Deref for Platform {
    type Target = dyn PlatformAdapter;

    fn deref(&self) -> &Self::Target {
        self.adapter()
    }
}

/// PICMG command helpers shared by the MicroTCA and ATCA adapters.
pub(crate) mod picmg {
    use super::*;

    fn fru_route(adapter: &dyn PlatformAdapter, fru: &Fru) -> Route {
        adapter.route(fru.locator.address, fru.locator.lun)
    }

    pub(crate) fn set_fru_activation(
        adapter: &dyn PlatformAdapter,
        conn: &mut Connection,
        fru: &Fru,
        activate: bool,
    ) -> Result<()> {
        let cmd = SetFruActivation {
            fru_id: fru.locator.fru_id,
            activate,
        };
        conn.execute(&fru_route(adapter, fru), &cmd)
    }

    pub(crate) fn fan_properties(
        adapter: &dyn PlatformAdapter,
        conn: &mut Connection,
        fru: &Fru,
    ) -> Result<FanProperties> {
        let cmd = GetFanSpeedProperties {
            fru_id: fru.locator.fru_id,
        };
        conn.execute(&fru_route(adapter, fru), &cmd)
    }

    pub(crate) fn fan_level(
        adapter: &dyn PlatformAdapter,
        conn: &mut Connection,
        fru: &Fru,
    ) -> Result<FanLevel> {
        let cmd = GetFanLevel {
            fru_id: fru.locator.fru_id,
        };
        conn.execute(&fru_route(adapter, fru), &cmd)
    }

    pub(crate) fn set_fan_level(
        adapter: &dyn PlatformAdapter,
        conn: &mut Connection,
        fru: &Fru,
        level: u8,
    ) -> Result<()> {
        if let Some(fan) = &fru.fan {
            if level < fan.min_level || level > fan.max_level {
                return Err(Error::InvalidArgument("fan level outside the unit's range"));
            }
        }
        let cmd = SetFanLevel {
            fru_id: fru.locator.fru_id,
            level,
        };
        conn.execute(&fru_route(adapter, fru), &cmd)
    }

    pub(crate) fn power_level(
        adapter: &dyn PlatformAdapter,
        conn: &mut Connection,
        fru: &Fru,
    ) -> Result<PowerLevel> {
        let cmd = GetPowerLevel {
            fru_id: fru.locator.fru_id,
            power_type: PowerType::SteadyState,
        };
        conn.execute(&fru_route(adapter, fru), &cmd)
    }

    pub(crate) fn site(
        adapter: &dyn PlatformAdapter,
        conn: &mut Connection,
        fru: &Fru,
    ) -> Result<Site> {
        let cmd = GetAddressInfo {
            fru_id: fru.locator.fru_id,
        };
        let info = conn.execute(&adapter.route(BMC_ADDR, 0), &cmd)?;
        Ok(Site {
            number: info.site_number,
            site_type: info.site_type,
        })
    }

    /// Fan extras for cooling units, power extras for everything else that
    /// answers. A FRU that refuses is left without extras.
    pub(crate) fn supplement(
        adapter: &dyn PlatformAdapter,
        conn: &mut Connection,
        fru: &mut Fru,
        cooling_entity: u8,
        powered_entities: &[u8],
    ) -> Result<()> {
        let entity = fru.locator.entity_id;
        if entity == cooling_entity {
            fru.fan = Some(fan_properties(adapter, conn, fru)?);
        } else if powered_entities.contains(&entity) {
            fru.power = Some(power_level(adapter, conn, fru)?);
        }
        Ok(())
    }
}

/// Server BMCs answer `Get Chassis Status` directly.
pub(crate) fn direct_chassis_status(conn: &mut Connection) -> Result<ChassisStatus> {
    conn.execute(&Route::BMC, &GetChassisStatus)
}

/// Entity instance with the device-relative offset removed.
pub(crate) fn relative_instance(entity: EntityRef) -> u8 {
    if entity.instance >= 0x60 {
        entity.instance - 0x60
    } else {
        entity.instance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_id(manufacturer_id: u32) -> DeviceId {
        DeviceId {
            device_id: 0x20,
            device_revision: 1,
            firmware_major: 1,
            firmware_minor: 0,
            ipmi_version: 0x51,
            additional_support: 0xBF,
            manufacturer_id,
            product_id: 0,
        }
    }

    #[test]
    fn known_manufacturers_identify() {
        assert!(matches!(
            Platform::identify(&device_id(manufacturer::NAT)),
            Ok(Platform::MicroTcaNat(_))
        ));
        assert!(matches!(
            Platform::identify(&device_id(manufacturer::VADATECH)),
            Ok(Platform::MicroTcaVadatech(_))
        ));
        assert!(matches!(
            Platform::identify(&device_id(manufacturer::PIGEON_POINT)),
            Ok(Platform::Atca(_))
        ));
        assert!(matches!(
            Platform::identify(&device_id(manufacturer::DELL)),
            Ok(Platform::GenericServer(_))
        ));
    }

    #[test]
    fn unknown_manufacturer_aborts() {
        assert!(matches!(
            Platform::identify(&device_id(0x00_1234)),
            Err(Error::Negotiation(_))
        ));
    }

    #[test]
    fn bridging_depth_differs_between_mch_vendors() {
        let nat = Platform::MicroTcaNat(Nat);
        let vt = Platform::MicroTcaVadatech(Vadatech);
        assert_eq!(nat.route(0x72, 0).depth(), 1);
        assert_eq!(vt.route(0x72, 0).depth(), 2);
        assert_eq!(nat.route(BMC_ADDR, 0).depth(), 0);
        assert_eq!(vt.bridge_reply(), BridgeReply::AckThenReply);
        assert_eq!(vt.timeout(), Duration::from_millis(500));
        assert_eq!(nat.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn server_never_bridges() {
        let server = Platform::GenericServer(Server);
        assert_eq!(server.route(0x72, 0), Route::Direct { lun: 0 });
    }

    #[test]
    fn device_relative_instances_drop_offset() {
        assert_eq!(relative_instance(EntityRef { id: 0xC1, instance: 0x62 }), 2);
        assert_eq!(relative_instance(EntityRef { id: 0xC1, instance: 3 }), 3);
    }
}
