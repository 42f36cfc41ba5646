use crate::client::Connection;
use crate::error::Result;
use crate::protocol::{BMC_ADDR, Route};
use crate::sdr::SensorRecord;
use crate::topology::{Fru, Owner, Topology};
use crate::types::{ChassisStatus, FanLevel, FanProperties, PowerLevel};

use super::{Family, PlatformAdapter, SizeLimits, direct_chassis_status, mtca, picmg};

/// IPMB-L channel of the NAT MCH.
const IPMB_L: u8 = 7;

/// N.A.T. MCH.
///
/// Module controllers are one hop away on IPMB-L and FRU ids are already
/// stable, so they double as lookup ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Nat;

impl PlatformAdapter for Nat {
    fn family(&self) -> Family {
        Family::MicroTca
    }

    fn name(&self) -> &'static str {
        "nat"
    }

    fn route(&self, address: u8, lun: u8) -> Route {
        if address == BMC_ADDR {
            return Route::Direct { lun };
        }
        Route::Bridged {
            channel: IPMB_L,
            target: address,
            lun,
        }
    }

    fn reserved_lookup_id(&self) -> Option<usize> {
        Some(mtca::CARRIER_LOOKUP_ID)
    }

    fn size_limits(&self) -> SizeLimits {
        mtca::size_limits()
    }

    fn discover_sites(&self, _conn: &mut Connection, topology: &mut Topology) -> Result<()> {
        mtca::discover_sites(topology);
        Ok(())
    }

    fn fru_lookup_id(&self, fru: &Fru) -> Option<usize> {
        Some(usize::from(fru.locator.fru_id))
    }

    fn supplement_fru(&self, conn: &mut Connection, fru: &mut Fru) -> Result<()> {
        mtca::supplement_fru(self, conn, fru)
    }

    fn associate_sensor(&self, topology: &Topology, sensor: &SensorRecord) -> Owner {
        mtca::associate_sensor(topology, sensor)
    }

    fn chassis_status(&self, conn: &mut Connection) -> Result<ChassisStatus> {
        direct_chassis_status(conn)
    }

    fn set_fru_activation(&self, conn: &mut Connection, fru: &Fru, activate: bool) -> Result<()> {
        picmg::set_fru_activation(self, conn, fru, activate)
    }

    fn fan_properties(&self, conn: &mut Connection, fru: &Fru) -> Result<FanProperties> {
        picmg::fan_properties(self, conn, fru)
    }

    fn fan_level(&self, conn: &mut Connection, fru: &Fru) -> Result<FanLevel> {
        picmg::fan_level(self, conn, fru)
    }

    fn set_fan_level(&self, conn: &mut Connection, fru: &Fru, level: u8) -> Result<()> {
        picmg::set_fan_level(self, conn, fru, level)
    }

    fn power_level(&self, conn: &mut Connection, fru: &Fru) -> Result<PowerLevel> {
        picmg::power_level(self, conn, fru)
    }
}
