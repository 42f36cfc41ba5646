use std::time::Duration;

use crate::client::Connection;
use crate::error::Result;
use crate::protocol::{BMC_ADDR, BridgeReply, Route};
use crate::sdr::SensorRecord;
use crate::topology::{Fru, Owner, Topology};
use crate::types::{ChassisStatus, FanLevel, FanProperties, PowerLevel};

use super::{Family, PlatformAdapter, SizeLimits, direct_chassis_status, mtca, picmg};

/// Address of the carrier manager inside the Vadatech MCH.
const CARRIER_MANAGER: u8 = 0x82;

/// IPMB-L channel behind the carrier manager.
const IPMB_L: u8 = 7;

/// Vadatech MCH.
///
/// Module controllers sit two hops away (MCH, carrier manager, module),
/// every bridged request is acknowledged before its reply arrives, and the
/// session sequence of replies is not always monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vadatech;

impl PlatformAdapter for Vadatech {
    fn family(&self) -> Family {
        Family::MicroTca
    }

    fn name(&self) -> &'static str {
        "vadatech"
    }

    fn route(&self, address: u8, lun: u8) -> Route {
        if address == BMC_ADDR {
            return Route::Direct { lun };
        }
        Route::DoubleBridged {
            channel: 0,
            transit: CARRIER_MANAGER,
            transit_channel: IPMB_L,
            target: address,
            lun,
        }
    }

    fn bridge_reply(&self) -> BridgeReply {
        BridgeReply::AckThenReply
    }

    fn tolerates_nonmonotonic_seq(&self) -> bool {
        true
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(500)
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
        if fru.locator.address == BMC_ADDR && fru.locator.fru_id == 0 {
            return Some(mtca::CARRIER_LOOKUP_ID);
        }
        mtca::lookup_id_for_entity(fru.entity())
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
