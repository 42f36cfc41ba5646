use crate::client::Connection;
use crate::error::Result;
use crate::protocol::Route;
use crate::sdr::SensorRecord;
use crate::topology::{Fru, Owner, Topology};
use crate::types::ChassisStatus;

use super::{Family, PlatformAdapter, SizeLimits, direct_chassis_status};

/// Server BMC.
///
/// The repository describes no FRUs worth tracking: discovery synthesizes
/// one baseboard FRU with lookup id 0 and every sensor belongs to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Server;

impl PlatformAdapter for Server {
    fn family(&self) -> Family {
        Family::Server
    }

    fn name(&self) -> &'static str {
        "server"
    }

    fn route(&self, _address: u8, lun: u8) -> Route {
        Route::Direct { lun }
    }

    fn size_limits(&self) -> SizeLimits {
        SizeLimits {
            max_frus: 1,
            max_mcs: 8,
            max_sensors: 512,
            lookup_ids: 1,
            max_sensor_instances: 64,
        }
    }

    fn baseboard_fru_only(&self) -> bool {
        true
    }

    fn fru_lookup_id(&self, _fru: &Fru) -> Option<usize> {
        Some(0)
    }

    fn associate_sensor(&self, topology: &Topology, _sensor: &SensorRecord) -> Owner {
        topology
            .fru_index_for_lookup(0)
            .map(Owner::Fru)
            .unwrap_or(Owner::None)
    }

    fn chassis_status(&self, conn: &mut Connection) -> Result<ChassisStatus> {
        direct_chassis_status(conn)
    }
}
