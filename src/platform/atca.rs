use crate::client::Connection;
use crate::error::Result;
use crate::sdr::{EntityRef, entity_id};
use crate::topology::{Fru, Topology};
use crate::types::{FanLevel, FanProperties, PowerLevel};

use super::{Family, PlatformAdapter, picmg, relative_instance};

/// ATCA shelf manager.
///
/// Boards are bridged once over IPMB-0 and report their physical site
/// through PICMG `Get Address Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Atca;

/// Lookup id derived from an ATCA entity.
///
/// Front boards 1-16 map to 1-16, shelf managers to 20+, fan trays to 30+,
/// power entry modules to 40+, shelf FRUs to 50+, RTMs to 60+ and AMCs to
/// 100+.
fn lookup_id_for_entity(entity: EntityRef) -> Option<usize> {
    let base = match entity.id {
        entity_id::FRONT_BOARD => 1,
        entity_id::SHELF_MANAGER => 20,
        entity_id::COOLING_UNIT => 30,
        entity_id::POWER_MODULE => 40,
        entity_id::SHELF_FRU => 50,
        entity_id::RTM => 60,
        entity_id::AMC => 100,
        _ => return None,
    };
    let instance = usize::from(relative_instance(entity));
    instance.checked_sub(1).map(|offset| base + offset)
}

impl PlatformAdapter for Atca {
    fn family(&self) -> Family {
        Family::Atca
    }

    fn name(&self) -> &'static str {
        "atca"
    }

    fn discover_sites(&self, conn: &mut Connection, topology: &mut Topology) -> Result<()> {
        for fru in topology.frus_mut() {
            match picmg::site(self, conn, fru) {
                Ok(site) => fru.site = Some(site),
                Err(err) => tracing::debug!(
                    device = %conn.name(),
                    address = fru.locator.address,
                    fru_id = fru.locator.fru_id,
                    error = %err,
                    "no site information"
                ),
            }
        }
        Ok(())
    }

    fn fru_lookup_id(&self, fru: &Fru) -> Option<usize> {
        lookup_id_for_entity(fru.entity())
    }

    fn supplement_fru(&self, conn: &mut Connection, fru: &mut Fru) -> Result<()> {
        picmg::supplement(
            self,
            conn,
            fru,
            entity_id::COOLING_UNIT,
            &[entity_id::FRONT_BOARD, entity_id::AMC],
        )
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shelf_lookup_ids() {
        let board = EntityRef {
            id: entity_id::FRONT_BOARD,
            instance: 0x65,
        };
        assert_eq!(lookup_id_for_entity(board), Some(5));
        let fan = EntityRef {
            id: entity_id::COOLING_UNIT,
            instance: 2,
        };
        assert_eq!(lookup_id_for_entity(fan), Some(31));
        let shelf = EntityRef {
            id: entity_id::SHELF_FRU,
            instance: 1,
        };
        assert_eq!(lookup_id_for_entity(shelf), Some(50));
    }
}
