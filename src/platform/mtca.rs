//! Behavior shared by both MicroTCA MCH vendors.

use crate::client::Connection;
use crate::error::Result;
use crate::sdr::{EntityRef, SensorRecord, entity_id};
use crate::topology::{Fru, Owner, Site, Topology};

use super::{PlatformAdapter, SizeLimits, picmg, relative_instance};

/// MicroTCA site types.
pub(crate) mod site_type {
    pub(crate) const AMC: u8 = 0x07;
    pub(crate) const RTM: u8 = 0x09;
    pub(crate) const MCH: u8 = 0x0A;
    pub(crate) const POWER_MODULE: u8 = 0x0B;
    pub(crate) const COOLING_UNIT: u8 = 0x0D;
}

/// Lookup id 0 is the carrier's logical FRU; its sensors are not published.
pub(crate) const CARRIER_LOOKUP_ID: usize = 0;

pub(crate) fn size_limits() -> SizeLimits {
    SizeLimits {
        max_frus: 128,
        max_mcs: 32,
        max_sensors: 1024,
        lookup_ids: 128,
        max_sensor_instances: 32,
    }
}

/// Lookup id derived from a module's entity.
///
/// MCH 1-2 map to 3-4, AMC 1-12 to 5-16, cooling units to 40+, power
/// modules to 50+ and RTMs to 90+.
pub(crate) fn lookup_id_for_entity(entity: EntityRef) -> Option<usize> {
    let base = match entity.id {
        entity_id::MCH => 3,
        entity_id::AMC => 5,
        entity_id::COOLING_UNIT => 40,
        entity_id::POWER_MODULE => 50,
        entity_id::RTM => 90,
        _ => return None,
    };
    let instance = usize::from(relative_instance(entity));
    instance.checked_sub(1).map(|offset| base + offset)
}

/// Site derived from a module's entity.
pub(crate) fn site_for_entity(entity: EntityRef) -> Option<Site> {
    let site_type = match entity.id {
        entity_id::MCH => site_type::MCH,
        entity_id::AMC => site_type::AMC,
        entity_id::COOLING_UNIT => site_type::COOLING_UNIT,
        entity_id::POWER_MODULE => site_type::POWER_MODULE,
        entity_id::RTM => site_type::RTM,
        _ => return None,
    };
    Some(Site {
        number: relative_instance(entity),
        site_type,
    })
}

pub(crate) fn discover_sites(topology: &mut Topology) {
    for fru in topology.frus_mut() {
        fru.site = site_for_entity(fru.entity());
    }
}

/// Fan bounds for cooling units, power levels for AMCs and power modules.
pub(crate) fn supplement_fru(
    adapter: &dyn PlatformAdapter,
    conn: &mut Connection,
    fru: &mut Fru,
) -> Result<()> {
    picmg::supplement(
        adapter,
        conn,
        fru,
        entity_id::COOLING_UNIT,
        &[entity_id::AMC, entity_id::POWER_MODULE],
    )
}

/// Sensors on a module belong to the FRU that module's entity maps to.
pub(crate) fn associate_sensor(topology: &Topology, sensor: &SensorRecord) -> Owner {
    let entity = EntityRef {
        id: sensor.entity_id,
        instance: sensor.entity_instance,
    };
    lookup_id_for_entity(entity)
        .and_then(|id| topology.fru_index_for_lookup(id))
        .map(Owner::Fru)
        .unwrap_or_else(|| topology.default_owner(sensor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: u8, instance: u8) -> EntityRef {
        EntityRef { id, instance }
    }

    #[test]
    fn module_lookup_ids() {
        assert_eq!(lookup_id_for_entity(entity(entity_id::MCH, 1)), Some(3));
        assert_eq!(lookup_id_for_entity(entity(entity_id::MCH, 0x62)), Some(4));
        assert_eq!(lookup_id_for_entity(entity(entity_id::AMC, 0x61)), Some(5));
        assert_eq!(lookup_id_for_entity(entity(entity_id::AMC, 12)), Some(16));
        assert_eq!(lookup_id_for_entity(entity(entity_id::COOLING_UNIT, 2)), Some(41));
        assert_eq!(lookup_id_for_entity(entity(entity_id::POWER_MODULE, 1)), Some(50));
        assert_eq!(lookup_id_for_entity(entity(entity_id::RTM, 0x63)), Some(92));
    }

    #[test]
    fn unknown_entities_and_instance_zero_get_no_id() {
        assert_eq!(lookup_id_for_entity(entity(0x07, 1)), None);
        assert_eq!(lookup_id_for_entity(entity(entity_id::AMC, 0x60)), None);
    }

    #[test]
    fn sites_follow_entities() {
        let site = site_for_entity(entity(entity_id::AMC, 0x64)).expect("site");
        assert_eq!(site.number, 4);
        assert_eq!(site.site_type, site_type::AMC);
        assert!(site_for_entity(entity(0x07, 1)).is_none());
    }
}
