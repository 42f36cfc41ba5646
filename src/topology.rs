//! Topology discovery.
//!
//! A discovery pass reads the controller's repositories and FRU inventories
//! into a fresh [`Topology`]. Nothing is updated in place: the caller swaps
//! the finished topology in under the device lock, so readers never see a
//! half-built one.

use std::collections::{BTreeMap, HashSet};

use crate::client::Connection;
use crate::commands::{
    GetDeviceId, GetDeviceSdr, GetDeviceSdrInfo, GetFruInventoryAreaInfo, GetSdr,
    GetSdrRepositoryInfo, GetSensorReading, ReadFruData, Repository, ReserveDeviceSdrRepository,
    ReserveSdrRepository, SdrChunk, SdrRead,
};
use crate::convert::{Severity, Thresholds, convert};
use crate::error::{Error, Result};
use crate::fru::FruInventory;
use crate::platform::{Platform, PlatformAdapter, SizeLimits};
use crate::protocol::{BMC_ADDR, Route};
use crate::sdr::{
    EntityAssociation, EntityRef, FruLocator, McLocator, RecordId, SDR_HEADER_LEN, SdrHeader,
    SdrRecord, SensorRecord,
};
use crate::types::{
    DeviceId, FanProperties, FruAreaInfo, PowerLevel, RepositoryInfo, SensorReading,
    completion_code,
};

/// Largest SDR slice requested at once.
const SDR_CHUNK: usize = 22;
/// Largest FRU inventory slice requested at once.
const FRU_CHUNK: usize = 16;
/// Reads allowed per FRU inventory.
const MAX_FRU_READS: usize = 50;
/// Attempts per SDR read when the reservation keeps getting canceled.
const RESERVE_ATTEMPTS: usize = 3;
/// Entity id of the synthesized server baseboard FRU.
const SYSTEM_BOARD: u8 = 0x07;

/// Physical location of a FRU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Site {
    /// Site number.
    pub number: u8,
    /// PICMG site type.
    pub site_type: u8,
}

/// What a sensor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Owner {
    /// Index into [`Topology::frus`].
    Fru(usize),
    /// Index into [`Topology::controllers`].
    Controller(usize),
    /// Nothing matched.
    #[default]
    None,
}

/// Identity of a FRU across rediscoveries. The FRU id is left out: some
/// platforms reassign it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FruKey {
    /// Controller address.
    pub address: u8,
    /// Controller LUN.
    pub lun: u8,
    /// Channel.
    pub channel: u8,
    /// Entity.
    pub entity_id: u8,
    /// Entity instance.
    pub instance: u8,
}

/// Identity of a sensor across rediscoveries. The record id is left out:
/// controllers may reassign it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SensorKey {
    /// Owner address.
    pub owner: u8,
    /// Owner LUN.
    pub lun: u8,
    /// Sensor number.
    pub number: u8,
    /// Entity.
    pub entity_id: u8,
    /// Entity instance.
    pub instance: u8,
}

/// A field-replaceable unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fru {
    /// Locator record (synthesized for controllers and server baseboards).
    pub locator: FruLocator,
    /// Platform-stable id, `None` if the platform assigns none.
    pub lookup_id: Option<usize>,
    /// Inventory area size.
    pub area: Option<FruAreaInfo>,
    /// Decoded inventory.
    pub inventory: Option<FruInventory>,
    /// Fan bounds (cooling units only).
    pub fan: Option<FanProperties>,
    /// Power properties.
    pub power: Option<PowerLevel>,
    /// Physical site.
    pub site: Option<Site>,
    /// Entities contained in this FRU.
    pub associated: Vec<EntityRef>,
}

impl Fru {
    fn new(locator: FruLocator) -> Self {
        Self {
            locator,
            ..Self::default()
        }
    }

    fn for_controller(mc: &McLocator) -> Self {
        Self::new(FruLocator {
            record_id: mc.record_id,
            address: mc.address,
            fru_id: 0,
            logical: true,
            lun: 0,
            channel: mc.channel,
            device_type: 0x10,
            entity_id: mc.entity_id,
            entity_instance: mc.entity_instance,
            id: mc.id.clone(),
        })
    }

    fn baseboard(device_id: &DeviceId) -> Self {
        Self::new(FruLocator {
            record_id: 0,
            address: BMC_ADDR,
            fru_id: 0,
            logical: true,
            lun: 0,
            channel: 0,
            device_type: 0x10,
            entity_id: SYSTEM_BOARD,
            entity_instance: 1,
            id: format!("BMC {:06x}", device_id.manufacturer_id),
        })
    }

    /// Entity of this FRU.
    pub fn entity(&self) -> EntityRef {
        EntityRef {
            id: self.locator.entity_id,
            instance: self.locator.entity_instance,
        }
    }

    /// Identity key.
    pub fn key(&self) -> FruKey {
        FruKey {
            address: self.locator.address,
            lun: self.locator.lun,
            channel: self.locator.channel,
            entity_id: self.locator.entity_id,
            instance: self.locator.entity_instance,
        }
    }
}

/// A management controller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ManagementController {
    /// Locator record.
    pub locator: McLocator,
    /// Device SDR repository info, if it was read.
    pub repository: Option<RepositoryInfo>,
    /// Entities contained in this controller.
    pub associated: Vec<EntityRef>,
}

/// A sensor plus its most recent reading.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sensor {
    /// Decoded record.
    pub record: SensorRecord,
    /// Owning FRU or controller.
    pub owner: Owner,
    /// Instance among sensors of the same type on the owning FRU.
    pub instance: Option<usize>,
    /// Last raw reading.
    pub raw: Option<u8>,
    /// Last converted reading.
    pub value: Option<f64>,
    /// Alarm raised by the last reading.
    pub severity: Option<Severity>,
    /// The last reading is usable.
    pub valid: bool,
    /// The controller reported the sensor not present; it is no longer read.
    pub unavailable: bool,
    thresholds: Option<Thresholds>,
}

impl Sensor {
    fn new(record: SensorRecord) -> Self {
        Self {
            record,
            ..Self::default()
        }
    }

    /// Identity key.
    pub fn key(&self) -> SensorKey {
        let r = &self.record;
        SensorKey {
            owner: r.owner,
            lun: r.lun,
            number: r.number,
            entity_id: r.entity_id,
            instance: r.entity_instance,
        }
    }

    /// Index of the owning FRU.
    pub fn fru_index(&self) -> Option<usize> {
        match self.owner {
            Owner::Fru(i) => Some(i),
            _ => None,
        }
    }

    /// Index of the owning controller.
    pub fn mgmt_index(&self) -> Option<usize> {
        match self.owner {
            Owner::Controller(i) => Some(i),
            _ => None,
        }
    }

    /// Converted thresholds, computed on first use.
    pub fn thresholds(&mut self) -> Thresholds {
        *self
            .thresholds
            .get_or_insert_with(|| Thresholds::from_sensor(&self.record))
    }

    /// Apply a fresh reading.
    pub fn update(&mut self, reading: SensorReading) {
        if reading.unavailable || !reading.scanning_enabled {
            self.valid = false;
            return;
        }
        let value = convert(&self.record, reading.raw);
        self.raw = Some(reading.raw);
        self.value = Some(value);
        self.severity = if self.record.is_analog() {
            self.thresholds().classify(value)
        } else {
            None
        };
        self.valid = true;
    }

    /// Mark the last reading unusable.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

/// Everything discovered about one device.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    limits: SizeLimits,
    device_id: Option<DeviceId>,
    repository: RepositoryInfo,
    frus: Vec<Fru>,
    controllers: Vec<ManagementController>,
    sensors: Vec<Sensor>,
    associations: Vec<EntityAssociation>,
    fru_lookup: Vec<Option<usize>>,
    sensor_lookup: BTreeMap<(usize, u8, usize), usize>,
}

impl Topology {
    /// An empty topology sized by `limits`.
    pub fn new(limits: SizeLimits) -> Self {
        Self {
            limits,
            fru_lookup: vec![None; limits.lookup_ids],
            ..Self::default()
        }
    }

    /// Whether nothing has been discovered.
    pub fn is_empty(&self) -> bool {
        self.frus.is_empty() && self.sensors.is_empty() && self.controllers.is_empty()
    }

    /// Size limits this topology was built with.
    pub fn limits(&self) -> SizeLimits {
        self.limits
    }

    /// `Get Device ID` reply of the LAN-attached controller.
    pub fn device_id(&self) -> Option<&DeviceId> {
        self.device_id.as_ref()
    }

    /// Primary repository info at discovery time.
    pub fn repository(&self) -> RepositoryInfo {
        self.repository
    }

    /// All FRUs.
    pub fn frus(&self) -> &[Fru] {
        &self.frus
    }

    /// All FRUs, mutable.
    pub fn frus_mut(&mut self) -> &mut [Fru] {
        &mut self.frus
    }

    /// All management controllers.
    pub fn controllers(&self) -> &[ManagementController] {
        &self.controllers
    }

    /// All sensors.
    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    /// All sensors, mutable.
    pub fn sensors_mut(&mut self) -> &mut [Sensor] {
        &mut self.sensors
    }

    /// Entity association records as read.
    pub fn associations(&self) -> &[EntityAssociation] {
        &self.associations
    }

    /// Lookup-id table: entry `i` is the FRU index with lookup id `i`.
    pub fn fru_lookup_table(&self) -> &[Option<usize>] {
        &self.fru_lookup
    }

    /// Sensor table keyed by (FRU index, sensor type, instance).
    pub fn sensor_lookup_table(&self) -> &BTreeMap<(usize, u8, usize), usize> {
        &self.sensor_lookup
    }

    /// FRU index with lookup id `lookup_id`.
    pub fn fru_index_for_lookup(&self, lookup_id: usize) -> Option<usize> {
        self.fru_lookup.get(lookup_id).copied().flatten()
    }

    /// FRU with lookup id `lookup_id`.
    pub fn fru(&self, lookup_id: usize) -> Option<&Fru> {
        self.fru_index_for_lookup(lookup_id)
            .and_then(|i| self.frus.get(i))
    }

    /// Sensor index for (FRU lookup id, sensor type, instance).
    pub fn sensor_index(
        &self,
        lookup_id: usize,
        sensor_type: u8,
        instance: usize,
    ) -> Option<usize> {
        let fru = self.fru_index_for_lookup(lookup_id)?;
        self.sensor_lookup.get(&(fru, sensor_type, instance)).copied()
    }

    /// Sensor for (FRU lookup id, sensor type, instance).
    pub fn sensor(&self, lookup_id: usize, sensor_type: u8, instance: usize) -> Option<&Sensor> {
        self.sensor_index(lookup_id, sensor_type, instance)
            .and_then(|i| self.sensors.get(i))
    }

    /// Owner chosen when the platform has no better idea.
    ///
    /// Tried in order: a FRU with the sensor's entity on the sensor's
    /// controller, a FRU containing the sensor's entity, any FRU with the
    /// sensor's entity, the controller owning the sensor.
    pub fn default_owner(&self, sensor: &SensorRecord) -> Owner {
        let entity = EntityRef {
            id: sensor.entity_id,
            instance: sensor.entity_instance,
        };
        let on_controller = self
            .frus
            .iter()
            .position(|f| f.entity() == entity && f.locator.address == sensor.owner);
        let containing = || self.frus.iter().position(|f| f.associated.contains(&entity));
        let anywhere = || self.frus.iter().position(|f| f.entity() == entity);
        if let Some(i) = on_controller.or_else(containing).or_else(anywhere) {
            return Owner::Fru(i);
        }
        self.controllers
            .iter()
            .position(|mc| mc.locator.address == sensor.owner)
            .map(Owner::Controller)
            .unwrap_or(Owner::None)
    }

    /// Mark every sensor reading unusable.
    pub fn invalidate_sensors(&mut self) {
        for sensor in &mut self.sensors {
            sensor.invalidate();
        }
    }
}

/// Result of a discovery pass.
#[derive(Debug, Clone)]
pub struct Discovery {
    /// Identified platform.
    pub platform: Platform,
    /// Discovered topology.
    pub topology: Topology,
}

/// Run a full discovery pass.
///
/// Session, identification and primary repository failures abort the pass.
/// Anything else is logged and skipped.
pub fn discover(conn: &mut Connection) -> Result<Discovery> {
    if !conn.session().is_active() {
        conn.open()?;
    }

    let device_id = conn.execute(&Route::BMC, &GetDeviceId)?;
    let platform = Platform::identify(&device_id)?;
    conn.configure(platform.timeout(), platform.session_features());
    tracing::info!(
        device = %conn.name(),
        platform = platform.name(),
        manufacturer_id = device_id.manufacturer_id,
        product_id = device_id.product_id,
        "platform identified"
    );

    let mut topology = Topology::new(platform.size_limits());
    topology.device_id = Some(device_id);

    let mut builder = Builder {
        conn,
        adapter: platform.adapter(),
        topology,
        sensor_keys: HashSet::new(),
        fru_keys: HashSet::new(),
    };
    builder.read_primary_repository()?;
    builder.read_controller_repositories()?;
    builder.assign_lookup_ids();
    builder.resolve_associations();
    builder.read_inventories();
    builder.supplement();
    builder.publish_sensors();

    let topology = builder.topology;
    tracing::info!(
        device = %conn.name(),
        frus = topology.frus.len(),
        controllers = topology.controllers.len(),
        sensors = topology.sensors.len(),
        "discovery complete"
    );
    Ok(Discovery { platform, topology })
}

/// Whether the primary repository changed since `topology` was built.
pub fn repository_changed(conn: &mut Connection, topology: &Topology) -> Result<bool> {
    let info = conn.execute(&Route::BMC, &GetSdrRepositoryInfo)?;
    Ok(info.changed_since(&topology.repository))
}

/// Outcome of one sensor scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanSummary {
    /// Sensors read successfully.
    pub read: usize,
    /// Sensors whose read failed.
    pub failed: usize,
    /// Sensors skipped or newly marked as not present.
    pub unavailable: usize,
}

/// Refresh the reading of every sensor.
pub fn scan_sensors(
    conn: &mut Connection,
    adapter: &dyn PlatformAdapter,
    topology: &mut Topology,
) -> ScanSummary {
    let mut summary = ScanSummary::default();
    for sensor in &mut topology.sensors {
        if sensor.unavailable {
            summary.unavailable += 1;
            continue;
        }
        let route = adapter.route(sensor.record.owner, sensor.record.lun);
        let cmd = GetSensorReading {
            sensor_number: sensor.record.number,
        };
        match conn.execute(&route, &cmd) {
            Ok(reading) => {
                sensor.update(reading);
                summary.read += 1;
            }
            Err(err) if err.completion_code() == Some(completion_code::NOT_PRESENT) => {
                tracing::debug!(
                    device = %conn.name(),
                    owner = sensor.record.owner,
                    sensor = sensor.record.number,
                    "sensor not present, no longer read"
                );
                sensor.unavailable = true;
                sensor.invalidate();
                summary.unavailable += 1;
            }
            Err(err) => {
                tracing::debug!(
                    device = %conn.name(),
                    owner = sensor.record.owner,
                    sensor = sensor.record.number,
                    error = %err,
                    "sensor read failed"
                );
                sensor.invalidate();
                summary.failed += 1;
            }
        }
    }
    summary
}

/// Reads one SDR repository record by record.
struct RepositoryReader<'a> {
    conn: &'a mut Connection,
    route: Route,
    repository: Repository,
    reservation: u16,
}

impl RepositoryReader<'_> {
    fn info(&mut self) -> Result<RepositoryInfo> {
        match self.repository {
            Repository::Primary => self.conn.execute(&self.route, &GetSdrRepositoryInfo),
            Repository::Device => self.conn.execute(&self.route, &GetDeviceSdrInfo),
        }
    }

    fn reserve(&mut self) -> Result<()> {
        self.reservation = match self.repository {
            Repository::Primary => self.conn.execute(&self.route, &ReserveSdrRepository)?,
            Repository::Device => self.conn.execute(&self.route, &ReserveDeviceSdrRepository)?,
        };
        Ok(())
    }

    /// Read `count` bytes at `offset` of a record, re-reserving when the
    /// reservation was canceled.
    fn chunk(&mut self, record_id: u16, offset: usize, count: usize) -> Result<SdrChunk> {
        let offset =
            u8::try_from(offset).map_err(|_| Error::Decode("SDR longer than 255 bytes"))?;
        let count = u8::try_from(count).map_err(|_| Error::Decode("SDR chunk too large"))?;
        let mut attempt = 0;
        loop {
            let read = SdrRead {
                reservation: self.reservation,
                record_id,
                offset,
                count,
            };
            let result = match self.repository {
                Repository::Primary => self.conn.execute(&self.route, &GetSdr(read)),
                Repository::Device => self.conn.execute(&self.route, &GetDeviceSdr(read)),
            };
            attempt += 1;
            match result {
                Err(err)
                    if err.completion_code() == Some(completion_code::RESERVATION_CANCELED)
                        && attempt < RESERVE_ATTEMPTS =>
                {
                    tracing::debug!(device = %self.conn.name(), record_id, "reservation canceled");
                    self.reserve()?;
                }
                other => return other,
            }
        }
    }

    /// Read one record: its header first, then the body in slices.
    fn record(&mut self, record_id: u16) -> Result<(u16, Vec<u8>)> {
        let head = self.chunk(record_id, 0, SDR_HEADER_LEN)?;
        let header = SdrHeader::parse(&head.data)?;
        let len = header.record_len();

        let mut data = head.data;
        data.truncate(SDR_HEADER_LEN);
        while data.len() < len {
            let count = (len - data.len()).min(SDR_CHUNK);
            let chunk = self.chunk(record_id, data.len(), count)?;
            if chunk.data.is_empty() {
                return Err(Error::Decode("empty SDR slice"));
            }
            data.extend(chunk.data.into_iter().take(count));
        }
        Ok((head.next_record_id, data))
    }

    fn read_all(&mut self, max_records: usize) -> Result<Vec<Vec<u8>>> {
        self.reserve()?;
        let mut records = Vec::new();
        let mut visited = HashSet::new();
        let mut id = RecordId::FIRST;
        while !id.is_last() {
            if records.len() >= max_records {
                return Err(Error::Resource("repository holds too many records"));
            }
            visited.insert(id.value());
            let (next, data) = self.record(id.value())?;
            records.push(data);
            if visited.contains(&next) {
                tracing::warn!(device = %self.conn.name(), record_id = next, "record chain loops");
                break;
            }
            id = RecordId::new_raw(next);
        }
        Ok(records)
    }
}

struct Builder<'a> {
    conn: &'a mut Connection,
    adapter: &'a dyn PlatformAdapter,
    topology: Topology,
    sensor_keys: HashSet<SensorKey>,
    fru_keys: HashSet<FruKey>,
}

impl Builder<'_> {
    fn max_records(&self) -> usize {
        let l = self.topology.limits;
        l.max_sensors + l.max_frus + l.max_mcs + 256
    }

    fn reader(&mut self, route: Route, repository: Repository) -> RepositoryReader<'_> {
        RepositoryReader {
            conn: &mut *self.conn,
            route,
            repository,
            reservation: 0,
        }
    }

    fn read_primary_repository(&mut self) -> Result<()> {
        let max = self.max_records();
        let mut reader = self.reader(Route::BMC, Repository::Primary);
        let info = reader.info()?;
        let records = reader.read_all(max)?;
        self.topology.repository = info;
        tracing::debug!(
            device = %self.conn.name(),
            records = records.len(),
            "primary repository read"
        );
        self.ingest(records, BMC_ADDR)?;

        if self.adapter.baseboard_fru_only() {
            if let Some(id) = &self.topology.device_id {
                self.topology.frus = vec![Fru::baseboard(id)];
            }
        }
        Ok(())
    }

    /// Device repositories of satellite controllers, plus one FRU for each
    /// controller with FRU inventory.
    fn read_controller_repositories(&mut self) -> Result<()> {
        let max = self.max_records();
        let locators: Vec<McLocator> = self
            .topology
            .controllers
            .iter()
            .map(|mc| mc.locator.clone())
            .collect();

        for (index, mc) in locators.iter().enumerate() {
            if mc.address == BMC_ADDR {
                continue;
            }
            if mc.has_sensors() {
                let route = self.adapter.route(mc.address, 0);
                let mut reader = self.reader(route, Repository::Device);
                let result = reader.info().and_then(|info| Ok((info, reader.read_all(max)?)));
                match result {
                    Ok((info, records)) => {
                        self.topology.controllers[index].repository = Some(info);
                        self.ingest(records, mc.address)?;
                    }
                    Err(err) => tracing::warn!(
                        device = %self.conn.name(),
                        address = mc.address,
                        error = %err,
                        "device repository unreadable"
                    ),
                }
            }
            if mc.has_fru_inventory() && !self.adapter.baseboard_fru_only() {
                self.add_fru(Fru::for_controller(mc))?;
            }
        }
        Ok(())
    }

    fn ingest(&mut self, records: Vec<Vec<u8>>, source: u8) -> Result<()> {
        for data in records {
            match SdrRecord::parse(&data) {
                Ok(record) => self.add(record)?,
                Err(err) => tracing::warn!(
                    device = %self.conn.name(),
                    source,
                    error = %err,
                    "skipping undecodable record"
                ),
            }
        }
        Ok(())
    }

    fn add(&mut self, record: SdrRecord) -> Result<()> {
        match record {
            SdrRecord::FullSensor(s) | SdrRecord::CompactSensor(s) => {
                let sensor = Sensor::new(s);
                if !self.sensor_keys.insert(sensor.key()) {
                    tracing::trace!(record_id = sensor.record.record_id, "duplicate sensor");
                    return Ok(());
                }
                if self.topology.sensors.len() >= self.topology.limits.max_sensors {
                    return Err(Error::Resource("too many sensors"));
                }
                self.topology.sensors.push(sensor);
            }
            SdrRecord::FruLocator(locator) => {
                if self.adapter.baseboard_fru_only() {
                    return Ok(());
                }
                self.add_fru(Fru::new(locator))?;
            }
            SdrRecord::McLocator(locator) => {
                let duplicate = self.topology.controllers.iter().any(|mc| {
                    mc.locator.address == locator.address && mc.locator.channel == locator.channel
                });
                if duplicate {
                    return Ok(());
                }
                if self.topology.controllers.len() >= self.topology.limits.max_mcs {
                    return Err(Error::Resource("too many management controllers"));
                }
                self.topology.controllers.push(ManagementController {
                    locator,
                    ..ManagementController::default()
                });
            }
            SdrRecord::EntityAssociation(assoc) => {
                if !self.topology.associations.contains(&assoc) {
                    self.topology.associations.push(assoc);
                }
            }
            SdrRecord::Other {
                record_id,
                record_type,
            } => {
                tracing::trace!(record_id, record_type, "record type not used");
            }
        }
        Ok(())
    }

    fn add_fru(&mut self, fru: Fru) -> Result<()> {
        if !self.fru_keys.insert(fru.key()) {
            tracing::trace!(address = fru.locator.address, "duplicate FRU");
            return Ok(());
        }
        if self.topology.frus.len() >= self.topology.limits.max_frus {
            return Err(Error::Resource("too many FRUs"));
        }
        self.topology.frus.push(fru);
        Ok(())
    }

    fn assign_lookup_ids(&mut self) {
        let topology = &mut self.topology;
        for (index, fru) in topology.frus.iter_mut().enumerate() {
            let Some(id) = self.adapter.fru_lookup_id(fru) else {
                continue;
            };
            match topology.fru_lookup.get_mut(id) {
                Some(slot @ None) => {
                    *slot = Some(index);
                    fru.lookup_id = Some(id);
                }
                Some(Some(_)) => tracing::warn!(
                    device = %self.conn.name(),
                    lookup_id = id,
                    address = fru.locator.address,
                    fru_id = fru.locator.fru_id,
                    "lookup id already taken"
                ),
                None => tracing::warn!(
                    device = %self.conn.name(),
                    lookup_id = id,
                    "lookup id out of range"
                ),
            }
        }

        if let Err(err) = self.adapter.discover_sites(self.conn, &mut self.topology) {
            tracing::warn!(device = %self.conn.name(), error = %err, "site discovery failed");
        }
    }

    /// Attach association records to their containers. Linked records are
    /// followed as one chain; the first pass sizes each container's list,
    /// the second fills it.
    fn resolve_associations(&mut self) {
        let chains = self.chains();

        let mut containers = Vec::with_capacity(chains.len());
        let mut fru_counts = vec![0usize; self.topology.frus.len()];
        let mut mc_counts = vec![0usize; self.topology.controllers.len()];
        for chain in &chains {
            let Some(head) = chain.first().map(|&i| &self.topology.associations[i]) else {
                containers.push(Owner::None);
                continue;
            };
            let owner = self.container_of(head);
            let count: usize = chain
                .iter()
                .map(|&i| self.topology.associations[i].contained().len())
                .sum();
            match owner {
                Owner::Fru(i) => fru_counts[i] += count,
                Owner::Controller(i) => mc_counts[i] += count,
                Owner::None => tracing::debug!(
                    container_id = head.container.id,
                    container_instance = head.container.instance,
                    "association container not found"
                ),
            }
            containers.push(owner);
        }

        for (fru, count) in self.topology.frus.iter_mut().zip(fru_counts) {
            fru.associated = Vec::with_capacity(count);
        }
        for (mc, count) in self.topology.controllers.iter_mut().zip(mc_counts) {
            mc.associated = Vec::with_capacity(count);
        }

        for (chain, owner) in chains.iter().zip(containers) {
            let list = match owner {
                Owner::Fru(i) => &mut self.topology.frus[i].associated,
                Owner::Controller(i) => &mut self.topology.controllers[i].associated,
                Owner::None => continue,
            };
            for &i in chain {
                for entity in self.topology.associations[i].contained() {
                    if !list.contains(&entity) {
                        list.push(entity);
                    }
                }
            }
        }
    }

    /// Group association records into chains following the link flag.
    fn chains(&self) -> Vec<Vec<usize>> {
        let records = &self.topology.associations;
        let mut used = vec![false; records.len()];
        let mut chains = Vec::new();
        for start in 0..records.len() {
            if used[start] {
                continue;
            }
            used[start] = true;
            let mut chain = vec![start];
            let mut current = start;
            while records[current].linked {
                let next = (0..records.len()).find(|&j| {
                    !used[j]
                        && records[j].container == records[start].container
                        && records[j].device == records[start].device
                });
                let Some(next) = next else {
                    break;
                };
                used[next] = true;
                chain.push(next);
                current = next;
            }
            chains.push(chain);
        }
        chains
    }

    fn container_of(&self, assoc: &EntityAssociation) -> Owner {
        let frus = &self.topology.frus;
        let mcs = &self.topology.controllers;
        let fru = match assoc.device {
            Some((address, _)) => frus
                .iter()
                .position(|f| f.entity() == assoc.container && f.locator.address == address),
            None => frus.iter().position(|f| f.entity() == assoc.container),
        };
        if let Some(i) = fru {
            return Owner::Fru(i);
        }
        mcs.iter()
            .position(|mc| {
                let entity = EntityRef {
                    id: mc.locator.entity_id,
                    instance: mc.locator.entity_instance,
                };
                entity == assoc.container
                    && assoc.device.is_none_or(|(address, _)| address == mc.locator.address)
            })
            .map(Owner::Controller)
            .unwrap_or(Owner::None)
    }

    fn read_inventories(&mut self) {
        for index in 0..self.topology.frus.len() {
            let fru = &self.topology.frus[index];
            if fru.lookup_id.is_none() || !fru.locator.logical {
                continue;
            }
            let route = self.adapter.route(fru.locator.address, fru.locator.lun);
            let fru_id = fru.locator.fru_id;
            match read_inventory(self.conn, &route, fru_id) {
                Ok((area, image)) => {
                    let fru = &mut self.topology.frus[index];
                    fru.area = Some(area);
                    match FruInventory::parse(&image) {
                        Ok(inventory) => fru.inventory = Some(inventory),
                        Err(err) => tracing::warn!(
                            device = %self.conn.name(),
                            address = fru.locator.address,
                            fru_id,
                            error = %err,
                            "FRU inventory undecodable"
                        ),
                    }
                }
                Err(err) => tracing::debug!(
                    device = %self.conn.name(),
                    address = fru.locator.address,
                    fru_id,
                    error = %err,
                    "FRU inventory unreadable"
                ),
            }
        }
    }

    fn supplement(&mut self) {
        for fru in &mut self.topology.frus {
            if fru.lookup_id.is_none() {
                continue;
            }
            if let Err(err) = self.adapter.supplement_fru(self.conn, fru) {
                tracing::debug!(
                    device = %self.conn.name(),
                    address = fru.locator.address,
                    fru_id = fru.locator.fru_id,
                    error = %err,
                    "FRU extras unavailable"
                );
            }
        }

        let owners: Vec<Owner> = self
            .topology
            .sensors
            .iter()
            .map(|s| self.adapter.associate_sensor(&self.topology, &s.record))
            .collect();
        for (sensor, owner) in self.topology.sensors.iter_mut().zip(owners) {
            sensor.owner = owner;
        }
    }

    /// Number sensors per (FRU, sensor type) and fill the sensor table.
    fn publish_sensors(&mut self) {
        let reserved = self.adapter.reserved_lookup_id();
        let max_instances = self.topology.limits.max_sensor_instances;
        let mut next: BTreeMap<(usize, u8), usize> = BTreeMap::new();

        let topology = &mut self.topology;
        for (index, sensor) in topology.sensors.iter_mut().enumerate() {
            let Some(fru_index) = sensor.fru_index() else {
                continue;
            };
            let lookup_id = topology.frus.get(fru_index).and_then(|f| f.lookup_id);
            if lookup_id.is_none() || lookup_id == reserved {
                continue;
            }
            let counter = next.entry((fru_index, sensor.record.sensor_type)).or_default();
            if *counter >= max_instances {
                tracing::warn!(
                    sensor = sensor.record.number,
                    sensor_type = sensor.record.sensor_type,
                    "too many sensors of one type on a FRU"
                );
                continue;
            }
            sensor.instance = Some(*counter);
            topology
                .sensor_lookup
                .insert((fru_index, sensor.record.sensor_type, *counter), index);
            *counter += 1;
        }
    }
}

/// Read one FRU's inventory image: area size first, then sized slices until
/// the end, an "out of range" reply or the read cap.
fn read_inventory(
    conn: &mut Connection,
    route: &Route,
    fru_id: u8,
) -> Result<(FruAreaInfo, Vec<u8>)> {
    let area = conn.execute(route, &GetFruInventoryAreaInfo { fru_id })?;
    let size = usize::from(area.size);
    let mut image = Vec::with_capacity(size.min(FRU_CHUNK * MAX_FRU_READS));

    for _ in 0..MAX_FRU_READS {
        if image.len() >= size {
            break;
        }
        let Ok(offset) = u16::try_from(image.len()) else {
            break;
        };
        let count = (size - image.len()).min(FRU_CHUNK) as u8;
        match conn.execute(route, &ReadFruData { fru_id, offset, count }) {
            Ok(bytes) if bytes.is_empty() => break,
            Ok(bytes) => image.extend(bytes),
            Err(err) if err.completion_code() == Some(completion_code::PARAMETER_OUT_OF_RANGE) => {
                break;
            }
            Err(err) => {
                if image.is_empty() {
                    return Err(err);
                }
                tracing::debug!(
                    device = %conn.name(),
                    fru_id,
                    offset,
                    error = %err,
                    "FRU read stopped early"
                );
                break;
            }
        }
    }
    Ok((area, image))
}
