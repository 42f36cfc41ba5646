//! Managed devices and the registry that owns them.
//!
//! Every device keeps its connection, identified platform and topology
//! behind one lock. A status word readable without that lock publishes
//! online state, init phase and debug level, and a broadcast channel tells
//! the host when new data is ready.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::client::{ClientBuilder, Connection};
use crate::commands::ChassisControlCommand;
use crate::debug::DebugLevel;
use crate::error::{Error, Result};
use crate::platform::{Platform, PlatformAdapter};
use crate::protocol::{PresencePong, Route};
use crate::topology::{self, Discovery, Fru, ScanSummary, Topology};
use crate::transport::Transport;
use crate::types::{ChassisControl, ChassisStatus, FanLevel, PowerLevel};

/// Capacity of the event channel.
const EVENT_CAPACITY: usize = 64;

/// Bits of the per-device status word.
pub mod status {
    /// The controller answers presence pings.
    pub const ONLINE: u32 = 0x01;
    /// Init phase, see [`InitPhase`](super::InitPhase).
    pub const INIT_MASK: u32 = 0x06;
    pub(crate) const INIT_SHIFT: u32 = 1;
    /// Debug level `0..=3`.
    pub const DEBUG_MASK: u32 = 0x18;
    pub(crate) const DEBUG_SHIFT: u32 = 3;
}

/// Discovery progress of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitPhase {
    /// Discovery never ran or was reset.
    #[default]
    NotDone,
    /// Discovery is running.
    InProgress,
    /// The topology is current.
    Done,
    /// The last discovery pass failed.
    Failed,
}

impl InitPhase {
    fn bits(self) -> u32 {
        match self {
            Self::NotDone => 0,
            Self::InProgress => 1,
            Self::Done => 2,
            Self::Failed => 3,
        }
    }

    fn from_bits(bits: u32) -> Self {
        match bits & 0x03 {
            0 => Self::NotDone,
            1 => Self::InProgress,
            2 => Self::Done,
            _ => Self::Failed,
        }
    }
}

/// New data a host may want to pick up. Carries the device index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Online state changed.
    StatusChanged(usize),
    /// A discovery pass finished, successfully or not.
    InitDone(usize),
    /// A new topology was swapped in.
    FruTableChanged(usize),
    /// Sensor readings were refreshed.
    SensorScan(usize),
}

/// Sensor scan period shared by every device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanPeriod {
    /// 5 s.
    Seconds5,
    /// 10 s.
    #[default]
    Seconds10,
    /// 20 s.
    Seconds20,
    /// 30 s.
    Seconds30,
    /// 60 s.
    Seconds60,
}

impl ScanPeriod {
    /// Period for a value in seconds; only 5, 10, 20, 30 and 60 are allowed.
    pub fn from_secs(secs: u64) -> Result<Self> {
        Ok(match secs {
            5 => Self::Seconds5,
            10 => Self::Seconds10,
            20 => Self::Seconds20,
            30 => Self::Seconds30,
            60 => Self::Seconds60,
            _ => return Err(Error::InvalidArgument("scan period must be 5, 10, 20, 30 or 60 s")),
        })
    }

    /// Length in seconds.
    pub fn as_secs(self) -> u64 {
        match self {
            Self::Seconds5 => 5,
            Self::Seconds10 => 10,
            Self::Seconds20 => 20,
            Self::Seconds30 => 30,
            Self::Seconds60 => 60,
        }
    }

    /// Length as a [`Duration`].
    pub fn duration(self) -> Duration {
        Duration::from_secs(self.as_secs())
    }
}

/// Settings for one managed controller.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    name: String,
    builder: ClientBuilder,
}

impl DeviceConfig {
    /// Device `name` reached at `target` with default session settings.
    pub fn new(name: impl Into<String>, target: SocketAddr) -> Self {
        let name = name.into();
        let builder = ClientBuilder::new(target).name(name.clone());
        Self { name, builder }
    }

    /// Replace the session settings. The builder's name is overridden.
    pub fn with_builder(mut self, builder: ClientBuilder) -> Self {
        self.builder = builder.name(self.name.clone());
        self
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Everything guarded by a device's lock.
#[derive(Debug)]
pub struct DeviceState {
    /// Connection to the controller.
    pub connection: Connection,
    /// Identified platform, `None` before the first successful discovery.
    pub platform: Option<Platform>,
    /// Current topology.
    pub topology: Topology,
}

impl DeviceState {
    /// Adapter, connection and the FRU with `lookup_id`.
    fn fru_parts(
        &mut self,
        lookup_id: usize,
    ) -> Result<(&dyn PlatformAdapter, &mut Connection, &Fru)> {
        let adapter = adapter_of(&self.platform)?;
        let fru = self
            .topology
            .fru(lookup_id)
            .ok_or(Error::InvalidArgument("no FRU with that lookup id"))?;
        Ok((adapter, &mut self.connection, fru))
    }
}

fn adapter_of(platform: &Option<Platform>) -> Result<&(dyn PlatformAdapter + 'static)> {
    platform
        .as_ref()
        .map(Platform::adapter)
        .ok_or(Error::Unsupported("platform not identified"))
}

/// One managed controller.
#[derive(Debug)]
pub struct Device {
    name: String,
    index: usize,
    status: AtomicU32,
    config_check: AtomicBool,
    state: Mutex<DeviceState>,
    events: broadcast::Sender<DeviceEvent>,
}

impl Device {
    fn new(index: usize, connection: Connection, events: broadcast::Sender<DeviceEvent>) -> Self {
        let debug = connection.debug_level();
        let device = Self {
            name: connection.name().to_owned(),
            index,
            status: AtomicU32::new(0),
            config_check: AtomicBool::new(false),
            state: Mutex::new(DeviceState {
                connection,
                platform: None,
                topology: Topology::default(),
            }),
            events,
        };
        device.store_debug(debug);
        device
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position in the registry.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw status word, see [`status`].
    pub fn status_bits(&self) -> u32 {
        self.status.load(Ordering::Acquire)
    }

    /// Whether the controller answered the last probe.
    pub fn is_online(&self) -> bool {
        self.status_bits() & status::ONLINE != 0
    }

    /// Discovery progress.
    pub fn init_phase(&self) -> InitPhase {
        InitPhase::from_bits((self.status_bits() & status::INIT_MASK) >> status::INIT_SHIFT)
    }

    /// Debug verbosity.
    pub fn debug_level(&self) -> DebugLevel {
        let bits = (self.status_bits() & status::DEBUG_MASK) >> status::DEBUG_SHIFT;
        DebugLevel::new(bits as u8).unwrap_or_default()
    }

    fn update_status(&self, mask: u32, bits: u32) {
        let _ = self
            .status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |old| {
                Some((old & !mask) | (bits & mask))
            });
    }

    fn set_phase(&self, phase: InitPhase) {
        self.update_status(status::INIT_MASK, phase.bits() << status::INIT_SHIFT);
    }

    fn store_debug(&self, level: DebugLevel) {
        self.update_status(status::DEBUG_MASK, u32::from(level.get()) << status::DEBUG_SHIFT);
    }

    fn notify(&self, event: DeviceEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Subscribe to this device's registry events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Run `f` with the device lock held.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> Result<R> {
        let mut guard = self.lock()?;
        Ok(f(&mut guard))
    }

    fn lock(&self) -> Result<MutexGuard<'_, DeviceState>> {
        self.state
            .lock()
            .map_err(|_| Error::Protocol("device lock poisoned"))
    }

    /// Record the probe result. Returns `true` on a transition.
    pub fn mark_online(&self, online: bool) -> bool {
        let bits = if online { status::ONLINE } else { 0 };
        let old = self.status.fetch_update(Ordering::AcqRel, Ordering::Acquire, |old| {
            Some((old & !status::ONLINE) | bits)
        });
        let was_online = matches!(old, Ok(old) if old & status::ONLINE != 0);
        if was_online == online {
            return false;
        }
        if self.debug_level() >= DebugLevel::SESSION || !online {
            tracing::info!(device = %self.name, online, "device status changed");
        }
        self.notify(DeviceEvent::StatusChanged(self.index));
        true
    }

    /// Send one presence ping.
    pub fn probe(&self) -> Result<PresencePong> {
        self.lock()?.connection.presence_ping()
    }

    /// Run a full discovery pass and swap the result in.
    ///
    /// On failure the previous topology stays in place and the phase is
    /// [`InitPhase::Failed`].
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.lock()?;
        self.rediscover(&mut state)
    }

    fn rediscover(&self, state: &mut DeviceState) -> Result<()> {
        self.set_phase(InitPhase::InProgress);
        let result = topology::discover(&mut state.connection);
        let outcome = match result {
            Ok(Discovery { platform, topology }) => {
                state.platform = Some(platform);
                state.topology = topology;
                self.set_phase(InitPhase::Done);
                self.notify(DeviceEvent::FruTableChanged(self.index));
                Ok(())
            }
            Err(err) => {
                tracing::warn!(device = %self.name, error = %err, "discovery failed");
                self.set_phase(InitPhase::Failed);
                Err(err)
            }
        };
        self.notify(DeviceEvent::InitDone(self.index));
        outcome
    }

    /// Ask the next sensor scan to check the repository for changes first.
    pub fn request_config_check(&self) {
        self.config_check.store(true, Ordering::Release);
    }

    /// Rerun discovery when it never succeeded or the primary repository
    /// changed. Returns `true` when discovery ran and succeeded.
    pub fn check_config(&self) -> Result<bool> {
        let mut state = self.lock()?;
        self.check_config_locked(&mut state)
    }

    fn check_config_locked(&self, state: &mut DeviceState) -> Result<bool> {
        if self.init_phase() != InitPhase::Done {
            self.rediscover(state)?;
            return Ok(true);
        }
        if !topology::repository_changed(&mut state.connection, &state.topology)? {
            return Ok(false);
        }
        tracing::info!(device = %self.name, "repository changed, rediscovering");
        self.rediscover(state)?;
        Ok(true)
    }

    /// Refresh every sensor reading.
    ///
    /// A pending configuration check runs first. An offline device only has
    /// its readings invalidated.
    pub fn scan_sensors(&self) -> Result<ScanSummary> {
        let mut state = self.lock()?;
        if !self.is_online() {
            state.topology.invalidate_sensors();
            drop(state);
            self.notify(DeviceEvent::SensorScan(self.index));
            return Ok(ScanSummary::default());
        }
        if self.config_check.swap(false, Ordering::AcqRel) {
            if let Err(err) = self.check_config_locked(&mut state) {
                tracing::debug!(device = %self.name, error = %err, "configuration check failed");
            }
        }
        let state = &mut *state;
        let adapter = adapter_of(&state.platform)?;
        let summary = topology::scan_sensors(&mut state.connection, adapter, &mut state.topology);
        if self.debug_level() >= DebugLevel::REQUESTS {
            tracing::info!(
                device = %self.name,
                read = summary.read,
                failed = summary.failed,
                unavailable = summary.unavailable,
                "sensor scan"
            );
        }
        self.notify(DeviceEvent::SensorScan(self.index));
        Ok(summary)
    }

    /// Forget that discovery completed and make the next scan rerun it.
    pub fn override_init(&self) {
        self.set_phase(InitPhase::NotDone);
        self.request_config_check();
        tracing::info!(device = %self.name, "init override, discovery will rerun");
    }

    /// Send `Chassis Control`.
    pub fn chassis_control(&self, control: ChassisControl) -> Result<()> {
        let mut state = self.lock()?;
        state
            .connection
            .execute(&Route::BMC, &ChassisControlCommand { control })
    }

    /// Read chassis status the way the platform supports it.
    pub fn chassis_status(&self) -> Result<ChassisStatus> {
        let mut state = self.lock()?;
        let state = &mut *state;
        let adapter = adapter_of(&state.platform)?;
        adapter.chassis_status(&mut state.connection)
    }

    /// Open a session now.
    pub fn open_session(&self) -> Result<()> {
        self.lock()?.connection.open()
    }

    /// Close the session.
    pub fn close_session(&self) -> Result<()> {
        self.lock()?.connection.close()
    }

    /// Set the fan override level of the cooling unit with `lookup_id`.
    pub fn set_fan_level(&self, lookup_id: usize, level: u8) -> Result<()> {
        let mut state = self.lock()?;
        let (adapter, conn, fru) = state.fru_parts(lookup_id)?;
        adapter.set_fan_level(conn, fru, level)
    }

    /// Read the fan level of the cooling unit with `lookup_id`.
    pub fn fan_level(&self, lookup_id: usize) -> Result<FanLevel> {
        let mut state = self.lock()?;
        let (adapter, conn, fru) = state.fru_parts(lookup_id)?;
        adapter.fan_level(conn, fru)
    }

    /// Read the power level of the FRU with `lookup_id`.
    pub fn power_level(&self, lookup_id: usize) -> Result<PowerLevel> {
        let mut state = self.lock()?;
        let (adapter, conn, fru) = state.fru_parts(lookup_id)?;
        adapter.power_level(conn, fru)
    }

    /// Activate or deactivate the FRU with `lookup_id`.
    pub fn fru_activation(&self, lookup_id: usize, activate: bool) -> Result<()> {
        let mut state = self.lock()?;
        let (adapter, conn, fru) = state.fru_parts(lookup_id)?;
        adapter.set_fru_activation(conn, fru, activate)
    }

    /// Change debug verbosity.
    pub fn set_debug_level(&self, level: DebugLevel) -> Result<()> {
        self.lock()?.connection.set_debug_level(level);
        self.store_debug(level);
        Ok(())
    }

    /// Platform identified by the last successful discovery.
    pub fn platform(&self) -> Result<Option<Platform>> {
        Ok(self.lock()?.platform.clone())
    }
}

/// All managed devices.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: RwLock<Vec<Arc<Device>>>,
    scan_period: AtomicU8,
    started: AtomicUsize,
    events: broadcast::Sender<DeviceEvent>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            devices: RwLock::new(Vec::new()),
            scan_period: AtomicU8::new(ScanPeriod::default().as_secs() as u8),
            started: AtomicUsize::new(0),
            events,
        }
    }

    /// Register a device reached over UDP.
    pub fn register(&self, config: DeviceConfig) -> Result<Arc<Device>> {
        let connection = config.builder.connect()?;
        self.insert(connection)
    }

    /// Register a device over a caller-supplied transport.
    pub fn register_with_transport(
        &self,
        config: DeviceConfig,
        transport: Box<dyn Transport + Send>,
    ) -> Result<Arc<Device>> {
        let connection = config.builder.with_transport(transport)?;
        self.insert(connection)
    }

    fn insert(&self, connection: Connection) -> Result<Arc<Device>> {
        let mut devices = self
            .devices
            .write()
            .map_err(|_| Error::Protocol("registry lock poisoned"))?;
        if devices.iter().any(|d| d.name() == connection.name()) {
            return Err(Error::InvalidArgument("device name already registered"));
        }
        let device = Arc::new(Device::new(devices.len(), connection, self.events.clone()));
        devices.push(Arc::clone(&device));
        tracing::debug!(device = %device.name(), index = device.index(), "device registered");
        Ok(device)
    }

    /// Device called `name`.
    pub fn find(&self, name: &str) -> Option<Arc<Device>> {
        self.devices
            .read()
            .ok()?
            .iter()
            .find(|d| d.name() == name)
            .cloned()
    }

    /// Device at `index`.
    pub fn get(&self, index: usize) -> Option<Arc<Device>> {
        self.devices.read().ok()?.get(index).cloned()
    }

    /// All devices.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices
            .read()
            .map(|d| d.to_vec())
            .unwrap_or_default()
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.devices.read().map(|d| d.len()).unwrap_or(0)
    }

    /// Whether no device is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events from every device.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Current sensor scan period.
    pub fn scan_period(&self) -> ScanPeriod {
        ScanPeriod::from_secs(u64::from(self.scan_period.load(Ordering::Acquire)))
            .unwrap_or_default()
    }

    /// Change the sensor scan period of every device.
    pub fn set_scan_period(&self, period: ScanPeriod) {
        self.scan_period
            .store(period.as_secs() as u8, Ordering::Release);
        tracing::info!(seconds = period.as_secs(), "sensor scan period changed");
    }

    /// Count one device through its first probe and discovery.
    pub(crate) fn mark_started(&self) {
        let started = self.started.fetch_add(1, Ordering::AcqRel) + 1;
        if started == self.len() {
            tracing::info!(devices = started, "all devices started");
        }
    }

    /// Whether every registered device finished its startup pass.
    pub fn startup_complete(&self) -> bool {
        self.started.load(Ordering::Acquire) >= self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::fru::build::inventory;
    use crate::platform::manufacturer;
    use crate::sdr::build::{self, FullSensor};
    use crate::sdr::{entity_id, sensor_type};
    use crate::sim::{SimController, SimTransport};

    fn nat_controller() -> SimController {
        let mut sim = SimController::default();
        sim.sdr.insert(
            0x20,
            vec![
                build::fru_locator(0, 0x20, 3, entity_id::MCH, 0x61, "MCH"),
                build::fru_locator(1, 0x20, 40, entity_id::COOLING_UNIT, 0x61, "CU1"),
                FullSensor {
                    entity_id: entity_id::MCH,
                    entity_instance: 0x61,
                    thresholds: [0, 80, 70, 0, 0, 0],
                    readable: 0x18,
                    ..FullSensor::default()
                }
                .encode(2),
            ],
        );
        sim.fru.insert((0x20, 3), inventory("N.A.T.", "NAT-MCH"));
        sim.readings.insert((0x20, 1), 42);
        sim
    }

    fn registry_with(sim: &SimTransport) -> (DeviceRegistry, Arc<Device>) {
        let registry = DeviceRegistry::new();
        let config = DeviceConfig::new("mch-1", "127.0.0.1:623".parse().expect("addr"));
        let device = registry
            .register_with_transport(config, Box::new(sim.clone()))
            .expect("register");
        (registry, device)
    }

    #[test]
    fn lookup_by_name_and_index() {
        let sim = SimTransport::new(nat_controller());
        let (registry, device) = registry_with(&sim);
        assert_eq!(registry.find("mch-1").map(|d| d.index()), Some(0));
        assert!(registry.find("mch-2").is_none());
        assert_eq!(registry.get(0).map(|d| d.name().to_owned()), Some("mch-1".into()));
        assert_eq!(device.init_phase(), InitPhase::NotDone);

        let again = DeviceConfig::new("mch-1", "127.0.0.1:623".parse().expect("addr"));
        assert!(registry.register_with_transport(again, Box::new(sim.clone())).is_err());
    }

    #[test]
    fn initialize_publishes_topology_and_events() {
        let sim = SimTransport::new(nat_controller());
        let (registry, device) = registry_with(&sim);
        let mut events = registry.subscribe();

        device.initialize().expect("initialize");
        assert_eq!(device.init_phase(), InitPhase::Done);
        assert_eq!(events.try_recv().ok(), Some(DeviceEvent::FruTableChanged(0)));
        assert_eq!(events.try_recv().ok(), Some(DeviceEvent::InitDone(0)));

        let platform = device.platform().expect("lock");
        assert!(matches!(platform, Some(Platform::MicroTcaNat(_))));
        let mch = device
            .with_lock(|s| s.topology.fru(3).cloned())
            .expect("lock")
            .expect("MCH");
        let product = mch.inventory.as_ref().and_then(|i| i.product_name());
        assert_eq!(product, Some("NAT-MCH"));
    }

    #[test]
    fn failed_discovery_keeps_previous_topology() {
        let sim = SimTransport::new(nat_controller());
        let (_registry, device) = registry_with(&sim);
        device.initialize().expect("initialize");

        sim.with(|c| c.manufacturer_id = 0x00_0157);
        assert!(device.initialize().is_err());
        assert_eq!(device.init_phase(), InitPhase::Failed);
        let frus = device.with_lock(|s| s.topology.frus().len()).expect("lock");
        assert_eq!(frus, 2);
    }

    #[test]
    fn scan_reads_sensors_only_when_online() {
        let sim = SimTransport::new(nat_controller());
        let (_registry, device) = registry_with(&sim);
        device.initialize().expect("initialize");

        let summary = device.scan_sensors().expect("offline scan");
        assert_eq!(summary, ScanSummary::default());
        assert_eq!(sim.with(|c| c.sensor_reads), 0);

        assert!(device.mark_online(true));
        assert!(!device.mark_online(true));
        let summary = device.scan_sensors().expect("scan");
        assert_eq!(summary.read, 1);
        let value = device
            .with_lock(|s| s.topology.sensor(3, sensor_type::TEMPERATURE, 0).and_then(|s| s.value))
            .expect("lock");
        assert_eq!(value, Some(42.0));

        assert!(device.mark_online(false));
        device.scan_sensors().expect("offline scan");
        let valid = device
            .with_lock(|s| s.topology.sensors().iter().any(|s| s.valid))
            .expect("lock");
        assert!(!valid);
    }

    #[test]
    fn config_check_rediscovers_on_repository_change() {
        let sim = SimTransport::new(nat_controller());
        let (registry, device) = registry_with(&sim);
        device.initialize().expect("initialize");
        device.mark_online(true);
        assert!(!device.check_config().expect("unchanged"));

        sim.with(|c| {
            c.sdr_timestamp += 10;
            if let Some(records) = c.sdr.get_mut(&0x20) {
                records.push(build::fru_locator(3, 0x20, 41, entity_id::COOLING_UNIT, 0x62, "CU2"));
            }
        });
        let mut events = registry.subscribe();
        device.request_config_check();
        device.scan_sensors().expect("scan");
        assert_eq!(events.try_recv().ok(), Some(DeviceEvent::FruTableChanged(0)));
        let frus = device.with_lock(|s| s.topology.frus().len()).expect("lock");
        assert_eq!(frus, 3);
    }

    #[test]
    fn init_override_forces_rediscovery() {
        let sim = SimTransport::new(nat_controller());
        let (_registry, device) = registry_with(&sim);
        device.initialize().expect("initialize");
        device.mark_online(true);
        let handshakes = sim.with(|c| c.handshakes);

        device.override_init();
        assert_eq!(device.init_phase(), InitPhase::NotDone);
        device.scan_sensors().expect("scan");
        assert_eq!(device.init_phase(), InitPhase::Done);
        assert_eq!(sim.with(|c| c.handshakes), handshakes);
    }

    #[test]
    fn operator_commands_reach_the_controller() {
        let sim = SimTransport::new(nat_controller());
        let (_registry, device) = registry_with(&sim);
        device.initialize().expect("initialize");

        device.chassis_control(ChassisControl::PowerCycle).expect("control");
        assert_eq!(sim.with(|c| c.chassis_controls.clone()), vec![0x02]);
        assert!(device.chassis_status().expect("status").system_power_on);

        device.set_fan_level(40, 9).expect("fan level");
        assert_eq!(sim.with(|c| c.fan_levels.get(&(0x20, 40)).copied()), Some(9));
        assert_eq!(device.fan_level(40).expect("read").override_level, 9);
        assert!(matches!(device.set_fan_level(40, 16), Err(Error::InvalidArgument(_))));
        assert!(matches!(device.set_fan_level(99, 1), Err(Error::InvalidArgument(_))));

        device.fru_activation(3, false).expect("deactivate");
        assert_eq!(sim.with(|c| c.activations.clone()), vec![(0x20, 3, false)]);
    }

    #[test]
    fn sessions_open_and_close_on_request() {
        let sim = SimTransport::new(nat_controller());
        let (_registry, device) = registry_with(&sim);
        device.open_session().expect("open");
        device.close_session().expect("close");
        assert_eq!(sim.with(|c| c.closes), 1);
        assert!(!device.with_lock(|s| s.connection.session().is_active()).expect("lock"));
    }

    #[test]
    fn debug_level_is_published_in_status() {
        let sim = SimTransport::new(nat_controller());
        let (_registry, device) = registry_with(&sim);
        device.set_debug_level(DebugLevel::REQUESTS).expect("debug");
        assert_eq!(device.debug_level(), DebugLevel::REQUESTS);
        device.mark_online(true);
        assert_eq!(device.status_bits() & status::ONLINE, status::ONLINE);
        assert_eq!(device.debug_level(), DebugLevel::REQUESTS);
    }

    #[test]
    fn scan_period_accepts_only_known_values() {
        let registry = DeviceRegistry::new();
        assert_eq!(registry.scan_period(), ScanPeriod::Seconds10);
        registry.set_scan_period(ScanPeriod::from_secs(30).expect("30 s"));
        assert_eq!(registry.scan_period().duration(), Duration::from_secs(30));
        assert!(ScanPeriod::from_secs(15).is_err());
    }

    #[test]
    fn server_sensors_belong_to_the_baseboard() {
        let mut ctrl = SimController {
            manufacturer_id: manufacturer::DELL,
            ..SimController::default()
        };
        ctrl.sdr.insert(0x20, vec![FullSensor::default().encode(0)]);
        ctrl.readings.insert((0x20, 1), 30);
        let sim = SimTransport::new(ctrl);
        let (_registry, device) = registry_with(&sim);
        device.initialize().expect("initialize");
        device.mark_online(true);
        device.scan_sensors().expect("scan");
        let owner = device
            .with_lock(|s| s.topology.sensors()[0].fru_index())
            .expect("lock");
        assert_eq!(owner, Some(0));
    }
}
