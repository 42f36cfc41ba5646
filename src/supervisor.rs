//! Background supervision of registered devices.
//!
//! One tokio task per device probes the controller, periodically requests a
//! configuration check and drives sensor scans. All IPMI work is blocking,
//! so it runs on the blocking pool; the task itself only waits on timers
//! and the shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::device::{Device, DeviceRegistry};

/// Timing of the supervision loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Interval between presence pings.
    pub probe_interval: Duration,
    /// Pings tried at startup before a device is declared offline.
    pub probe_attempts: usize,
    /// Interval between repository change checks.
    pub config_check_interval: Duration,
    /// Fixed scan period. `None` follows the registry's [`ScanPeriod`].
    ///
    /// [`ScanPeriod`]: crate::device::ScanPeriod
    pub scan_period: Option<Duration>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            probe_attempts: 3,
            config_check_interval: Duration::from_secs(30),
            scan_period: None,
        }
    }
}

/// Running supervisor tasks.
#[derive(Debug)]
pub struct SupervisorHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SupervisorHandle {
    /// Number of supervised devices.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no device is supervised.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stop every task and wait for each to close its session.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "supervisor task failed");
            }
        }
    }
}

/// Supervise every device currently in `registry`.
///
/// Must be called from within a tokio runtime.
pub fn spawn(registry: Arc<DeviceRegistry>, config: SupervisorConfig) -> SupervisorHandle {
    let (shutdown, signal) = watch::channel(false);
    let tasks = registry
        .devices()
        .into_iter()
        .map(|device| {
            let registry = Arc::clone(&registry);
            let signal = signal.clone();
            tokio::spawn(supervise(registry, device, config, signal))
        })
        .collect();
    SupervisorHandle { shutdown, tasks }
}

/// Run `f` on the blocking pool. `None` when the closure panicked.
async fn blocking<R, F>(device: &Arc<Device>, f: F) -> Option<R>
where
    R: Send + 'static,
    F: FnOnce(&Device) -> R + Send + 'static,
{
    let device = Arc::clone(device);
    let name = device.name().to_owned();
    match tokio::task::spawn_blocking(move || f(&device)).await {
        Ok(result) => Some(result),
        Err(err) => {
            tracing::error!(device = %name, error = %err, "blocking device work failed");
            None
        }
    }
}

/// Probe until the controller answers or the attempts run out, then run
/// the first discovery when it is online.
async fn start(device: &Arc<Device>, config: &SupervisorConfig) {
    let mut online = false;
    for attempt in 1..=config.probe_attempts.max(1) {
        match blocking(device, |d| d.probe()).await {
            Some(Ok(_)) => {
                online = true;
                break;
            }
            Some(Err(err)) => {
                tracing::debug!(device = %device.name(), attempt, error = %err, "probe failed");
            }
            None => {}
        }
    }

    device.mark_online(online);
    if !online {
        tracing::warn!(device = %device.name(), "controller not reachable at startup");
        return;
    }
    if let Some(Err(err)) = blocking(device, |d| d.initialize()).await {
        tracing::warn!(device = %device.name(), error = %err, "initial discovery failed");
    }
}

fn ticker(period: Duration) -> time::Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn supervise(
    registry: Arc<DeviceRegistry>,
    device: Arc<Device>,
    config: SupervisorConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    // Discovery is not cancellable; a shutdown during startup is seen below.
    start(&device, &config).await;
    registry.mark_started();

    let scan_period = || config.scan_period.unwrap_or_else(|| registry.scan_period().duration());
    let mut current_period = scan_period();
    let mut probe = ticker(config.probe_interval);
    let mut check = ticker(config.config_check_interval);
    let mut scan = ticker(current_period);

    while !*shutdown.borrow() {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = probe.tick() => {
                let online = matches!(blocking(&device, |d| d.probe()).await, Some(Ok(_)));
                if device.mark_online(online) {
                    if online {
                        device.request_config_check();
                    } else {
                        // Last scan invalidates every reading.
                        blocking(&device, |d| d.scan_sensors()).await;
                    }
                }
            }
            _ = check.tick() => {
                if device.is_online() {
                    device.request_config_check();
                }
            }
            _ = scan.tick() => {
                if device.is_online() {
                    if let Some(Err(err)) = blocking(&device, |d| d.scan_sensors()).await {
                        tracing::debug!(device = %device.name(), error = %err, "sensor scan failed");
                    }
                }
                let period = scan_period();
                if period != current_period {
                    current_period = period;
                    scan = ticker(period);
                }
            }
        }
    }

    let closed = blocking(&device, |d| {
        d.with_lock(|s| {
            if s.connection.session().is_active() {
                s.connection.close()
            } else {
                Ok(())
            }
        })?
    })
    .await;
    if let Some(Err(err)) = closed {
        tracing::debug!(device = %device.name(), error = %err, "session close failed");
    }
    tracing::debug!(device = %device.name(), "supervisor stopped");
}
