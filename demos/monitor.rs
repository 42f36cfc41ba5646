use std::sync::Arc;
use std::time::Duration;

use mch_ipmi::device::{DeviceConfig, DeviceEvent, DeviceRegistry, ScanPeriod};
use mch_ipmi::supervisor::{self, SupervisorConfig};
use mch_ipmi::{ClientBuilder, PrivilegeLevel};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Example:
    //   cargo run --example monitor -- 192.168.1.30:623 admin password 60
    let mut args = std::env::args().skip(1);
    let target = args.next().ok_or("missing <host:port>")?.parse()?;
    let username = args.next().ok_or("missing <username>")?;
    let password = args.next().ok_or("missing <password>")?;
    let runtime: u64 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(60);

    let registry = Arc::new(DeviceRegistry::new());
    registry.set_scan_period(ScanPeriod::Seconds5);
    let builder = ClientBuilder::new(target)
        .username(username)
        .password(password)
        .privilege_level(PrivilegeLevel::Operator)
        .timeout(Duration::from_secs(1));
    registry.register(DeviceConfig::new("crate-1", target).with_builder(builder))?;

    let mut events = registry.subscribe();
    let handle = supervisor::spawn(Arc::clone(&registry), SupervisorConfig::default());
    let deadline = tokio::time::sleep(Duration::from_secs(runtime));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => {
                let Ok(event) = event else { continue };
                let DeviceEvent::SensorScan(index) = event else {
                    println!("{event:?}");
                    continue;
                };
                let Some(device) = registry.get(index) else { continue };
                device.with_lock(|state| {
                    for sensor in state.topology.sensors() {
                        let value = sensor
                            .value
                            .map_or_else(|| "n/a".to_owned(), |v| format!("{v:.2}"));
                        println!(
                            "{:<16} {:>10} {:?}",
                            sensor.record.id, value, sensor.severity
                        );
                    }
                })?;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}
