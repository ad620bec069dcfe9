//! ezoctl-sim — runs the RTD, pH and EC drivers against their response
//! simulators on the host.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  AtlasRtd ──TemperatureProvider──▶ AtlasPh, AtlasEc      │
//! │      │                               │                   │
//! │      └──────────── readings ─────────┴──▶ LogObserver    │
//! │                                                          │
//! │  Scheduler::shared()  (one run-loop for every driver)    │
//! │  DetachedBus          (registers devices, never transfers)│
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `ezoctl-sim [config.json] [seconds]`
#![deny(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};

use ezoctl::adapters::LogObserver;
use ezoctl::config::DriverConfig;
use ezoctl::dispatch::Scheduler;
use ezoctl::ports::{DeviceHandle, ReadingObserver, TemperatureProvider, Transport};
use ezoctl::sensors::ph::CalibrationPoint;
use ezoctl::sensors::{AtlasEc, AtlasPh, AtlasRtd, ec, ph, rtd};

const DEFAULT_RUN_SECONDS: u64 = 10;

/// Bus stand-in for simulator mode, where the drivers never transfer.
struct DetachedBus;

impl Transport for DetachedBus {
    fn register_device(&self, address: u8) -> ezoctl::Result<DeviceHandle> {
        Ok(DeviceHandle::new(address))
    }

    fn unregister_device(&self, _device: DeviceHandle) -> ezoctl::Result<()> {
        Ok(())
    }

    fn write(&self, _device: DeviceHandle, _bytes: &[u8], _timeout: Duration) -> ezoctl::Result<()> {
        Err(ezoctl::Error::Io)
    }

    fn read(&self, _device: DeviceHandle, _buffer: &mut [u8], _timeout: Duration) -> ezoctl::Result<()> {
        Err(ezoctl::Error::Io)
    }
}

fn load_config(path: Option<&str>) -> Result<DriverConfig> {
    let mut config = match path {
        Some(path) => {
            let json = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            DriverConfig::from_json(&json).with_context(|| format!("parsing {path}"))?
        }
        None => DriverConfig::default(),
    };
    if !config.simulator_enabled {
        warn!("simulator_enabled forced on; this binary has no bus");
        config.simulator_enabled = true;
    }
    Ok(config)
}

fn main() -> Result<()> {
    // ── 1. Logging ────────────────────────────────────────────
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("ezoctl-sim v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Configuration ─────────────────────────────────────
    let args: Vec<String> = std::env::args().collect();
    let config = load_config(args.get(1).map(String::as_str))?;
    let seconds = match args.get(2) {
        Some(s) => s.parse().context("run time must be whole seconds")?,
        None => DEFAULT_RUN_SECONDS,
    };

    // ── 3. Run-loop and bus ───────────────────────────────────
    let scheduler = Scheduler::shared();
    let bus: Arc<dyn Transport> = Arc::new(DetachedBus);
    let observer: Arc<dyn ReadingObserver> = Arc::new(LogObserver::new());

    // ── 4. Drivers ────────────────────────────────────────────
    let rtd = AtlasRtd::new("RTD", rtd::DEFAULT_ADDRESS, Arc::clone(&bus), scheduler, config);
    let provider: Arc<dyn TemperatureProvider> = Arc::new(rtd.clone());
    let ph = AtlasPh::new(
        "pH",
        ph::DEFAULT_ADDRESS,
        Arc::clone(&bus),
        scheduler,
        config,
        Some(Arc::clone(&provider)),
    );
    let ec = AtlasEc::new("EC", ec::DEFAULT_ADDRESS, bus, scheduler, config, Some(provider));

    rtd.add_observer(Arc::clone(&observer))?;
    ph.add_observer(Arc::clone(&observer))?;
    ec.add_observer(observer)?;

    rtd.init().context("RTD init")?;
    ph.init().context("pH init")?;
    ec.init().context("EC init")?;

    // ── 5. A few synchronous commands ─────────────────────────
    ph.send_get_slope(true, None)?;
    ph.send_calibration(CalibrationPoint::Mid, 7.0, true, None)?;
    ec.send_get_temperature_compensation(true, None)?;
    info!(
        "pH compensates at {:.3} C, firmware {}",
        ph.current_temperature(),
        ph.firmware_version()
    );

    // ── 6. Let the reading loops run ──────────────────────────
    std::thread::sleep(Duration::from_secs(seconds));

    // ── 7. Shutdown ───────────────────────────────────────────
    ec.stop();
    ph.stop();
    rtd.stop();
    scheduler.shutdown();
    info!("done");
    Ok(())
}
