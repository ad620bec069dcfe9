//! Scripted mock I2C bus for integration tests.
//!
//! Records every write so tests can assert on the exact command history,
//! and answers reads from a per-device script first, then from fixed
//! per-command answers, then from a table of typical EZO replies.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use ezoctl::config::{DriverConfig, TimingConfig};
use ezoctl::ezo::{AtlasSensor, Frame, SensorModel, Status, encode_frame, success_frame};
use ezoctl::ports::{DeviceHandle, ReadingMessage, ReadingObserver, Transport};
use ezoctl::{Error, Result};
use parking_lot::Mutex;

// ── MockBus ───────────────────────────────────────────────────

#[derive(Default)]
struct BusState {
    devices: Vec<u8>,
    writes: Vec<(u8, String)>,
    last_command: HashMap<u8, String>,
    scripted: HashMap<u8, VecDeque<Frame>>,
    answers: HashMap<(u8, String), Frame>,
    reads: usize,
    fail_writes: bool,
    fail_reads: Option<Error>,
    /// Devices written to whose answer has not been read yet.
    unread: HashSet<u8>,
    overlapping_writes: usize,
}

#[derive(Default)]
pub struct MockBus {
    state: Mutex<BusState>,
}

#[allow(dead_code)]
impl MockBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue raw frames for the next reads from `address`.
    pub fn script(&self, address: u8, frames: impl IntoIterator<Item = Frame>) {
        self.state
            .lock()
            .scripted
            .entry(address)
            .or_default()
            .extend(frames);
    }

    /// Answer `command` on `address` with a successful `text` from now on.
    pub fn answer(&self, address: u8, command: &str, text: &str) {
        self.state
            .lock()
            .answers
            .insert((address, command.to_owned()), success_frame(text));
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Fail every read with `error` until cleared.
    pub fn set_fail_reads(&self, error: Option<Error>) {
        self.state.lock().fail_reads = error;
    }

    /// Writes that reached a device before its previous answer was read.
    pub fn overlapping_writes(&self) -> usize {
        self.state.lock().overlapping_writes
    }

    /// Command texts written to `address`, in order.
    pub fn writes_to(&self, address: u8) -> Vec<String> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(a, _)| *a == address)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }

    pub fn is_registered(&self, address: u8) -> bool {
        self.state.lock().devices.contains(&address)
    }
}

/// What a healthy circuit answers when nothing else is scripted.
fn typical_reply(command: &str) -> Frame {
    let text = match command {
        "i" => "?I,pH,2.10",
        "status" => "?STATUS,P,5.038",
        "cal,?" => "?CAL,0",
        "r" => "7.000",
        "o,?" => "?O,EC",
        "k,?" => "?K,1.000",
        "tds,?" => "?TDS,0.540",
        "t,?" => "?T,25.000",
        "l,?" => "?L,1",
        "plock,?" => "?PLOCK,1",
        "slope,?" => "?SLOPE,99.7,100.3,-0.89",
        c if c.starts_with("rt,") => "7.000",
        _ => "",
    };
    success_frame(text)
}

impl Transport for MockBus {
    fn register_device(&self, address: u8) -> Result<DeviceHandle> {
        let mut state = self.state.lock();
        if state.devices.contains(&address) {
            return Err(Error::AlreadyExists);
        }
        state.devices.push(address);
        Ok(DeviceHandle::new(address))
    }

    fn unregister_device(&self, device: DeviceHandle) -> Result<()> {
        self.state.lock().devices.retain(|&a| a != device.address());
        Ok(())
    }

    fn write(&self, device: DeviceHandle, bytes: &[u8], _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(Error::Io);
        }
        if !state.unread.insert(device.address()) {
            state.overlapping_writes += 1;
        }
        let text = String::from_utf8_lossy(bytes).into_owned();
        state.last_command.insert(device.address(), text.clone());
        state.writes.push((device.address(), text));
        Ok(())
    }

    fn read(&self, device: DeviceHandle, buffer: &mut [u8], _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state.reads += 1;
        let address = device.address();
        state.unread.remove(&address);
        if let Some(error) = state.fail_reads {
            return Err(error);
        }
        let frame = if let Some(frame) = state.scripted.get_mut(&address).and_then(VecDeque::pop_front) {
            frame
        } else {
            let command = state.last_command.get(&address).cloned().unwrap_or_default();
            match state.answers.get(&(address, command.clone())) {
                Some(frame) => *frame,
                None => typical_reply(&command),
            }
        };
        let len = buffer.len().min(frame.len());
        buffer[..len].copy_from_slice(&frame[..len]);
        Ok(())
    }
}

// ── Frames ────────────────────────────────────────────────────

#[allow(dead_code)]
pub fn still_processing() -> Frame {
    encode_frame(Status::STILL_PROCESSING, "")
}

#[allow(dead_code)]
pub fn syntax_error() -> Frame {
    encode_frame(Status::SYNTAX_ERROR, "")
}

// ── Drivers ───────────────────────────────────────────────────

/// Every wait shortened so tests finish quickly.
pub fn fast_config() -> DriverConfig {
    DriverConfig {
        timing: TimingConfig {
            default_response_wait_ms: 5,
            reading_response_wait_ms: 5,
            compensated_reading_response_wait_ms: 5,
            set_temperature_response_wait_ms: 5,
            calibration_response_wait_ms: 5,
            still_processing_backoff_ms: 2,
            transport_timeout_ms: 100,
            stop_poll_interval_ms: 5,
        },
        ..DriverConfig::default()
    }
}

/// Plain uncompensated circuit.
pub struct PlainModel;

impl SensorModel for PlainModel {
    fn simulated_reading(&self) -> String {
        "1.000".to_owned()
    }
}

pub const PLAIN_ADDRESS: u8 = 0x70;

#[allow(dead_code)]
pub fn plain_sensor(bus: &Arc<MockBus>, scheduler: &ezoctl::dispatch::Scheduler) -> Arc<AtlasSensor> {
    let transport: Arc<dyn Transport> = bus.clone();
    AtlasSensor::new("plain", PLAIN_ADDRESS, transport, scheduler, fast_config(), PlainModel)
}

/// A started scheduler private to one test.
pub fn scheduler(name: &str) -> ezoctl::dispatch::Scheduler {
    let scheduler = ezoctl::dispatch::Scheduler::new(name);
    scheduler.start().expect("scheduler thread");
    scheduler
}

/// Poll `condition` until it holds or two seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

// ── Observers ─────────────────────────────────────────────────

#[derive(Default)]
pub struct CountingObserver {
    pub count: AtomicUsize,
    pub last: Mutex<Option<ReadingMessage>>,
}

#[allow(dead_code)]
impl CountingObserver {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl ReadingObserver for CountingObserver {
    fn on_reading(&self, _sensor: &str, message: &ReadingMessage) {
        self.count.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some(*message);
    }
}
