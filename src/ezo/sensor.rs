//! Command queue and response state machine shared by every EZO circuit.
//!
//! ```text
//!            enqueue (any thread)
//!                   │
//!                   ▼
//!   ┌──────────────────────────┐   send    ┌──────────┐  write  ┌─────────┐
//!   │ PriorityQueue<Command>   │──────────▶│ in-flight│────────▶│Transport│
//!   └──────────────────────────┘           │   slot   │         └─────────┘
//!                ▲                         └────┬─────┘
//!                │ Reenqueue                    │ timer (response wait)
//!                │                              ▼
//!                │                   read frame → classify → parse
//!                │                              │
//!                │          254 ──▶ re-arm timer (backoff), keep slot
//!                │                              │
//!                └──────────── Dequeue / Reenqueue / Resend ──▶ send next
//! ```
//!
//! At most one command occupies the in-flight slot.  The driver lock is
//! only held around queue and slot bookkeeping, never across transport
//! I/O, hooks or completion callbacks; while a command is out of the
//! slot for I/O the slot is marked checked-out so no second command can
//! be promoted.

use core::cell::RefCell;
use core::time::Duration;
use std::sync::Arc;
use std::thread;
use std::time::SystemTime;

use futures_lite::future;
use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, ReentrantMutex};

use super::command::{
    Command, Completion, CompletionBehavior, CompletionCallback, Priority,
};
use super::compensation::TemperatureCompensation;
use super::frame::{FRAME_SIZE, Frame, Status, decode_frame, success_frame};
use super::response::{DeviceInfo, FirmwareVersion, Response, ResponseBody};
use crate::config::{DriverConfig, TimingConfig};
use crate::dispatch::{Scheduler, TimerSource};
use crate::error::{Error, Result};
use crate::observe::Observers;
use crate::ports::{DeviceHandle, ReadingMessage, ReadingObserver, Transport};
use crate::queue::PriorityQueue;

/// Longest name `name,<x>` accepts.
pub const MAX_DEVICE_NAME_LEN: usize = 16;

// ───────────────────────────────────────────────────────────────
// Per-circuit behavior
// ───────────────────────────────────────────────────────────────

/// What differs between circuit types as far as the shared state
/// machine is concerned.
pub trait SensorModel: Send + Sync {
    /// Response wait for a plain `r`.
    fn reading_response_wait_ms(&self, timing: &TimingConfig) -> u32 {
        timing.reading_response_wait_ms
    }

    /// Extract the reading from a successful `r` response.  `None` drops it.
    fn convert_reading(&self, text: &str) -> Option<f64> {
        parse_reading(text)
    }

    /// Text a simulated `r` answers with.
    fn simulated_reading(&self) -> String;

    /// Temperature compensation state, for circuits that compensate.
    fn compensation(&self) -> Option<&Arc<TemperatureCompensation>> {
        None
    }
}

/// Parse the leading value of a reading.
pub fn parse_reading(text: &str) -> Option<f64> {
    let field = text.split(',').next().map(str::trim).unwrap_or_default();
    if field.is_empty() {
        return None;
    }
    match field.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            error!("failed to convert '{}' to a reading", field);
            None
        }
    }
}

/// Frame answering a simulated `r` on `sensor`.
pub(crate) fn simulated_reading_frame(sensor: &AtlasSensor) -> Frame {
    success_frame(&sensor.model.simulated_reading())
}

/// UART baud rates accepted by `baud,<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baud {
    B300 = 300,
    B1200 = 1200,
    B2400 = 2400,
    B9600 = 9600,
    B19200 = 19200,
    B38400 = 38400,
    B57600 = 57600,
    B115200 = 115_200,
}

// ───────────────────────────────────────────────────────────────
// Driver state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
enum Slot {
    #[default]
    Empty,
    Parked(Box<Command>),
    /// Taken out for I/O or completion handling.
    CheckedOut,
}

#[derive(Debug, Default)]
struct DriverState {
    queue: PriorityQueue<Box<Command>>,
    slot: Slot,
    stopped: bool,
    reading_active: bool,
    forced_value: Option<f64>,
    last_reading: Option<ReadingMessage>,
    firmware: FirmwareVersion,
    device_type: Option<String>,
    device: Option<DeviceHandle>,
}

impl DriverState {
    fn enqueue(&mut self, mut command: Box<Command>) {
        if self.stopped {
            command.response_mut().set_status(Err(Error::Interrupted));
        }
        self.queue.push(command);
    }

    fn is_drained(&self) -> bool {
        self.queue.is_empty() && matches!(self.slot, Slot::Empty)
    }
}

// ───────────────────────────────────────────────────────────────
// AtlasSensor
// ───────────────────────────────────────────────────────────────

/// Driver for one EZO circuit.
pub struct AtlasSensor {
    name: String,
    address: u8,
    transport: Arc<dyn Transport>,
    scheduler: Scheduler,
    config: DriverConfig,
    model: Box<dyn SensorModel>,
    observers: Observers,
    state: ReentrantMutex<RefCell<DriverState>>,
    timer: Mutex<Option<TimerSource>>,
}

impl AtlasSensor {
    pub fn new(
        name: impl Into<String>,
        address: u8,
        transport: Arc<dyn Transport>,
        scheduler: &Scheduler,
        config: DriverConfig,
        model: impl SensorModel + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            address,
            transport,
            scheduler: scheduler.clone(),
            config,
            model: Box::new(model),
            observers: Observers::new(),
            state: ReentrantMutex::new(RefCell::new(DriverState::default())),
            timer: Mutex::new(None),
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut DriverState) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.config.timing
    }

    pub fn model(&self) -> &dyn SensorModel {
        self.model.as_ref()
    }

    pub fn compensation(&self) -> Option<&Arc<TemperatureCompensation>> {
        self.model.compensation()
    }

    /// Firmware version learned from `i`; zero until then.
    pub fn firmware_version(&self) -> FirmwareVersion {
        self.with_state(|s| s.firmware)
    }

    /// Device type learned from `i`.
    pub fn device_type(&self) -> Option<String> {
        self.with_state(|s| s.device_type.clone())
    }

    pub fn is_stopped(&self) -> bool {
        self.with_state(|s| s.stopped)
    }

    pub fn is_reading_active(&self) -> bool {
        self.with_state(|s| s.reading_active)
    }

    /// Commands waiting behind the in-flight slot.
    pub fn pending_commands(&self) -> usize {
        self.with_state(|s| s.queue.len())
    }

    /// True when nothing is queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.with_state(|s| s.is_drained())
    }

    pub fn last_reading(&self) -> Option<ReadingMessage> {
        self.with_state(|s| s.last_reading)
    }

    pub fn last_value(&self) -> Option<f64> {
        self.last_reading().map(|r| r.value)
    }

    /// Record `value` as the last reading in place of measurements while
    /// set.  Observers still receive the measured values.
    pub fn set_forced_value(&self, value: Option<f64>) {
        self.with_state(|s| s.forced_value = value);
    }

    pub fn forced_value(&self) -> Option<f64> {
        self.with_state(|s| s.forced_value)
    }

    pub fn add_observer(&self, observer: Arc<dyn ReadingObserver>) -> Result<()> {
        self.observers.add(observer)
    }

    pub fn remove_observer(&self, observer: &Arc<dyn ReadingObserver>) {
        self.observers.remove(observer);
    }

    fn transport_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.config.timing.transport_timeout_ms))
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Register the device, create the response timer, query the circuit
    /// and start the continuous reading loop.
    pub fn init(self: &Arc<Self>) -> Result<()> {
        self.init_with(false)
    }

    /// [`init`](Self::init), optionally leaving the reading loop to the
    /// caller so circuit-specific setup can run first.
    pub fn init_with(self: &Arc<Self>, defer_reading: bool) -> Result<()> {
        self.config.validate()?;
        if self.timer.lock().is_some() {
            return Err(Error::AlreadyExists);
        }

        let device = self.transport.register_device(self.address)?;
        self.with_state(|s| s.device = Some(device));

        let weak = Arc::downgrade(self);
        let timer = TimerSource::new(self.name.clone(), &self.scheduler, move |_| {
            if let Some(sensor) = weak.upgrade() {
                sensor.handle_event();
            }
        });
        let timer = match timer {
            Ok(timer) => timer,
            Err(e) => {
                self.release_device();
                return Err(e);
            }
        };
        *self.timer.lock() = Some(timer);

        if self.config.simulator_enabled {
            info!("{}: simulator enabled", self.name);
        }

        let result = self.run_init_sequence(defer_reading);
        if let Err(e) = result {
            error!("{}: init failed: {}", self.name, e);
            let timer = self.timer.lock().take();
            drop(timer);
            self.release_device();
        }
        result
    }

    fn run_init_sequence(&self, defer_reading: bool) -> Result<()> {
        self.send_get_info(true, None)?;
        self.send_get_status(true, None)?;
        self.send_get_calibration(true, None)?;
        self.send_set_led(false, false, None)?;
        self.send_set_protocol_lock(true, false, None)?;
        if !defer_reading {
            self.enqueue_send_get_reading()?;
        }
        Ok(())
    }

    fn release_device(&self) {
        let device = self.with_state(|s| s.device.take());
        if let Some(device) = device {
            if let Err(e) = self.transport.unregister_device(device) {
                warn!("{}: unregister failed: {}", self.name, e);
            }
        }
    }

    /// Refuse new work, drain everything queued with `Interrupted`, then
    /// halt the timer.  Blocks until drained.
    pub fn stop(&self) {
        self.with_state(|s| {
            s.stopped = true;
            s.reading_active = false;
        });
        info!("{}: stopping", self.name);
        self.send();

        if self.scheduler.is_current_thread() {
            warn!("{}: stop() on the scheduler thread, not waiting for drain", self.name);
            return;
        }

        let poll = Duration::from_millis(u64::from(self.config.timing.stop_poll_interval_ms));
        while !self.with_state(|s| s.is_drained()) {
            thread::sleep(poll);
        }

        if let Some(timer) = self.timer.lock().as_ref() {
            timer.stop();
        }
        info!("{}: stopped", self.name);
    }

    // ── Queue ─────────────────────────────────────────────────

    /// Start a command, failing fast on a stopped or uninitialised driver.
    pub fn command(&self, text: impl Into<String>, body: ResponseBody, response_wait_ms: u32) -> Result<Command> {
        if self.is_stopped() {
            return Err(Error::Interrupted);
        }
        if self.timer.lock().is_none() {
            error!("{}: command issued before init", self.name);
            return Err(Error::Io);
        }
        Ok(Command::new(text, body, response_wait_ms))
    }

    /// Queue `command` by priority.
    pub fn enqueue(&self, command: Command) {
        self.with_state(|s| s.enqueue(Box::new(command)));
    }

    /// Queue `command` and kick the state machine.
    ///
    /// A synchronous submit blocks until the command completes and returns
    /// its final status.  It must not be used from a completion callback.
    pub fn submit(&self, mut command: Command, synchronous: bool) -> Result<()> {
        let waiter = if synchronous {
            if self.scheduler.is_current_thread() {
                error!("{}: synchronous '{}' from the scheduler thread", self.name, command.text());
                return Err(Error::InvalidArgument);
            }
            let waiter = Arc::new(Completion::new());
            command.attach_waiter(Arc::clone(&waiter));
            Some(waiter)
        } else {
            None
        };

        self.enqueue(command);
        self.send();

        match waiter {
            Some(waiter) => future::block_on(waiter.wait()),
            None => Ok(()),
        }
    }

    /// Promote the next command into the in-flight slot and write it.
    ///
    /// A no-op while a sent command occupies the slot or the queue is
    /// empty.
    fn send(&self) {
        let taken = self.with_state(|s| {
            let command = match core::mem::replace(&mut s.slot, Slot::CheckedOut) {
                Slot::Parked(command) if !command.has_sent() => command,
                Slot::Empty => {
                    if let Some(command) = s.queue.pop() {
                        command
                    } else {
                        s.slot = Slot::Empty;
                        return None;
                    }
                }
                busy => {
                    s.slot = busy;
                    return None;
                }
            };
            Some((command, s.stopped, s.device))
        });
        let Some((mut command, stopped, device)) = taken else {
            return;
        };

        let mut fire_now = true;
        let status = if stopped {
            command.set_behavior(CompletionBehavior::Dequeue);
            Err(Error::Interrupted)
        } else {
            let written = command
                .run_pre_send(self)
                .and_then(|()| self.write_command(device, &command));
            if written.is_ok() {
                fire_now = command.response_wait_ms() == 0;
            }
            written
        };

        command.response_mut().set_status(status);
        command.mark_sent();
        let wait = command.response_wait();
        self.with_state(|s| s.slot = Slot::Parked(command));

        if fire_now {
            self.fire_timer_now();
        } else {
            self.arm_timer(wait);
        }
    }

    fn write_command(&self, device: Option<DeviceHandle>, command: &Command) -> Result<()> {
        if self.config.log_sent_commands {
            info!("{} -> {}", self.name, command.text());
        }
        if self.config.simulator_enabled {
            return Ok(());
        }
        let device = device.ok_or(Error::Io)?;
        self.transport
            .write(device, command.text().as_bytes(), self.transport_timeout())?;
        trace!("{}: wrote '{}' to 0x{:02x}", self.name, command.text(), device.address());
        Ok(())
    }

    fn arm_timer(&self, delay: Duration) {
        if let Some(timer) = self.timer.lock().as_ref() {
            timer.start_once(delay);
        }
    }

    fn fire_timer_now(&self) {
        if let Some(timer) = self.timer.lock().as_ref() {
            timer.fire_now();
        }
    }

    // ── Response handling (scheduler thread) ──────────────────

    fn handle_event(&self) {
        let taken = self.with_state(|s| match core::mem::replace(&mut s.slot, Slot::CheckedOut) {
            Slot::Parked(command) if command.has_sent() => Some(command),
            other => {
                s.slot = other;
                None
            }
        });
        let Some(mut command) = taken else {
            return;
        };

        let mut outcome = command.response().status();
        if outcome.is_ok() && command.response_wait_ms() > 0 {
            outcome = match self.read_response(&mut command) {
                Err(Error::StillProcessing) => {
                    self.with_state(|s| s.slot = Slot::Parked(command));
                    self.arm_timer(Duration::from_millis(u64::from(
                        self.config.timing.still_processing_backoff_ms,
                    )));
                    return;
                }
                Ok(text) => {
                    trace!("{}: '{}' answered '{}'", self.name, command.text(), text);
                    command.response_mut().parse(&text)
                }
                Err(e) => Err(e),
            };
        }

        if let Err(e) = outcome {
            if e == Error::Interrupted {
                debug!("{}: command '{}' interrupted", self.name, command.text());
            } else {
                error!("{}: command '{}' failed: {}", self.name, command.text(), e);
            }
            command.response_mut().set_status(outcome);
            command.set_behavior(command.behavior().after(outcome));
        }

        command.run_processing(self);
        // A stopped driver finishes the in-flight cycle with its own result
        // but never cycles it again.
        if self.is_stopped() && command.behavior() != CompletionBehavior::Dequeue {
            command.set_behavior(CompletionBehavior::Dequeue);
            self.with_state(|s| s.reading_active = false);
        }
        self.complete(command);
        self.send();
    }

    fn complete(&self, mut command: Box<Command>) {
        match command.behavior() {
            CompletionBehavior::Dequeue => {
                trace!("{}: dequeue '{}'", self.name, command.text());
                command.invoke_callback(self);
                self.with_state(|s| s.slot = Slot::Empty);
                command.wake_waiter();
            }
            CompletionBehavior::Reenqueue => {
                trace!("{}: reenqueue '{}'", self.name, command.text());
                command.invoke_callback(self);
                command.wake_waiter();
                command.prepare_for_reuse();
                self.with_state(|s| {
                    s.slot = Slot::Empty;
                    s.enqueue(command);
                });
            }
            CompletionBehavior::Resend => {
                trace!("{}: resend '{}'", self.name, command.text());
                command.prepare_for_reuse();
                self.with_state(|s| s.slot = Slot::Parked(command));
            }
        }
    }

    /// Read and classify one frame, returning its text.
    fn read_response(&self, command: &mut Command) -> Result<String> {
        let frame = if self.config.simulator_enabled {
            command.simulate(self)
        } else {
            let device = self.with_state(|s| s.device).ok_or(Error::Io)?;
            let mut frame = [0u8; FRAME_SIZE];
            self.transport.read(device, &mut frame, self.transport_timeout())?;
            frame
        };

        match Status::from_byte(frame[0]) {
            Status::Success => trace!("{}: request succeeded", self.name),
            Status::SyntaxError => error!("{}: syntax error", self.name),
            Status::StillProcessing => warn!("{}: still processing, not ready", self.name),
            Status::NoData => error!("{}: no data to send", self.name),
            Status::Unexpected(byte) => {
                error!("{}: unexpected response byte {}, aborting", self.name, byte);
            }
        }

        let decoded = decode_frame(&frame);
        if decoded.is_err() || self.config.dump_response_frames {
            debug!("{}: frame {:02x?}", self.name, frame);
        }
        decoded.map(str::to_owned)
    }

    /// Record and publish a successful reading response.
    ///
    /// A forced value replaces what [`last_reading`](Self::last_reading)
    /// reports; observers always receive the measured value.
    pub fn handle_reading(&self, response: &Response) {
        let Some(value) = self.model.convert_reading(response.text()) else {
            return;
        };
        let message = ReadingMessage {
            value,
            when: SystemTime::now(),
        };
        self.with_state(|s| {
            s.last_reading = Some(ReadingMessage {
                value: s.forced_value.unwrap_or(value),
                ..message
            });
        });
        self.observers.notify(&self.name, &message);
    }

    fn learn_info(&self, info: &DeviceInfo) {
        self.with_state(|s| {
            s.firmware = info.version;
            s.device_type = Some(info.device_type.clone());
        });
        info!(
            "{}: {} at 0x{:02x} has firmware version {}",
            self.name, info.device_type, self.address, info.firmware
        );
    }

    // ── Reading loop ──────────────────────────────────────────

    /// Start the self-perpetuating background reading.  Idempotent.
    pub fn enqueue_send_get_reading(&self) -> Result<()> {
        let already = self.with_state(|s| core::mem::replace(&mut s.reading_active, true));
        if already {
            return Ok(());
        }
        let result = self.send_get_reading_with(false, None, Priority::READ, CompletionBehavior::Reenqueue);
        if result.is_err() {
            self.with_state(|s| s.reading_active = false);
        }
        result
    }

    pub fn send_get_reading(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        self.send_get_reading_with(synchronous, callback, Priority::DEFAULT, CompletionBehavior::Dequeue)
    }

    fn send_get_reading_with(
        &self,
        synchronous: bool,
        callback: Option<CompletionCallback>,
        priority: Priority,
        behavior: CompletionBehavior,
    ) -> Result<()> {
        let callback = callback.unwrap_or_else(|| {
            Box::new(|sensor: &AtlasSensor, response: &Response| {
                if response.is_ok() {
                    sensor.handle_reading(response);
                }
            })
        });
        let command = match self.model.compensation() {
            Some(compensation) => compensation.reading_command(self, callback, priority, behavior)?,
            None => self
                .command("r", ResponseBody::Raw, self.model.reading_response_wait_ms(self.timing()))?
                .with_priority(priority)
                .with_behavior(behavior)
                .on_complete(callback)
                .simulated_by(simulated_reading_frame),
        };
        self.submit(command, synchronous)
    }

    // ── Generic EZO commands ──────────────────────────────────

    fn default_wait(&self) -> u32 {
        self.config.timing.default_response_wait_ms
    }

    /// Build and submit a command with the default wait.
    fn send_simple(
        &self,
        text: impl Into<String>,
        response_wait_ms: u32,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        let mut command = self.command(text, ResponseBody::Raw, response_wait_ms)?;
        if let Some(callback) = callback {
            command = command.on_complete(callback);
        }
        self.submit(command, synchronous)
    }

    /// `baud,<n>`: switch the circuit to UART mode.  No response follows.
    pub fn send_baud(&self, baud: Baud, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        self.send_simple(format!("baud,{}", baud as u32), 0, synchronous, callback)
    }

    pub fn send_clear_calibration(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        self.send_simple("cal,clear", self.default_wait(), synchronous, callback)
    }

    /// Stream the calibration export.  The callback fires once, after
    /// `*done`.
    pub fn send_export(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        let callback = callback.unwrap_or_else(|| {
            Box::new(|sensor: &AtlasSensor, response: &Response| {
                let Some(export) = response.export().filter(|_| response.is_ok()) else {
                    return;
                };
                info!(
                    "{}: exported {} of {} strings",
                    sensor.name(),
                    export.strings.len(),
                    export.expected
                );
                for (i, chunk) in export.strings.iter().enumerate() {
                    info!("{}: export string {}: '{}'", sensor.name(), i, chunk);
                }
            })
        });

        let command = self
            .command("export,?", ResponseBody::export(), self.default_wait())?
            .with_prefix("?export,")
            .with_behavior(CompletionBehavior::Resend)
            .on_complete(callback)
            .after_response(|_, command| {
                if !command.response().is_ok() {
                    return;
                }
                let (header_only, done) = match command.response().export() {
                    Some(p) => (p.has_header() && p.strings.is_empty(), p.done),
                    None => return,
                };
                if header_only {
                    command.set_text("export");
                }
                if done {
                    command.set_behavior(CompletionBehavior::Dequeue);
                }
            });
        self.submit(command, synchronous)
    }

    /// `factory`: the circuit reboots without answering.
    pub fn send_factory_reset(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        let callback = callback.unwrap_or_else(|| {
            Box::new(|sensor: &AtlasSensor, _: &Response| {
                info!("{}: factory reset sent", sensor.name());
            })
        });
        self.send_simple("factory", 0, synchronous, Some(callback))
    }

    /// `find`: blink the LED.
    pub fn send_find(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        self.send_simple("find", self.default_wait(), synchronous, callback)
    }

    /// `cal,?`: number of calibration points.
    pub fn send_get_calibration(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        let callback = callback.unwrap_or_else(|| {
            Box::new(|sensor: &AtlasSensor, response: &Response| match response.error() {
                None => debug!("{}: calibration points {:?}", sensor.name(), response.as_int()),
                Some(e) => error!("{}: get calibration failed: {}", sensor.name(), e),
            })
        });
        let command = self
            .command("cal,?", ResponseBody::int(), self.default_wait())?
            .with_prefix("?cal,")
            .on_complete(callback)
            .simulated_by(|_| success_frame("?CAL,0"));
        self.submit(command, synchronous)
    }

    /// `i`: device type and firmware version.  The default callback records
    /// both on the driver.
    pub fn send_get_info(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        let callback = callback.unwrap_or_else(|| {
            Box::new(|sensor: &AtlasSensor, response: &Response| {
                if let Some(info) = response.info().filter(|_| response.is_ok()) {
                    sensor.learn_info(info);
                }
            })
        });
        let command = self
            .command("i", ResponseBody::info(), self.default_wait())?
            .with_prefix("?i,")
            .on_complete(callback)
            .simulated_by(|sensor| success_frame(&format!("?i,{},1.23", sensor.name())));
        self.submit(command, synchronous)
    }

    pub fn send_get_led(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        let callback = callback.unwrap_or_else(|| log_flag("LED"));
        let command = self
            .command("l,?", ResponseBody::bool(), self.default_wait())?
            .with_prefix("?l,")
            .on_complete(callback);
        self.submit(command, synchronous)
    }

    pub fn send_get_name(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        let callback = callback.unwrap_or_else(|| {
            Box::new(|sensor: &AtlasSensor, response: &Response| {
                if response.is_ok() {
                    info!("{}: device name is '{}'", sensor.name(), response.text());
                }
            })
        });
        let command = self
            .command("name,?", ResponseBody::Raw, self.default_wait())?
            .with_prefix("?name,")
            .on_complete(callback);
        self.submit(command, synchronous)
    }

    pub fn send_get_protocol_lock(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        let callback = callback.unwrap_or_else(|| log_flag("protocol lock"));
        let command = self
            .command("plock,?", ResponseBody::bool(), self.default_wait())?
            .with_prefix("?plock,")
            .on_complete(callback);
        self.submit(command, synchronous)
    }

    /// `status`: restart reason and supply voltage.
    pub fn send_get_status(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        let callback = callback.unwrap_or_else(|| {
            Box::new(|sensor: &AtlasSensor, response: &Response| {
                if let Some(status) = response.device_status().filter(|_| response.is_ok()) {
                    info!(
                        "{}: at 0x{:02x} restarted due to {}, voltage at Vcc {}",
                        sensor.name(),
                        sensor.address(),
                        status.restart_reason,
                        status.vcc
                    );
                }
            })
        });
        let command = self
            .command("status", ResponseBody::status(), self.default_wait())?
            .with_prefix("?status,")
            .on_complete(callback)
            .simulated_by(|_| success_frame("?Status,P,5.038"));
        self.submit(command, synchronous)
    }

    /// Write calibration strings produced by an export, one per cycle.
    /// The callback fires once, after the last string.
    pub fn send_import(
        &self,
        strings: &[&str],
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        let Some((first, rest)) = strings.split_first() else {
            return Err(Error::InvalidArgument);
        };

        let mut body = ResponseBody::import(strings.iter().map(|s| (*s).to_owned()));
        if let ResponseBody::Import(progress) = &mut body {
            progress.remaining.pop_front();
            progress.sent = 1;
        }
        debug!("{}: importing {} strings", self.name, rest.len() + 1);

        let mut command = self
            .command(format!("import,{first}"), body, self.default_wait())?
            .with_priority(Priority::IMPORT)
            .with_behavior(CompletionBehavior::Resend)
            .after_response(|_, command| {
                if !command.response().is_ok() {
                    return;
                }
                let next = match command.response_mut().body_mut() {
                    ResponseBody::Import(progress) => {
                        let next = progress.remaining.pop_front();
                        if next.is_some() {
                            progress.sent += 1;
                        }
                        next
                    }
                    _ => None,
                };
                match next {
                    Some(chunk) => command.set_text(format!("import,{chunk}")),
                    None => command.set_behavior(CompletionBehavior::Dequeue),
                }
            });
        if let Some(callback) = callback {
            command = command.on_complete(callback);
        }
        self.submit(command, synchronous)
    }

    /// `i2c,<n>`: move the circuit to a new address.  It reboots without
    /// answering.
    pub fn send_set_i2c_address(
        &self,
        address: u8,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        if !(1..=127).contains(&address) {
            return Err(Error::OutOfRange);
        }
        self.send_simple(format!("i2c,{address}"), 0, synchronous, callback)
    }

    pub fn send_set_led(&self, enabled: bool, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        self.send_simple(format!("l,{}", u8::from(enabled)), self.default_wait(), synchronous, callback)
    }

    /// `name,<x>`: 1 to 16 characters.
    pub fn send_set_name(&self, name: &str, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        if name.is_empty() || name.chars().count() > MAX_DEVICE_NAME_LEN {
            return Err(Error::InvalidArgument);
        }
        self.send_simple(format!("name,{name}"), self.default_wait(), synchronous, callback)
    }

    pub fn send_set_protocol_lock(
        &self,
        enabled: bool,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        self.send_simple(format!("plock,{}", u8::from(enabled)), self.default_wait(), synchronous, callback)
    }

    /// `sleep`: low-power mode until the next command.  No response.
    pub fn send_sleep(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        self.send_simple("sleep", 0, synchronous, callback)
    }
}

fn log_flag(what: &'static str) -> CompletionCallback {
    Box::new(move |sensor: &AtlasSensor, response: &Response| {
        if let Some(enabled) = response.as_bool().filter(|_| response.is_ok()) {
            info!(
                "{}: {} is {}enabled",
                sensor.name(),
                what,
                if enabled { "" } else { "not " }
            );
        }
    })
}

impl Drop for AtlasSensor {
    fn drop(&mut self) {
        let timer = self.timer.get_mut().take();
        drop(timer);
        self.release_device();
    }
}

impl core::fmt::Debug for AtlasSensor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AtlasSensor")
            .field("name", &self.name)
            .field("address", &format_args!("0x{:02x}", self.address))
            .finish_non_exhaustive()
    }
}
