//! Queued units of work against one EZO circuit.

use core::time::Duration;
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use super::frame::{Frame, success_frame};
use super::response::{Response, ResponseBody};
use super::sensor::AtlasSensor;
use crate::error::{Error, Result};
use crate::queue::Prioritized;

// ───────────────────────────────────────────────────────────────
// Priority / completion policy
// ───────────────────────────────────────────────────────────────

/// Queue priority.  Higher dequeues first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i32);

impl Priority {
    pub const DEFAULT: Self = Self(0);
    /// Chunked imports jump ahead of ordinary traffic.
    pub const IMPORT: Self = Self(1);
    /// The background reading loop yields to everything else.
    pub const READ: Self = Self(-1);
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// What happens to a command once its response has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionBehavior {
    /// Call the callback, then drop the command.
    Dequeue,
    /// Call the callback, reset, and queue the command again by priority.
    Reenqueue,
    /// No callback; reset and send the command again from the slot.
    Resend,
}

impl CompletionBehavior {
    /// Behavior to apply after a cycle that ended with `outcome`.
    ///
    /// Failures end the command unless it is a reenqueued background
    /// command, which keeps cycling.
    pub const fn after(self, outcome: Result<()>) -> Self {
        match (self, outcome) {
            (Self::Reenqueue, _) => Self::Reenqueue,
            (_, Err(_)) => Self::Dequeue,
            (behavior, Ok(())) => behavior,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Hooks
// ───────────────────────────────────────────────────────────────

/// Completion callback.  Runs on the scheduler thread with no driver
/// lock held; it must not block on a synchronous send.
pub type CompletionCallback = Box<dyn FnMut(&AtlasSensor, &Response) + Send>;

/// Runs right before the command text is written; may rewrite it.
pub type PreSendHook = Box<dyn FnMut(&AtlasSensor, &mut Command) -> Result<()> + Send>;

/// Runs after the response is parsed and before the completion behavior
/// is applied; may change the behavior.
pub type ProcessingHook = Box<dyn FnMut(&AtlasSensor, &mut Command) + Send>;

/// Produces the response frame in simulator mode.
pub type ResponseSimulator = Box<dyn FnMut(&AtlasSensor) -> Frame + Send>;

/// One-shot rendezvous for a synchronous caller.
pub(crate) type Completion = Signal<CriticalSectionRawMutex, Result<()>>;

// ───────────────────────────────────────────────────────────────
// Command
// ───────────────────────────────────────────────────────────────

pub struct Command {
    text: String,
    priority: Priority,
    response_wait_ms: u32,
    behavior: CompletionBehavior,
    response: Response,
    has_sent: bool,
    callback: Option<CompletionCallback>,
    pre_send: Option<PreSendHook>,
    processing: Option<ProcessingHook>,
    simulator: Option<ResponseSimulator>,
    waiter: Option<Arc<Completion>>,
}

impl Command {
    /// A dequeue-once command at default priority.
    pub fn new(text: impl Into<String>, body: ResponseBody, response_wait_ms: u32) -> Self {
        Self {
            text: text.into(),
            priority: Priority::DEFAULT,
            response_wait_ms,
            behavior: CompletionBehavior::Dequeue,
            response: Response::new(body),
            has_sent: false,
            callback: None,
            pre_send: None,
            processing: None,
            simulator: None,
            waiter: None,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: &'static str) -> Self {
        self.response = self.response.with_prefix(prefix);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_behavior(mut self, behavior: CompletionBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    #[must_use]
    pub fn on_complete(mut self, callback: CompletionCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    #[must_use]
    pub fn before_send(
        mut self,
        hook: impl FnMut(&AtlasSensor, &mut Command) -> Result<()> + Send + 'static,
    ) -> Self {
        self.pre_send = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn after_response(
        mut self,
        hook: impl FnMut(&AtlasSensor, &mut Command) + Send + 'static,
    ) -> Self {
        self.processing = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn simulated_by(
        mut self,
        simulator: impl FnMut(&AtlasSensor) -> Frame + Send + 'static,
    ) -> Self {
        self.simulator = Some(Box::new(simulator));
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn response_wait(&self) -> Duration {
        Duration::from_millis(u64::from(self.response_wait_ms))
    }

    /// Zero means the device answers nothing, not even a status byte.
    pub fn response_wait_ms(&self) -> u32 {
        self.response_wait_ms
    }

    pub fn set_response_wait_ms(&mut self, ms: u32) {
        self.response_wait_ms = ms;
    }

    pub fn behavior(&self) -> CompletionBehavior {
        self.behavior
    }

    pub fn set_behavior(&mut self, behavior: CompletionBehavior) {
        self.behavior = behavior;
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn has_sent(&self) -> bool {
        self.has_sent
    }

    pub fn set_simulator(&mut self, simulator: ResponseSimulator) {
        self.simulator = Some(simulator);
    }

    /// Clear transient state before the command goes out again.
    pub fn prepare_for_reuse(&mut self) {
        self.response.set_status(Err(Error::NoData));
        self.has_sent = false;
    }

    pub(crate) fn mark_sent(&mut self) {
        self.has_sent = true;
    }

    pub(crate) fn attach_waiter(&mut self, waiter: Arc<Completion>) {
        self.waiter = Some(waiter);
    }

    /// Wake a blocked synchronous caller with the current status.
    /// A waiter is woken at most once.
    pub(crate) fn wake_waiter(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            waiter.signal(self.response.status());
        }
    }

    pub(crate) fn run_pre_send(&mut self, sensor: &AtlasSensor) -> Result<()> {
        let Some(mut hook) = self.pre_send.take() else {
            return Ok(());
        };
        let result = hook(sensor, self);
        self.pre_send = Some(hook);
        result
    }

    pub(crate) fn run_processing(&mut self, sensor: &AtlasSensor) {
        if let Some(mut hook) = self.processing.take() {
            hook(sensor, self);
            self.processing = Some(hook);
        }
    }

    pub(crate) fn invoke_callback(&mut self, sensor: &AtlasSensor) {
        if let Some(callback) = self.callback.as_mut() {
            callback(sensor, &self.response);
        }
    }

    /// Frame this command would receive in simulator mode.
    pub(crate) fn simulate(&mut self, sensor: &AtlasSensor) -> Frame {
        match self.simulator.as_mut() {
            Some(simulator) => simulator(sensor),
            None => success_frame(""),
        }
    }
}

impl Prioritized for Command {
    fn priority(&self) -> i32 {
        self.priority.0
    }
}

impl core::fmt::Debug for Command {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Command")
            .field("text", &self.text)
            .field("priority", &self.priority)
            .field("behavior", &self.behavior)
            .field("has_sent", &self.has_sent)
            .field("status", &self.response.status())
            .finish_non_exhaustive()
    }
}
