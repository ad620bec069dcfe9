//! Cooperative event dispatch.
//!
//! - [`EventSource`]: atomic event counter plus handler.
//! - [`Scheduler`]: run-loop thread that services its sources round-robin.
//! - [`TimerSource`]: one-shot / periodic expiries delivered as events.
//!
//! Sensor state machines have no threads of their own; everything they
//! do after a write is driven by timer events on a shared scheduler.

mod scheduler;
mod source;
mod timer;

pub use scheduler::Scheduler;
pub use source::{EventHandler, EventSource};
pub use timer::TimerSource;
