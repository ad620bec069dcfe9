//! ezoctl — command runtime for Atlas Scientific EZO circuits.
//!
//! Exposes the driver state machine, the dispatch run-loop it runs on,
//! the concrete pH / EC / RTD circuits and the adapters that connect
//! them to a bus and to reading consumers.

#![deny(unused_must_use)]

pub mod adapters;
pub mod config;
pub mod dispatch;
pub mod ezo;
pub mod observe;
pub mod ports;
pub mod queue;
pub mod sensors;

mod error;

pub use error::{Error, Result};
