//! Adapters — concrete implementations of the port traits.
//!
//! | Adapter    | Implements       | Connects to                   |
//! |------------|------------------|-------------------------------|
//! | `i2c`      | Transport        | any `embedded-hal` 1.0 I2C bus |
//! | `log_sink` | ReadingObserver  | `log` output                  |

pub mod i2c;
pub mod log_sink;

pub use i2c::I2cBus;
pub use log_sink::LogObserver;
