//! Concrete EZO circuits.
//!
//! Each wraps an [`AtlasSensor`](crate::ezo::AtlasSensor) with its own
//! command vocabulary, reading conversion and simulated readings.  pH and
//! EC deref to [`TemperatureCompensatedSensor`](crate::ezo::TemperatureCompensatedSensor);
//! the RTD derefs to the plain driver and doubles as their temperature
//! provider.

pub mod ec;
pub mod ph;
pub mod rtd;

pub use ec::AtlasEc;
pub use ph::AtlasPh;
pub use rtd::AtlasRtd;
