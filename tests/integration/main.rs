//! Integration test driver for `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that drives real sensor drivers on a
//! real scheduler thread against the scripted [`mock_bus::MockBus`].  All
//! tests run on the host with no hardware attached.

mod driver_tests;
mod mock_bus;
mod stop_tests;
