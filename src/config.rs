//! Driver configuration parameters
//!
//! All hardware timing assumptions of the EZO circuits live here rather
//! than in the state machine.  The defaults are the values the probes
//! were tuned against; deployments may override them from JSON.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Timing parameters for the command state machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Wait after writing an ordinary command before polling the response (ms)
    pub default_response_wait_ms: u32,
    /// Wait after a plain `r` reading command (ms)
    pub reading_response_wait_ms: u32,
    /// Wait after a temperature-compensated reading (`rt,` or a pH `r`) (ms)
    pub compensated_reading_response_wait_ms: u32,
    /// Wait after a `t,<temp>` set-compensation command (ms)
    pub set_temperature_response_wait_ms: u32,
    /// Wait after a calibration command (ms)
    pub calibration_response_wait_ms: u32,
    /// Re-poll interval while the device answers "still processing" (ms)
    pub still_processing_backoff_ms: u32,
    /// Per-transfer transport timeout (ms)
    pub transport_timeout_ms: u32,
    /// How often `stop()` re-checks that the queue has drained (ms)
    pub stop_poll_interval_ms: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            default_response_wait_ms: 300,
            reading_response_wait_ms: 600,
            compensated_reading_response_wait_ms: 900,
            set_temperature_response_wait_ms: 300,
            calibration_response_wait_ms: 600,
            still_processing_backoff_ms: 100,
            transport_timeout_ms: 1000,
            stop_poll_interval_ms: 1000,
        }
    }
}

impl TimingConfig {
    /// Reject values that would stall or spin the state machine.
    pub fn validate(&self) -> Result<()> {
        if self.still_processing_backoff_ms == 0 {
            return Err(Error::Config("still_processing_backoff_ms must be non-zero"));
        }
        if self.stop_poll_interval_ms == 0 {
            return Err(Error::Config("stop_poll_interval_ms must be non-zero"));
        }
        if self.transport_timeout_ms == 0 {
            return Err(Error::Config("transport_timeout_ms must be non-zero"));
        }
        Ok(())
    }
}

/// Per-driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub timing: TimingConfig,
    /// Log every command text at `info` as it is written.
    pub log_sent_commands: bool,
    /// Hex-dump every response frame, not only failing ones.
    pub dump_response_frames: bool,
    /// Skip the bus entirely and answer commands from response simulators.
    pub simulator_enabled: bool,
    /// Treat RTD readings outside -10..110 C as a disconnected probe and
    /// report 20 C instead.
    pub clamp_rtd_temperature: bool,
}

impl DriverConfig {
    pub fn validate(&self) -> Result<()> {
        self.timing.validate()
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|_| Error::Config("malformed JSON"))?;
        config.validate()?;
        Ok(config)
    }

    /// Compact binary form for persisting next to calibration data.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|_| Error::Config("encode failed"))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let config: Self =
            postcard::from_bytes(bytes).map_err(|_| Error::Config("malformed config blob"))?;
        config.validate()?;
        Ok(config)
    }
}
