//! Typed EZO responses.
//!
//! A [`Response`] starts as "no data yet" and is filled in by the state
//! machine once the command's frame arrives.  The shape of the parsed
//! payload is fixed when the command is built: every command picks one
//! [`ResponseBody`] variant and the parser for that variant runs over the
//! frame text left after the echo prefix (`"?I,"`, `"?T,"`, ...) has
//! been verified and stripped.

use core::fmt;

use heapless::String as FixedString;

use crate::error::{Error, Result};

/// Bytes per exported calibration string.
pub const EXPORT_STRING_LEN: usize = 12;

pub type ExportString = FixedString<EXPORT_STRING_LEN>;

// ───────────────────────────────────────────────────────────────
// Payload types
// ───────────────────────────────────────────────────────────────

/// Firmware version reported by `i`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
}

impl FirmwareVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse `"M.m"`.  Unparseable parts are left at zero.
    pub fn parse(text: &str) -> Self {
        let mut parts = text.trim().splitn(2, '.');
        let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let minor = parts.next().and_then(|p| leading_digits(p).parse().ok()).unwrap_or(0);
        Self { major, minor }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Answer to `i`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    pub device_type: String,
    pub firmware: String,
    pub version: FirmwareVersion,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartReason {
    Brownout,
    PowerOff,
    SoftwareReset,
    Watchdog,
    #[default]
    Unknown,
}

impl RestartReason {
    fn from_code(code: u8) -> Option<Self> {
        match code.to_ascii_lowercase() {
            b'b' => Some(Self::Brownout),
            b'p' => Some(Self::PowerOff),
            b's' => Some(Self::SoftwareReset),
            b'w' => Some(Self::Watchdog),
            b'u' => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Brownout => "brownout",
            Self::PowerOff => "power off",
            Self::SoftwareReset => "software reset",
            Self::Watchdog => "watchdog",
            Self::Unknown => "unknown",
        })
    }
}

/// Answer to `status`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStatus {
    pub restart_reason: RestartReason,
    /// Supply voltage exactly as the device printed it.
    pub vcc: String,
}

/// Streaming state of a chunked `export`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportProgress {
    pub expected: usize,
    pub bytes: usize,
    pub strings: Vec<ExportString>,
    pub done: bool,
    has_header: bool,
}

impl ExportProgress {
    pub fn has_header(&self) -> bool {
        self.has_header
    }

    /// Consume one response of the stream.
    ///
    /// The first is the `"N,bytes"` header (already prefix-stripped);
    /// the next `N` are raw strings; the last must be `*done`.
    fn accept(&mut self, text: &str) -> Result<()> {
        if !self.has_header {
            let mut fields = text.split(',');
            let expected: usize = parse_field(fields.next())?;
            let bytes: usize = parse_field(fields.next())?;
            if expected == 0 {
                return Err(Error::MalformedMessage);
            }
            self.expected = expected;
            self.bytes = bytes;
            self.strings = Vec::with_capacity(expected);
            self.has_header = true;
        } else if self.strings.len() < self.expected {
            let mut chunk = ExportString::new();
            for c in text.chars() {
                if chunk.push(c).is_err() {
                    break;
                }
            }
            self.strings.push(chunk);
        } else if text.eq_ignore_ascii_case("*done") {
            self.done = true;
        } else {
            return Err(Error::MalformedMessage);
        }
        Ok(())
    }
}

/// Streaming state of a chunked `import`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportProgress {
    /// Strings not yet written, in order.
    pub remaining: std::collections::VecDeque<String>,
    pub sent: usize,
    pub total: usize,
}

/// Answer to `slope,?` on a pH circuit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Slope {
    /// Acid calibration match against an ideal probe (%).
    pub acid_percent: f64,
    /// Base calibration match against an ideal probe (%).
    pub base_percent: f64,
    /// Zero-point offset (mV).
    pub zero_offset_mv: f64,
}

/// Answer to `o,?` on a conductivity circuit: which outputs are enabled
/// and at which comma-separated position each appears in a reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputParameters {
    pub conductivity: Option<usize>,
    pub total_dissolved_solids: Option<usize>,
    pub salinity: Option<usize>,
    pub specific_gravity: Option<usize>,
}

/// One data-logger memory entry on an RTD circuit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryValue {
    pub index: i32,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TemperatureScale {
    #[default]
    Celsius,
    Fahrenheit,
    Kelvin,
}

impl TemperatureScale {
    pub const fn code(self) -> char {
        match self {
            Self::Celsius => 'c',
            Self::Fahrenheit => 'f',
            Self::Kelvin => 'k',
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code.to_ascii_lowercase() {
            b'c' => Some(Self::Celsius),
            b'f' => Some(Self::Fahrenheit),
            b'k' => Some(Self::Kelvin),
            _ => None,
        }
    }
}

impl fmt::Display for TemperatureScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Celsius => "celsius",
            Self::Fahrenheit => "fahrenheit",
            Self::Kelvin => "kelvin",
        })
    }
}

// ───────────────────────────────────────────────────────────────
// Response body
// ───────────────────────────────────────────────────────────────

/// Parsed payload, one variant per command kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// No fields; the text is available through [`Response::text`].
    Raw,
    Bool(bool),
    Int(i32),
    Double(f64),
    Info(DeviceInfo),
    Status(DeviceStatus),
    Export(ExportProgress),
    Import(ImportProgress),
    Slope(Slope),
    Parameters(OutputParameters),
    Memory(MemoryValue),
    TemperatureScale(TemperatureScale),
}

impl ResponseBody {
    pub fn bool() -> Self {
        Self::Bool(false)
    }

    pub fn int() -> Self {
        Self::Int(0)
    }

    pub fn double() -> Self {
        Self::Double(0.0)
    }

    pub fn info() -> Self {
        Self::Info(DeviceInfo::default())
    }

    pub fn status() -> Self {
        Self::Status(DeviceStatus::default())
    }

    pub fn export() -> Self {
        Self::Export(ExportProgress::default())
    }

    pub fn import(remaining: impl IntoIterator<Item = String>) -> Self {
        let remaining: std::collections::VecDeque<String> = remaining.into_iter().collect();
        Self::Import(ImportProgress {
            total: remaining.len(),
            remaining,
            sent: 0,
        })
    }

    pub fn slope() -> Self {
        Self::Slope(Slope::default())
    }

    pub fn parameters() -> Self {
        Self::Parameters(OutputParameters::default())
    }

    pub fn memory() -> Self {
        Self::Memory(MemoryValue::default())
    }

    pub fn temperature_scale() -> Self {
        Self::TemperatureScale(TemperatureScale::default())
    }

    /// Parse prefix-stripped `text` into this variant.
    pub fn parse(&mut self, text: &str) -> Result<()> {
        match self {
            Self::Raw | Self::Import(_) => Ok(()),
            Self::Bool(value) => {
                *value = match text.as_bytes().first() {
                    Some(b'0') => false,
                    Some(b'1') => true,
                    _ => return Err(Error::MalformedMessage),
                };
                Ok(())
            }
            Self::Int(value) => {
                *value = parse_field(Some(text))?;
                Ok(())
            }
            Self::Double(value) => {
                *value = parse_field(Some(text))?;
                Ok(())
            }
            Self::Info(info) => {
                let mut fields = text.split(',');
                let device_type = fields.next().ok_or(Error::MalformedMessage)?;
                let firmware = fields.next().ok_or(Error::MalformedMessage)?;
                info.device_type = device_type.to_owned();
                info.firmware = firmware.to_owned();
                info.version = FirmwareVersion::parse(firmware);
                Ok(())
            }
            Self::Status(status) => {
                let bytes = text.as_bytes();
                let reason = bytes
                    .first()
                    .and_then(|&c| RestartReason::from_code(c))
                    .ok_or(Error::MalformedMessage)?;
                if bytes.get(1) != Some(&b',') || bytes.len() < 3 {
                    return Err(Error::MalformedMessage);
                }
                status.restart_reason = reason;
                status.vcc = text[2..].to_owned();
                Ok(())
            }
            Self::Export(progress) => progress.accept(text),
            Self::Slope(slope) => {
                let mut fields = text.split(',');
                slope.acid_percent = parse_field(fields.next())?;
                slope.base_percent = parse_field(fields.next())?;
                slope.zero_offset_mv = parse_field(fields.next())?;
                Ok(())
            }
            Self::Parameters(params) => {
                *params = OutputParameters::default();
                for (index, name) in text.split(',').enumerate() {
                    let slot = if name.eq_ignore_ascii_case("ec") {
                        &mut params.conductivity
                    } else if name.eq_ignore_ascii_case("tds") {
                        &mut params.total_dissolved_solids
                    } else if name.eq_ignore_ascii_case("s") {
                        &mut params.salinity
                    } else if name.eq_ignore_ascii_case("sg") {
                        &mut params.specific_gravity
                    } else {
                        return Err(Error::MalformedMessage);
                    };
                    *slot = Some(index);
                }
                Ok(())
            }
            Self::Memory(memory) => {
                let mut fields = text.split(',');
                memory.index = parse_field(fields.next())?;
                memory.value = parse_field(fields.next())?;
                Ok(())
            }
            Self::TemperatureScale(scale) => {
                *scale = text
                    .as_bytes()
                    .first()
                    .and_then(|&c| TemperatureScale::from_code(c))
                    .ok_or(Error::MalformedMessage)?;
                Ok(())
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Response
// ───────────────────────────────────────────────────────────────

/// Result carrier of one command.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: Result<()>,
    prefix: Option<&'static str>,
    text: String,
    body: ResponseBody,
}

impl Response {
    pub fn new(body: ResponseBody) -> Self {
        Self {
            status: Err(Error::NoData),
            prefix: None,
            text: String::new(),
            body,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: &'static str) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Final status; `Err(NoData)` until a response has been handled.
    pub fn status(&self) -> Result<()> {
        self.status
    }

    pub fn error(&self) -> Option<Error> {
        self.status.err()
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    pub fn prefix(&self) -> Option<&'static str> {
        self.prefix
    }

    /// Frame text after the echo prefix.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Comma-separated fields of [`text`](Self::text), left to right.
    pub fn fields(&self) -> core::str::Split<'_, char> {
        self.text.split(',')
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.body {
            ResponseBody::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self.body {
            ResponseBody::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self.body {
            ResponseBody::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn info(&self) -> Option<&DeviceInfo> {
        match &self.body {
            ResponseBody::Info(v) => Some(v),
            _ => None,
        }
    }

    pub fn device_status(&self) -> Option<&DeviceStatus> {
        match &self.body {
            ResponseBody::Status(v) => Some(v),
            _ => None,
        }
    }

    pub fn export(&self) -> Option<&ExportProgress> {
        match &self.body {
            ResponseBody::Export(v) => Some(v),
            _ => None,
        }
    }

    pub fn import(&self) -> Option<&ImportProgress> {
        match &self.body {
            ResponseBody::Import(v) => Some(v),
            _ => None,
        }
    }

    pub fn slope(&self) -> Option<&Slope> {
        match &self.body {
            ResponseBody::Slope(v) => Some(v),
            _ => None,
        }
    }

    pub fn parameters(&self) -> Option<&OutputParameters> {
        match &self.body {
            ResponseBody::Parameters(v) => Some(v),
            _ => None,
        }
    }

    pub fn memory(&self) -> Option<&MemoryValue> {
        match &self.body {
            ResponseBody::Memory(v) => Some(v),
            _ => None,
        }
    }

    pub fn temperature_scale(&self) -> Option<TemperatureScale> {
        match self.body {
            ResponseBody::TemperatureScale(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn set_status(&mut self, status: Result<()>) {
        self.status = status;
    }

    /// Parse raw frame `text` and record the outcome as the status.
    pub fn parse(&mut self, text: &str) -> Result<()> {
        let outcome = self.parse_text(text);
        self.status = outcome;
        outcome
    }

    fn parse_text(&mut self, text: &str) -> Result<()> {
        // Export strings after the header carry no echo prefix.
        let streaming = matches!(&self.body, ResponseBody::Export(p) if p.has_header());
        let stripped = if streaming {
            text
        } else {
            strip_prefix(text, self.prefix)?
        };
        self.text.clear();
        self.text.push_str(stripped);
        self.body.parse(stripped)
    }
}

/// Verify and strip a case-insensitive echo `prefix`.
pub fn strip_prefix<'a>(text: &'a str, prefix: Option<&str>) -> Result<&'a str> {
    let Some(prefix) = prefix.filter(|p| !p.is_empty()) else {
        return Ok(text);
    };
    match text.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => Ok(&text[prefix.len()..]),
        _ => Err(Error::MalformedMessage),
    }
}

/// Parse one numeric field.  Surrounding whitespace is ignored.
fn parse_field<T: core::str::FromStr>(field: Option<&str>) -> Result<T> {
    field
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .and_then(|f| f.parse().ok())
        .ok_or(Error::MalformedMessage)
}

fn leading_digits(text: &str) -> &str {
    let end = text
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(text.len());
    &text[..end]
}
