//! Unified error type for the EZO sensor runtime.
//!
//! Every per-command failure is carried on the command's
//! [`Response`](crate::ezo::Response) and delivered to its completion
//! callback; synchronous callers receive the same value as their return.
//! All variants are `Copy` so they can be stored on a response, handed to
//! a blocked caller and logged without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No response has been received yet, or the device reported
    /// "no data to send" (status byte 255).
    NoData,
    /// The driver is stopped; the command was drained without being sent.
    Interrupted,
    /// The device rejected the command text (status byte 2), or a caller
    /// passed a malformed argument.
    InvalidArgument,
    /// The device is still computing its answer (status byte 254).
    /// Handled internally by backing off and polling again.
    StillProcessing,
    /// Unexpected status byte, prefix mismatch or unparseable fields.
    MalformedMessage,
    /// The response text did not fit inside a single frame.
    NoSpace,
    /// A numeric argument is outside the range the device accepts.
    OutOfRange,
    /// The device firmware does not support the requested command.
    NotSupported,
    /// The item is already registered.
    AlreadyExists,
    /// The transport timed out.
    Timeout,
    /// The transport failed.
    Io,
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoData => write!(f, "no data"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::StillProcessing => write!(f, "still processing"),
            Self::MalformedMessage => write!(f, "malformed message"),
            Self::NoSpace => write!(f, "response does not fit in frame"),
            Self::OutOfRange => write!(f, "out of range"),
            Self::NotSupported => write!(f, "not supported"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::Timeout => write!(f, "transport timed out"),
            Self::Io => write!(f, "transport I/O failure"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
