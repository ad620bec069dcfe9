//! EZO response frame codec.
//!
//! Every read returns a fixed 42-byte frame:
//!
//! ```text
//! ┌────────┬──────────────────────────────────────────┬─────┐
//! │ status │ ASCII text (at most 39 bytes)             │ NUL │
//! └────────┴──────────────────────────────────────────┴─────┘
//!    [0]              [1 ..]                      first 0x00
//! ```
//!
//! | status | meaning                          | result                 |
//! |--------|----------------------------------|------------------------|
//! | 1      | success                          | text                   |
//! | 2      | syntax error                     | `InvalidArgument`      |
//! | 254    | still processing, poll again     | `StillProcessing`      |
//! | 255    | no data to send                  | `NoData`               |
//! | other  | unexpected                       | `MalformedMessage`     |

use crate::error::{Error, Result};

/// Bytes per response frame: status + 40 text bytes + terminator.
pub const FRAME_SIZE: usize = 42;

/// Longest text a frame can carry ahead of its terminator.
pub const MAX_TEXT_LEN: usize = FRAME_SIZE - 3;

pub type Frame = [u8; FRAME_SIZE];

/// First byte of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    SyntaxError,
    StillProcessing,
    NoData,
    Unexpected(u8),
}

impl Status {
    pub const SUCCESS: u8 = 1;
    pub const SYNTAX_ERROR: u8 = 2;
    pub const STILL_PROCESSING: u8 = 254;
    pub const NO_DATA: u8 = 255;

    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            Self::SUCCESS => Self::Success,
            Self::SYNTAX_ERROR => Self::SyntaxError,
            Self::STILL_PROCESSING => Self::StillProcessing,
            Self::NO_DATA => Self::NoData,
            other => Self::Unexpected(other),
        }
    }

    pub const fn into_result(self) -> Result<()> {
        match self {
            Self::Success => Ok(()),
            Self::SyntaxError => Err(Error::InvalidArgument),
            Self::StillProcessing => Err(Error::StillProcessing),
            Self::NoData => Err(Error::NoData),
            Self::Unexpected(_) => Err(Error::MalformedMessage),
        }
    }
}

/// Classify `frame` and return its text.
///
/// The text runs from byte 1 up to the first NUL.  A frame whose text is
/// not terminated before the last byte is `NoSpace`; text that is not
/// UTF-8 is `MalformedMessage`.
pub fn decode_frame(frame: &[u8]) -> Result<&str> {
    let (&status, body) = frame.split_first().ok_or(Error::NoData)?;
    Status::from_byte(status).into_result()?;

    let limit = body.len().min(FRAME_SIZE - 2);
    let end = body[..limit]
        .iter()
        .position(|&b| b == 0)
        .ok_or(Error::NoSpace)?;

    core::str::from_utf8(&body[..end]).map_err(|_| Error::MalformedMessage)
}

/// Build a frame carrying `status` and `text`.
///
/// Text longer than [`MAX_TEXT_LEN`] is truncated.  Used by response
/// simulators and test buses.
pub fn encode_frame(status: u8, text: &str) -> Frame {
    let mut frame = [0u8; FRAME_SIZE];
    frame[0] = status;
    let len = text.len().min(MAX_TEXT_LEN);
    frame[1..=len].copy_from_slice(&text.as_bytes()[..len]);
    frame
}

/// Successful frame carrying `text`.
pub fn success_frame(text: &str) -> Frame {
    encode_frame(Status::SUCCESS, text)
}
