//! Wire format of the Hyperion master: length-prefixed frames carrying a
//! self-describing CBOR envelope of `(action, args)`.
//!
//! A frame is a 4-byte big-endian payload length followed by exactly that
//! many payload bytes. Frames with a present `action` are requests or
//! responses; frames without one carry a structured log record shipped from
//! a slave.

pub use ciborium::Value;

pub use frame::{arg, encode, encode_request, from_value, opt_arg, to_value, Envelope};
pub use stream::Decoder;

pub mod actions;
mod frame;
mod stream;

use std::io;

use thiserror::Error;

/// Number of bytes in the frame length header.
pub const HEADER_LEN: usize = 4;

/// Upper bound on a single payload. Anything larger is treated as a
/// corrupted stream rather than a message.
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

/// An error occurring while encoding or decoding wire frames.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to serialize a payload.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] ciborium::ser::Error<io::Error>),

    /// The payload bytes are not a valid envelope.
    #[error("failed to decode payload: {0}")]
    Decode(#[from] ciborium::de::Error<io::Error>),

    /// A value could not be converted to or from its typed form.
    #[error("failed to convert value: {0}")]
    Value(#[from] ciborium::value::Error),

    /// The length header exceeds [`MAX_FRAME_SIZE`].
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_SIZE} byte limit")]
    OversizedFrame(usize),

    /// The length header is zero.
    #[error("frame carries no payload")]
    EmptyFrame,

    /// An expected positional argument is absent.
    #[error("expected argument at position {0}")]
    MissingArg(usize),
}

impl Error {
    /// Whether the stream itself is broken. Framing errors drop the
    /// connection; everything else is recoverable on the same stream.
    pub fn is_framing(&self) -> bool {
        matches!(self, Error::OversizedFrame(_) | Error::EmptyFrame)
    }
}
