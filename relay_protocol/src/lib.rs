#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate async_trait;
#[macro_use]
extern crate tracing;

use std::{fmt, io::Cursor, string::FromUtf8Error};

use bytes::Buf;

use crate::message::{Header, HEADER_LEN, MAX_FRAME_LEN};

/// The relay broker: channel registry, shared key space and the TCP listener serving them.
pub mod broker;
pub mod client;
pub mod connection;
pub mod frame;
/// Every relay frame, see [`RelayRequest`] and [`RelayResponse`] for a detailed explanation
/// of each one.
///
///  [`RelayRequest`]: crate::message::request::RelayRequest
///  [`RelayResponse`]: crate::message::response::RelayResponse
pub mod message;

pub type Result<T> = std::result::Result<T, RelayError>;
pub type Error = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
pub enum RelayError {
    /// Not enough data is available to parse a message
    Incomplete,
    /// The announced frame length exceeds [`MAX_FRAME_LEN`]
    FrameTooLarge(usize),
    /// Peer closed the socket in the middle of a frame
    ConnectionReset,
    /// A complete frame was received but its content is invalid
    Malformed(String),
    /// The broker answered with an unexpected frame kind
    UnexpectedResponse(String),
    /// The broker answered with an error frame
    Remote(String),

    Other(crate::Error),
}

impl From<String> for RelayError {
    fn from(src: String) -> RelayError {
        RelayError::Other(src.into())
    }
}

impl From<&str> for RelayError {
    fn from(src: &str) -> RelayError {
        src.to_string().into()
    }
}

impl From<FromUtf8Error> for RelayError {
    fn from(_src: FromUtf8Error) -> RelayError {
        RelayError::Malformed("invalid utf-8 string".to_string())
    }
}

impl From<std::io::Error> for RelayError {
    fn from(src: std::io::Error) -> RelayError {
        match src.kind() {
            std::io::ErrorKind::InvalidData => RelayError::Malformed(src.to_string()),
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe => {
                RelayError::ConnectionReset
            }
            _ => RelayError::Other(Box::new(src)),
        }
    }
}

impl std::error::Error for RelayError {}

impl fmt::Display for RelayError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RelayError::Incomplete => "stream ended early".fmt(fmt),
            RelayError::FrameTooLarge(len) => {
                write!(fmt, "frame of {} bytes exceeds the {} bytes limit", len, MAX_FRAME_LEN)
            }
            RelayError::ConnectionReset => write!(fmt, "Connection reset by peer"),
            RelayError::Malformed(reason) => write!(fmt, "Malformed frame : {}", reason),
            RelayError::UnexpectedResponse(kind) => {
                write!(fmt, "Unexpected response from relay : {}", kind)
            }
            RelayError::Remote(reason) => write!(fmt, "Relay error : {}", reason),
            RelayError::Other(err) => err.fmt(fmt),
        }
    }
}

impl RelayError {
    /// Whether the connection can keep reading frames after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RelayError::Malformed(_))
    }
}

/// A relay frame : an 8 bytes [`Header`] followed by the message payload.
pub trait ProtocolMessage: Sized {
    fn check(src: &mut Cursor<&[u8]>) -> crate::Result<Header> {
        // Check if the buffer contains enough bytes to parse the message header
        if src.remaining() < HEADER_LEN {
            return Err(RelayError::Incomplete);
        }

        let header = Header::read(src)?;

        if header.message_len > MAX_FRAME_LEN {
            return Err(RelayError::FrameTooLarge(header.message_len));
        }

        // Check if the buffer contains the full message already
        if src.remaining() < header.message_len {
            Err(RelayError::Incomplete)
        } else {
            Ok(header)
        }
    }

    /// Parse the message payload, `src` holds exactly `header.message_len` bytes.
    fn parse(src: &mut Cursor<&[u8]>, header: &Header) -> std::io::Result<Self>;

    /// Pretty print the message kind for logging purpose
    fn kind(&self) -> &str;
}
