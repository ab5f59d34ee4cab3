use bytes::Buf;
use std::io::Cursor;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::frame::STR_LENGTH_PREFIX;
use crate::RelayError;

pub mod request;
pub mod response;

/// length of a relay message header (8 bytes)
pub const HEADER_LEN: usize = 8;

/// length of the message code, counted in the header length prefix
pub const CODE_LEN: u32 = 4;

/// Frames announcing a payload bigger than this are rejected, the connection cannot recover from it.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// # Relay message header
///
/// | content length   | message code    |
/// | :-------------: | :-------------: |
/// | [u32] (4 bytes) | [u32] (4 bytes) |
///
/// The content length counts the message code and the payload. We use this to known incoming
/// message length and code before parsing them and consuming the buffer.
/// Parsing the header through a [`Cursor`] preserves the buffer while the whole message has not
/// been received, this way we can reset the cursor and retry later.
///
/// [`Cursor`]: std::io::Cursor
#[derive(Debug)]
pub struct Header {
    pub code: u32,
    pub message_len: usize,
}

impl Header {
    pub fn read(src: &mut Cursor<&[u8]>) -> crate::Result<Self> {
        let message_length = src.get_u32_le();
        let code = src.get_u32_le();

        // The frame boundary is lost, the connection cannot be read any further
        if message_length < CODE_LEN {
            return Err(RelayError::from(format!(
                "announced length {} is shorter than the message code",
                message_length
            )));
        }

        // We can subtract message code from the length since we already know it
        let message_len = (message_length - CODE_LEN) as usize;

        Ok(Self { code, message_len })
    }

    pub(crate) async fn write<W>(
        code: u32,
        payload_len: u32,
        buffer: &mut BufWriter<W>,
    ) -> tokio::io::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        buffer.write_u32_le(payload_len + CODE_LEN).await?;
        buffer.write_u32_le(code).await
    }
}

/// A payload published on a relay channel.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: String,
}

impl ChannelMessage {
    pub fn new(channel: &str, payload: String) -> Self {
        ChannelMessage {
            channel: channel.to_string(),
            payload,
        }
    }

    /// Whether publishing this message stays within [`MAX_FRAME_LEN`], both as a publish
    /// request and as the message frame pushed to subscribers.
    pub fn fits_in_frame(&self) -> bool {
        2 * STR_LENGTH_PREFIX as usize + self.channel.len() + self.payload.len() <= MAX_FRAME_LEN
    }
}
