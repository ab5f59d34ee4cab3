use std::io::Cursor;

use tokio::io::{self, AsyncWrite, AsyncWriteExt, BufWriter};

use crate::frame::{read_string, read_u32, str_len, write_string, ToBytes, STR_LENGTH_PREFIX};
use crate::message::Header;
use crate::ProtocolMessage;

/// [u32] representation of the request codes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RequestCode {
    Ping = 1,
    Subscribe = 2,
    Unsubscribe = 3,
    Publish = 4,
    Get = 5,
    Set = 6,
    Delete = 7,
    Unknown,
}

impl From<u32> for RequestCode {
    fn from(value: u32) -> Self {
        match value {
            1 => RequestCode::Ping,
            2 => RequestCode::Subscribe,
            3 => RequestCode::Unsubscribe,
            4 => RequestCode::Publish,
            5 => RequestCode::Get,
            6 => RequestCode::Set,
            7 => RequestCode::Delete,
            _ => RequestCode::Unknown,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
/// All messages a client can send to the relay broker.
pub enum RelayRequest {
    ///  **Description** : Check the broker is alive.
    ///
    /// **Response** : [`RelayResponse::Pong`][`crate::message::response::RelayResponse::Pong`]
    Ping,
    ///  **Description** : Receive every message published on `channel` from now on.
    ///
    /// **Response** : [`RelayResponse::Subscribed`][`crate::message::response::RelayResponse::Subscribed`],
    /// then one [`RelayResponse::Message`][`crate::message::response::RelayResponse::Message`]
    /// per publication.
    Subscribe { channel: String },
    ///  **Description** : Stop receiving messages published on `channel`.
    ///
    /// **Response** : [`RelayResponse::Unsubscribed`][`crate::message::response::RelayResponse::Unsubscribed`]
    Unsubscribe { channel: String },
    ///  **Description** : Send `payload` to every subscriber of `channel`, publisher included if it
    ///  is subscribed.
    ///
    /// **Response** : [`RelayResponse::Published`][`crate::message::response::RelayResponse::Published`]
    Publish { channel: String, payload: String },
    ///  **Description** : Read a key from the shared key space.
    ///
    /// **Response** : [`RelayResponse::Value`][`crate::message::response::RelayResponse::Value`]
    Get { key: String },
    ///  **Description** : Write a key, `ttl_secs == 0` means the key never expires.
    ///
    /// **Response** : [`RelayResponse::Stored`][`crate::message::response::RelayResponse::Stored`]
    Set {
        key: String,
        value: String,
        ttl_secs: u32,
    },
    ///  **Description** : Remove a key from the shared key space.
    ///
    /// **Response** : [`RelayResponse::Deleted`][`crate::message::response::RelayResponse::Deleted`]
    Delete { key: String },
    /// A request with a code this broker does not know about.
    Unknown(u32),
}

impl RelayRequest {
    /// Length of the encoded request, header excluded. Compare it with [`MAX_FRAME_LEN`] before
    /// sending, the broker drops connections announcing bigger frames.
    ///
    /// [`MAX_FRAME_LEN`]: crate::message::MAX_FRAME_LEN
    pub fn payload_len(&self) -> usize {
        let prefixed = |src: &str| STR_LENGTH_PREFIX as usize + src.len();

        match self {
            RelayRequest::Ping | RelayRequest::Unknown(_) => 0,
            RelayRequest::Subscribe { channel } | RelayRequest::Unsubscribe { channel } => {
                prefixed(channel)
            }
            RelayRequest::Publish { channel, payload } => prefixed(channel) + prefixed(payload),
            RelayRequest::Get { key } | RelayRequest::Delete { key } => prefixed(key),
            RelayRequest::Set { key, value, .. } => prefixed(key) + prefixed(value) + 4,
        }
    }
}

#[async_trait]
impl ToBytes for RelayRequest {
    async fn write_to_buf<W>(&self, buffer: &mut BufWriter<W>) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        match self {
            RelayRequest::Ping => Header::write(RequestCode::Ping as u32, 0, buffer).await,
            RelayRequest::Subscribe { channel } => {
                write_str_msg(channel, RequestCode::Subscribe, buffer).await
            }
            RelayRequest::Unsubscribe { channel } => {
                write_str_msg(channel, RequestCode::Unsubscribe, buffer).await
            }
            RelayRequest::Publish { channel, payload } => {
                let len = str_len(channel) + str_len(payload);
                Header::write(RequestCode::Publish as u32, len, buffer).await?;
                write_string(channel, buffer).await?;
                write_string(payload, buffer).await
            }
            RelayRequest::Get { key } => write_str_msg(key, RequestCode::Get, buffer).await,
            RelayRequest::Set {
                key,
                value,
                ttl_secs,
            } => {
                let len = str_len(key) + str_len(value) + 4;
                Header::write(RequestCode::Set as u32, len, buffer).await?;
                write_string(key, buffer).await?;
                write_string(value, buffer).await?;
                buffer.write_u32_le(*ttl_secs).await
            }
            RelayRequest::Delete { key } => write_str_msg(key, RequestCode::Delete, buffer).await,
            RelayRequest::Unknown(code) => Header::write(*code, 0, buffer).await,
        }
    }
}

impl ProtocolMessage for RelayRequest {
    fn parse(src: &mut Cursor<&[u8]>, header: &Header) -> std::io::Result<Self> {
        match RequestCode::from(header.code) {
            RequestCode::Ping => Ok(RelayRequest::Ping),
            RequestCode::Subscribe => {
                read_string(src).map(|channel| RelayRequest::Subscribe { channel })
            }
            RequestCode::Unsubscribe => {
                read_string(src).map(|channel| RelayRequest::Unsubscribe { channel })
            }
            RequestCode::Publish => {
                let channel = read_string(src)?;
                let payload = read_string(src)?;
                Ok(RelayRequest::Publish { channel, payload })
            }
            RequestCode::Get => read_string(src).map(|key| RelayRequest::Get { key }),
            RequestCode::Set => {
                let key = read_string(src)?;
                let value = read_string(src)?;
                let ttl_secs = read_u32(src)?;
                Ok(RelayRequest::Set {
                    key,
                    value,
                    ttl_secs,
                })
            }
            RequestCode::Delete => read_string(src).map(|key| RelayRequest::Delete { key }),
            RequestCode::Unknown => {
                warn!("Unknown request code : {}", header.code);
                Ok(RelayRequest::Unknown(header.code))
            }
        }
    }

    fn kind(&self) -> &str {
        match self {
            RelayRequest::Ping => "Ping",
            RelayRequest::Subscribe { .. } => "Subscribe",
            RelayRequest::Unsubscribe { .. } => "Unsubscribe",
            RelayRequest::Publish { .. } => "Publish",
            RelayRequest::Get { .. } => "Get",
            RelayRequest::Set { .. } => "Set",
            RelayRequest::Delete { .. } => "Delete",
            RelayRequest::Unknown(_) => "Unknown",
        }
    }
}

async fn write_str_msg<W>(
    src: &str,
    code: RequestCode,
    buffer: &mut BufWriter<W>,
) -> tokio::io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    Header::write(code as u32, str_len(src), buffer).await?;
    write_string(src, buffer).await
}
