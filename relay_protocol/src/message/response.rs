use std::io::Cursor;

use tokio::io::{self, AsyncWrite, AsyncWriteExt, BufWriter};

use crate::frame::{read_bool, read_string, read_u32, str_len, write_string, ToBytes};
use crate::message::Header;
use crate::ProtocolMessage;

/// [u32] representation of the response codes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ResponseCode {
    Pong = 1,
    Subscribed = 2,
    Unsubscribed = 3,
    Published = 4,
    Value = 5,
    Stored = 6,
    Deleted = 7,
    Message = 8,
    Error = 9,
    Unknown,
}

impl From<u32> for ResponseCode {
    fn from(value: u32) -> Self {
        match value {
            1 => ResponseCode::Pong,
            2 => ResponseCode::Subscribed,
            3 => ResponseCode::Unsubscribed,
            4 => ResponseCode::Published,
            5 => ResponseCode::Value,
            6 => ResponseCode::Stored,
            7 => ResponseCode::Deleted,
            8 => ResponseCode::Message,
            9 => ResponseCode::Error,
            _ => ResponseCode::Unknown,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
/// All messages the relay broker sends to its clients.
pub enum RelayResponse {
    Pong,
    Subscribed { channel: String },
    Unsubscribed { channel: String },
    /// Number of subscribers the message was queued for
    Published { receivers: u32 },
    Value { value: Option<String> },
    Stored,
    /// `existed` is false when there was nothing to delete
    Deleted { existed: bool },
    /// Pushed to subscribers, not an answer to a request
    Message { channel: String, payload: String },
    Error { reason: String },
    Unknown(u32),
}

#[async_trait]
impl ToBytes for RelayResponse {
    async fn write_to_buf<W>(&self, buffer: &mut BufWriter<W>) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        match self {
            RelayResponse::Pong => Header::write(ResponseCode::Pong as u32, 0, buffer).await,
            RelayResponse::Subscribed { channel } => {
                write_str_msg(channel, ResponseCode::Subscribed, buffer).await
            }
            RelayResponse::Unsubscribed { channel } => {
                write_str_msg(channel, ResponseCode::Unsubscribed, buffer).await
            }
            RelayResponse::Published { receivers } => {
                Header::write(ResponseCode::Published as u32, 4, buffer).await?;
                buffer.write_u32_le(*receivers).await
            }
            RelayResponse::Value { value: Some(value) } => {
                Header::write(ResponseCode::Value as u32, 1 + str_len(value), buffer).await?;
                buffer.write_u8(1).await?;
                write_string(value, buffer).await
            }
            RelayResponse::Value { value: None } => {
                Header::write(ResponseCode::Value as u32, 1, buffer).await?;
                buffer.write_u8(0).await
            }
            RelayResponse::Stored => Header::write(ResponseCode::Stored as u32, 0, buffer).await,
            RelayResponse::Deleted { existed } => {
                Header::write(ResponseCode::Deleted as u32, 1, buffer).await?;
                buffer.write_u8(*existed as u8).await
            }
            RelayResponse::Message { channel, payload } => {
                let len = str_len(channel) + str_len(payload);
                Header::write(ResponseCode::Message as u32, len, buffer).await?;
                write_string(channel, buffer).await?;
                write_string(payload, buffer).await
            }
            RelayResponse::Error { reason } => {
                write_str_msg(reason, ResponseCode::Error, buffer).await
            }
            RelayResponse::Unknown(code) => Header::write(*code, 0, buffer).await,
        }
    }
}

impl ProtocolMessage for RelayResponse {
    fn parse(src: &mut Cursor<&[u8]>, header: &Header) -> std::io::Result<Self> {
        match ResponseCode::from(header.code) {
            ResponseCode::Pong => Ok(RelayResponse::Pong),
            ResponseCode::Subscribed => {
                read_string(src).map(|channel| RelayResponse::Subscribed { channel })
            }
            ResponseCode::Unsubscribed => {
                read_string(src).map(|channel| RelayResponse::Unsubscribed { channel })
            }
            ResponseCode::Published => {
                read_u32(src).map(|receivers| RelayResponse::Published { receivers })
            }
            ResponseCode::Value => {
                let value = if read_bool(src)? {
                    Some(read_string(src)?)
                } else {
                    None
                };
                Ok(RelayResponse::Value { value })
            }
            ResponseCode::Stored => Ok(RelayResponse::Stored),
            ResponseCode::Deleted => {
                read_bool(src).map(|existed| RelayResponse::Deleted { existed })
            }
            ResponseCode::Message => {
                let channel = read_string(src)?;
                let payload = read_string(src)?;
                Ok(RelayResponse::Message { channel, payload })
            }
            ResponseCode::Error => read_string(src).map(|reason| RelayResponse::Error { reason }),
            ResponseCode::Unknown => {
                warn!("Unknown response code : {}", header.code);
                Ok(RelayResponse::Unknown(header.code))
            }
        }
    }

    fn kind(&self) -> &str {
        match self {
            RelayResponse::Pong => "Pong",
            RelayResponse::Subscribed { .. } => "Subscribed",
            RelayResponse::Unsubscribed { .. } => "Unsubscribed",
            RelayResponse::Published { .. } => "Published",
            RelayResponse::Value { .. } => "Value",
            RelayResponse::Stored => "Stored",
            RelayResponse::Deleted { .. } => "Deleted",
            RelayResponse::Message { .. } => "Message",
            RelayResponse::Error { .. } => "Error",
            RelayResponse::Unknown(_) => "Unknown",
        }
    }
}

async fn write_str_msg<W>(
    src: &str,
    code: ResponseCode,
    buffer: &mut BufWriter<W>,
) -> tokio::io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    Header::write(code as u32, str_len(src), buffer).await?;
    write_string(src, buffer).await
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use tokio::io::{AsyncWriteExt, BufWriter};
    use tokio_test::block_on;

    use crate::frame::ToBytes;
    use crate::message::response::RelayResponse;
    use crate::message::HEADER_LEN;
    use crate::ProtocolMessage;

    fn parse_back(response: &RelayResponse) -> RelayResponse {
        let mut vec = vec![];
        block_on(async {
            let mut buff = BufWriter::new(&mut vec);
            response.write_to_buf(&mut buff).await.unwrap();
            buff.flush().await.unwrap();
        });

        let mut cursor = Cursor::new(vec.as_slice());
        let header = RelayResponse::check(&mut cursor).unwrap();
        assert_eq!(header.message_len, vec.len() - HEADER_LEN);

        RelayResponse::parse(&mut cursor, &header).unwrap()
    }

    #[test]
    fn value_response_keeps_absent_and_empty_apart() {
        let absent = RelayResponse::Value { value: None };
        let empty = RelayResponse::Value {
            value: Some(String::new()),
        };

        assert_eq!(parse_back(&absent), absent);
        assert_eq!(parse_back(&empty), empty);
    }

    #[test]
    fn message_response_carries_payload_verbatim() {
        let payload = r#"{"action":"message","user":"alice","msg":"héllo"}"#.to_string();
        let message = RelayResponse::Message {
            channel: "chat".to_string(),
            payload,
        };

        assert_eq!(parse_back(&message), message);
    }

    #[test]
    fn check_reports_incomplete_frames() {
        let bytes: Vec<u8> = vec![12, 0, 0, 0, 8, 0, 0, 0, 4, 0];
        let mut cursor = Cursor::new(bytes.as_slice());

        assert!(matches!(
            RelayResponse::check(&mut cursor),
            Err(crate::RelayError::Incomplete)
        ));
    }

    #[test]
    fn check_rejects_oversized_frames() {
        let bytes: Vec<u8> = vec![0xff, 0xff, 0xff, 0x7f, 8, 0, 0, 0];
        let mut cursor = Cursor::new(bytes.as_slice());

        assert!(matches!(
            RelayResponse::check(&mut cursor),
            Err(crate::RelayError::FrameTooLarge(_))
        ));
    }
}
