use std::io::Cursor;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::frame::ToBytes;
use crate::message::HEADER_LEN;
use crate::{ProtocolMessage, RelayError};

/// A framed TCP stream speaking the relay protocol, used on both ends : clients write
/// [`RelayRequest`] and read [`RelayResponse`], the broker does the opposite.
///
/// [`RelayRequest`]: crate::message::request::RelayRequest
/// [`RelayResponse`]: crate::message::response::RelayResponse
#[derive(Debug)]
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

/// Open a relay connection to a broker.
pub async fn connect<A: ToSocketAddrs>(address: A) -> crate::Result<Connection> {
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    info!("connected to relay broker {:?}", stream.peer_addr().ok());
    Ok(Connection::new(stream))
}

impl Connection {
    pub fn new(socket: TcpStream) -> Connection {
        Connection {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Attempt to read a message from the stream.
    /// First parse the message [`Header`], if there are at least as much bytes as the header content
    /// length, try to parse it, otherwise, try to read more bytes from the TcpStream buffer.
    ///
    /// Returns `None` when the remote closed the connection between two frames.
    /// A [`RelayError::Malformed`] error leaves the connection usable, the faulty frame is consumed.
    ///
    /// [`Header`]: crate::message::Header
    pub async fn read_message<T: ProtocolMessage>(&mut self) -> crate::Result<Option<T>> {
        loop {
            if let Some(message) = self.parse_message()? {
                return Ok(Some(message));
            };

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                // The remote closed the connection. For this to be a clean
                // shutdown, there should be no data in the read buffer. If
                // there is, this means that the peer closed the socket while
                // sending a frame.
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(RelayError::ConnectionReset)
                };
            }
        }
    }

    /// Write a message to the stream and flush it.
    pub async fn write_message<T>(&mut self, message: &T) -> crate::Result<()>
    where
        T: ToBytes + ProtocolMessage + Sync,
    {
        message.write_to_buf(&mut self.stream).await?;
        self.stream.flush().await?;
        trace!("{} sent", message.kind());
        Ok(())
    }

    fn parse_message<T: ProtocolMessage>(&mut self) -> crate::Result<Option<T>> {
        let mut buf = Cursor::new(&self.buffer[..]);

        match T::check(&mut buf) {
            Ok(header) => {
                let message = {
                    let payload = &self.buffer[HEADER_LEN..HEADER_LEN + header.message_len];
                    let mut payload = Cursor::new(payload);
                    T::parse(&mut payload, &header)
                };

                // consume the message bytes, even when parsing failed
                self.buffer.advance(HEADER_LEN + header.message_len);
                Ok(Some(message?))
            }
            Err(RelayError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
