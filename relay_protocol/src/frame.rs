use std::io::{self, Cursor};

use bytes::Buf;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

/// Strings are prefixed with their byte length as a little endian [u32].
pub const STR_LENGTH_PREFIX: u32 = 4;

/// A utility trait to write relay requests and responses to a TCP stream buffer.
#[async_trait]
pub trait ToBytes {
    /// Write the message, header included, to the underlying buffer via [`BufWriter`].
    /// Nothing is flushed, callers are responsible for it.
    ///
    /// [`BufWriter`]: tokio::io::BufWriter
    async fn write_to_buf<W>(&self, buffer: &mut BufWriter<W>) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + Send;
}

/// Length of a string once written with [`write_string`].
pub fn str_len(src: &str) -> u32 {
    STR_LENGTH_PREFIX + src.len() as u32
}

pub fn read_u32(src: &mut Cursor<&[u8]>) -> io::Result<u32> {
    if src.remaining() < 4 {
        return Err(invalid_data("expected a u32"));
    }

    Ok(src.get_u32_le())
}

pub fn read_bool(src: &mut Cursor<&[u8]>) -> io::Result<bool> {
    if !src.has_remaining() {
        return Err(invalid_data("expected a bool"));
    }

    match src.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(invalid_data(&format!("invalid bool value {}", other))),
    }
}

pub fn read_string(src: &mut Cursor<&[u8]>) -> io::Result<String> {
    let len = read_u32(src)? as usize;

    if src.remaining() < len {
        return Err(invalid_data("string length exceeds frame length"));
    }

    let mut bytes = vec![0u8; len];
    src.copy_to_slice(&mut bytes);

    String::from_utf8(bytes).map_err(|_| invalid_data("invalid utf-8 string"))
}

pub async fn write_string<W>(src: &str, buffer: &mut BufWriter<W>) -> io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    buffer.write_u32_le(src.len() as u32).await?;
    buffer.write_all(src.as_bytes()).await
}

pub(crate) fn invalid_data(reason: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.to_string())
}
