//! Async read/write of framed packets
//!
//! Callers always see either a fully-formed [`Packet`] or an explicit
//! failure: partial reads are retried internally until the exact byte count
//! is available or the stream reports an error.

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::packet::{Packet, PacketType};
use crate::{HEADER_SIZE, MAX_DATA_SIZE};

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("Declared payload of {0} bytes exceeds the 1 MiB limit")]
    PayloadTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Whether this is ordinary peer disconnection rather than a protocol
    /// violation. Expected under normal churn; callers log it quietly.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, CodecError::Io(e) if is_disconnect(e))
    }
}

/// Classify IO errors produced by a peer going away mid-stream.
pub fn is_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
    )
}

/// Read exactly one packet from the stream.
///
/// A declared length above [`MAX_DATA_SIZE`] is rejected before any payload
/// buffer is allocated.
pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;

    let packet_type = PacketType::try_from(header[0])?;
    let channel_id = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    let data_len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]);

    if data_len > MAX_DATA_SIZE {
        return Err(CodecError::PayloadTooLarge(data_len as usize));
    }

    let data = if data_len == 0 {
        Bytes::new()
    } else {
        let mut buf = vec![0u8; data_len as usize];
        reader.read_exact(&mut buf).await?;
        Bytes::from(buf)
    };

    Ok(Packet {
        packet_type,
        channel_id,
        data,
    })
}

/// Write one packet to the stream and flush it.
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let encoded = packet.encode()?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
