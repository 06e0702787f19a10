//! Packet types for the tunnel wire format

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::codec::CodecError;
use crate::{CONTROL_CHANNEL_ID, HEADER_SIZE, MAX_DATA_SIZE};

/// Channel identifier
pub type ChannelId = u32;

/// Packet types carried on the tunnel link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    AuthKey = 1,
    AuthResponse = 2,
    TunnelData = 3,
    ChannelClosed = 4,
}

impl TryFrom<u8> for PacketType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::AuthKey),
            2 => Ok(PacketType::AuthResponse),
            3 => Ok(PacketType::TunnelData),
            4 => Ok(PacketType::ChannelClosed),
            _ => Err(CodecError::InvalidPacketType(value)),
        }
    }
}

/// One framed unit of transfer on the tunnel link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub channel_id: ChannelId,
    pub data: Bytes,
}

impl Packet {
    pub fn new(packet_type: PacketType, channel_id: ChannelId, data: impl Into<Bytes>) -> Self {
        Self {
            packet_type,
            channel_id,
            data: data.into(),
        }
    }

    /// Auth key exchange packet, sent by both sides during the handshake.
    pub fn auth_key(key: impl Into<Bytes>) -> Self {
        Self::new(PacketType::AuthKey, CONTROL_CHANNEL_ID, key)
    }

    /// Handshake verdict: a single byte, 1 for success and 0 for failure.
    pub fn auth_response(success: bool) -> Self {
        let byte = if success { 1u8 } else { 0u8 };
        Self::new(PacketType::AuthResponse, CONTROL_CHANNEL_ID, vec![byte])
    }

    /// Relayed payload bytes addressed to a channel.
    pub fn data(channel_id: ChannelId, payload: impl Into<Bytes>) -> Self {
        Self::new(PacketType::TunnelData, channel_id, payload)
    }

    /// Notification that a channel's local connection went away.
    pub fn channel_closed(channel_id: ChannelId) -> Self {
        Self::new(PacketType::ChannelClosed, channel_id, Bytes::new())
    }

    /// Whether this packet is an affirmative auth response. Empty or zero
    /// data is failure, never success.
    pub fn is_auth_success(&self) -> bool {
        self.packet_type == PacketType::AuthResponse && self.data.first().copied() == Some(1)
    }

    /// Encode to wire bytes: fixed 9-byte big-endian header, then the
    /// payload if non-empty.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let data_len = self.data.len();
        if data_len > MAX_DATA_SIZE as usize {
            return Err(CodecError::PayloadTooLarge(data_len));
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + data_len);
        buf.put_u8(self.packet_type as u8);
        buf.put_u32(self.channel_id);
        buf.put_u32(data_len as u32);
        if !self.data.is_empty() {
            buf.put(self.data.clone());
        }

        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_from_byte() {
        assert_eq!(PacketType::try_from(1).unwrap(), PacketType::AuthKey);
        assert_eq!(PacketType::try_from(4).unwrap(), PacketType::ChannelClosed);
        assert!(matches!(
            PacketType::try_from(9),
            Err(CodecError::InvalidPacketType(9))
        ));
    }

    #[test]
    fn test_auth_packets_use_control_channel() {
        assert_eq!(Packet::auth_key(b"ABC123".as_slice()).channel_id, 0);
        assert_eq!(Packet::auth_response(true).channel_id, 0);
    }

    #[test]
    fn test_auth_response_semantics() {
        assert!(Packet::auth_response(true).is_auth_success());
        assert!(!Packet::auth_response(false).is_auth_success());

        // Empty or zero data is failure, and non-response types never pass.
        let empty = Packet::new(PacketType::AuthResponse, 0, Bytes::new());
        assert!(!empty.is_auth_success());
        let wrong_type = Packet::new(PacketType::TunnelData, 0, vec![1]);
        assert!(!wrong_type.is_auth_success());
    }

    #[test]
    fn test_encode_header_layout() {
        let packet = Packet::data(0x01020304, b"hi".as_slice());
        let encoded = packet.encode().unwrap();

        assert_eq!(encoded.len(), HEADER_SIZE + 2);
        assert_eq!(encoded[0], PacketType::TunnelData as u8);
        assert_eq!(&encoded[1..5], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&encoded[5..9], &[0, 0, 0, 2]);
        assert_eq!(&encoded[9..], b"hi");
    }

    #[test]
    fn test_encode_empty_payload_omits_data_segment() {
        let encoded = Packet::channel_closed(7).encode().unwrap();
        assert_eq!(encoded.len(), HEADER_SIZE);
        assert_eq!(&encoded[5..9], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let packet = Packet::data(1, vec![0u8; MAX_DATA_SIZE as usize + 1]);
        assert!(matches!(
            packet.encode(),
            Err(CodecError::PayloadTooLarge(_))
        ));
    }
}
