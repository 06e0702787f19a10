//! GameLink Tunnel Protocol
//!
//! Defines the framed wire format carried on the tunnel link between the
//! broker and the agent, and the codec used to read and write it over any
//! byte stream.

pub mod codec;
pub mod packet;

pub use codec::{is_disconnect, read_packet, write_packet, CodecError};
pub use packet::{ChannelId, Packet, PacketType};

/// Fixed packet header size: type (1) + channel id (4) + data length (4)
pub const HEADER_SIZE: usize = 9;

/// Maximum payload size per packet (1 MiB)
pub const MAX_DATA_SIZE: u32 = 1024 * 1024;

/// Channel id carried by packets that do not address a channel
pub const CONTROL_CHANNEL_ID: u32 = 0;

/// Length of the tunnel auth key
pub const AUTH_KEY_LEN: usize = 6;
