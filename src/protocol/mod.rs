// src/protocol/mod.rs

pub mod header;
pub mod sequence;

pub use header::{PacketHeader, PacketKind, build_packet};

use crate::utils::binary::{BinaryError, BinaryStream};

/// Default port the server listens on.
pub const SERVER_PORT: u16 = 7777;
/// Default port the client binds to.
pub const CLIENT_PORT: u16 = 7778;

/// Encoded length of a group id in `JoinGroup`/`LeaveGroup` payloads.
pub const GROUP_ID_LEN: usize = 4;

pub fn encode_group_id(group_id: u32) -> Vec<u8> {
    let mut stream = BinaryStream::with_capacity(GROUP_ID_LEN);
    stream.put_u32_le(group_id);
    stream.into_inner()
}

/// Group requests carry exactly one little-endian id after the header;
/// anything else is malformed.
pub fn decode_group_id(payload: &[u8]) -> Result<u32, BinaryError> {
    if payload.len() != GROUP_ID_LEN {
        return Err(BinaryError::InvalidData(format!(
            "group id payload must be {GROUP_ID_LEN} bytes, got {}",
            payload.len()
        )));
    }
    BinaryStream::from_slice(payload).get_u32_le()
}
