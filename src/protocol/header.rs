// src/protocol/header.rs

use crate::utils::binary::{BinaryError, BinaryStream, Result};

/// Discriminant byte carried first in every packet.
///
/// Only `Data` consumes a sequence number; every other kind travels with
/// `sequence = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Data = 0,
    Ack = 1,
    Connect = 2,
    Disconnect = 3,
    Ping = 4,
    Pong = 5,
    JoinGroup = 6,
    LeaveGroup = 7,
}

impl PacketKind {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PacketKind::Data),
            1 => Ok(PacketKind::Ack),
            2 => Ok(PacketKind::Connect),
            3 => Ok(PacketKind::Disconnect),
            4 => Ok(PacketKind::Ping),
            5 => Ok(PacketKind::Pong),
            6 => Ok(PacketKind::JoinGroup),
            7 => Ok(PacketKind::LeaveGroup),
            other => Err(BinaryError::InvalidData(format!(
                "unknown packet kind {other}"
            ))),
        }
    }
}

/// Fixed wire header: kind byte, sequence, then the piggybacked ack pair
/// (`last_acked` + 32-slot bitfield), all little-endian, no padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: PacketKind,
    /// Per-peer data sequence; 0 on every non-`Data` kind.
    pub sequence: u32,
    /// Most recent sequence received from the remote, or 0 before any data.
    pub last_acked: u32,
    /// Bit `i` set means `last_acked - (i + 1)` was also received.
    pub ack_bitfield: u32,
}

impl PacketHeader {
    pub const ENCODED_LEN: usize = 13;

    pub fn new(kind: PacketKind) -> Self {
        Self {
            kind,
            sequence: 0,
            last_acked: 0,
            ack_bitfield: 0,
        }
    }

    pub fn encode(&self, stream: &mut BinaryStream) {
        stream.put_u8(self.kind as u8);
        stream.put_u32_le(self.sequence);
        stream.put_u32_le(self.last_acked);
        stream.put_u32_le(self.ack_bitfield);
    }

    pub fn decode(stream: &mut BinaryStream) -> Result<Self> {
        let kind = PacketKind::from_u8(stream.get_u8()?)?;
        let sequence = stream.get_u32_le()?;
        let last_acked = stream.get_u32_le()?;
        let ack_bitfield = stream.get_u32_le()?;
        Ok(Self {
            kind,
            sequence,
            last_acked,
            ack_bitfield,
        })
    }
}

/// Serializes a header followed by its payload into a single datagram buffer.
pub fn build_packet(header: &PacketHeader, payload: &[u8]) -> Vec<u8> {
    let mut stream = BinaryStream::with_capacity(PacketHeader::ENCODED_LEN + payload.len());
    header.encode(&mut stream);
    stream.put_slice(payload);
    stream.into_inner()
}
