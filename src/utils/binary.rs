// src/utils/binary.rs

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BinaryError {
    #[error("not enough bytes: need {needed}, have {have}")]
    NotEnoughData { needed: usize, have: usize },
    #[error("{0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, BinaryError>;

/// Little-endian cursor over a byte buffer.
///
/// Reads advance an offset and fail with [`BinaryError::NotEnoughData`] when
/// the buffer runs short; writes append to the underlying `Vec` and cannot
/// fail.
#[derive(Debug, Default, Clone)]
pub struct BinaryStream {
    buffer: Vec<u8>,
    offset: usize,
}

impl BinaryStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            offset: 0,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            buffer: bytes.to_vec(),
            offset: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Bytes not yet consumed by reads.
    #[inline]
    pub fn remaining(&self) -> &[u8] {
        &self.buffer[self.offset..]
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        let have = self.buffer.len() - self.offset;
        if have < needed {
            Err(BinaryError::NotEnoughData { needed, have })
        } else {
            Ok(())
        }
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let value = self.buffer[self.offset];
        self.offset += 1;
        Ok(value)
    }

    pub fn get_u32_le(&mut self) -> Result<u32> {
        self.ensure(4)?;
        let mut cursor = Cursor::new(&self.buffer[self.offset..]);
        let value = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| BinaryError::InvalidData(e.to_string()))?;
        self.offset += 4;
        Ok(value)
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn put_u32_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }
}
