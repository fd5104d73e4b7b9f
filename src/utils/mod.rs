// src/utils/mod.rs

pub mod binary;

pub use binary::{BinaryError, BinaryStream};
