// src/client/mod.rs

pub mod client;

pub use client::{Client, ClientState};
