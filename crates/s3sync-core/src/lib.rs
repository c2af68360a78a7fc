//! s3sync Core - Domain types and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - Mount records and their JSON decoding rules
//! - Local-path ⇄ remote-key mapping
//! - Runtime settings (intervals, backoffs, transfer tuning)
//! - Port definitions (traits the adapters implement)

pub mod config;
pub mod keymap;
pub mod mounts;
pub mod ports;
