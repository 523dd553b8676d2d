//! Lecturer Library Crate
//!
//! The terminal host for a live lecture: environment configuration, the
//! native audio devices the engine captures from and plays to, the console
//! lecture host and the command parser. `bin/lecturer.rs` wires these into a
//! `LiveSession`.

pub mod audio_device;
pub mod config;
pub mod console;
pub mod host;
