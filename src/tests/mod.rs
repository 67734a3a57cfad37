//! Integration testing module
//!
//! End-to-end tests for the remuxer:
//! - Transcoding MP2 and AC-3 tracks to AAC inside a transport stream
//! - Passthrough of every other packet
//! - Chunk boundary independence
//! - Error reporting and recovery
//! - The C interface

pub mod fixtures;

/// Serializes tests that touch the process-wide last-error slot
pub static FFI_SERIAL: parking_lot::Mutex<()> = parking_lot::const_mutex(());
