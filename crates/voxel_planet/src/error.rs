//! Engine error types
//!
//! Only `ConfigInvalid` can escape engine construction; everything else is
//! recovered locally and logged. IO/format variants surface through the
//! optional modification persistence API.

use thiserror::Error;

/// Errors that can occur during engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration rejected at init; the engine cannot start
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Mesh vertex count exceeded the 32-bit index budget
    #[error("chunk mesh has {vertices} vertices, exceeding the u32 index budget")]
    IndexOverflow { vertices: usize },

    /// IO error during modification save/load
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Modification file is malformed
    #[error("malformed modification file: {0}")]
    ModificationFormat(String),

    /// Configuration file could not be parsed
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}
