//! Error types for PPB frame decoding and command handling

use thiserror::Error;

/// Errors that can occur while decoding a frame
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame has the wrong number of bytes for its layout
    #[error("wrong frame size: expected {expected} bytes, got {actual}")]
    WrongSize { expected: usize, actual: usize },

    /// CRC-8 does not match the protected bytes
    #[error("CRC mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    CrcMismatch { expected: u8, actual: u8 },
}

/// Higher-level protocol errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame decode error
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Device acknowledged with a nonzero status
    #[error("device reported fault: status 0x{0:02X}")]
    DeviceReportedFault(u8),

    /// Command name or opcode is not in the catalog
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Address string could not be parsed
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
