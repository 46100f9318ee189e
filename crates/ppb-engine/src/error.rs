//! Error types for the engine

use ppb_protocol::{Address, ProtocolError};
use thiserror::Error;

/// Reasons a command is rejected before it reaches the wire
///
/// Rejection is synchronous and leaves all engine state untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The address's queue is full
    #[error("address {address} is busy: {queued} commands queued")]
    Busy {
        /// Target address
        address: Address,
        /// Commands already waiting
        queued: usize,
    },

    /// Command name or opcode not in the catalog
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Address cannot carry this command
    #[error("invalid address {address} for {command}")]
    InvalidAddress {
        /// Target address
        address: Address,
        /// Command name
        command: String,
    },

    /// No bridge endpoint is known for the address
    #[error("no endpoint known for address {0}")]
    NoEndpoint(Address),
}

impl From<ProtocolError> for DispatchError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnknownCommand(name) => DispatchError::UnknownCommand(name),
            other => DispatchError::UnknownCommand(other.to_string()),
        }
    }
}

/// Reasons an in-flight exchange ran out of time
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutError {
    /// The acknowledgement never arrived
    #[error("timeout: no acknowledgement after {attempts} attempt(s)")]
    NoAcknowledgement {
        /// Requests sent, including retries
        attempts: u8,
    },

    /// Acknowledged but no data arrived
    #[error("timeout: no data received")]
    NoData,

    /// Only part of the reply arrived
    #[error("timeout: partial data, {received} of {total} packets received")]
    PartialData {
        /// Packets received
        received: usize,
        /// Packets expected
        total: usize,
    },
}

/// Errors from setting up the engine runtime
#[derive(Debug, Error)]
pub enum EngineError {
    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid bind or bridge address
    #[error("invalid socket address: {0}")]
    InvalidSocketAddress(String),
}

/// Errors returned by the controller facade
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Command rejected by the engine
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Runtime setup failed
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// `start` was called twice
    #[error("controller already started")]
    AlreadyStarted,

    /// The engine task has stopped
    #[error("engine is not running")]
    NotRunning,
}

impl From<ProtocolError> for ControllerError {
    fn from(err: ProtocolError) -> Self {
        ControllerError::Dispatch(err.into())
    }
}
