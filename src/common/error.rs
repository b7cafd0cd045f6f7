//! Error types for the Nyx debug adapter
//!
//! Startup errors fail the request that caused them. Errors raised while a
//! session is live are turned into output/terminated events by the session
//! and only reach the client as failed responses when a single request is
//! affected.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the debug adapter
#[derive(Error, Debug)]
pub enum Error {
    // === Launch/Attach Errors ===
    #[error("Cannot find program '{}'", .0.display())]
    ProgramNotFound(PathBuf),

    #[error("Nyx runtime '{0}' not found. Install it or set [runtime] binary in the config file")]
    RuntimeNotFound(String),

    #[error("Failed to start Nyx runtime: {0}")]
    RuntimeSpawnFailed(String),

    #[error("Could not connect to runtime at {addr} after {attempts} attempts: {source}")]
    ConnectionFailed {
        addr: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    // === Session Errors ===
    #[error("Debug session is closed")]
    SessionClosed,

    #[error("Cannot {action} while session is {state}")]
    InvalidState { action: String, state: String },

    // === Runtime Protocol Errors ===
    #[error("Invalid protocol message: {0}")]
    ProtocolViolation(String),

    #[error("Socket error: {0}")]
    SocketError(String),

    #[error("Runtime did not answer '{command}' within {timeout_secs} seconds")]
    RuntimeUnresponsive { command: String, timeout_secs: u64 },

    #[error("Runtime request '{command}' failed: {message}")]
    RuntimeRequestFailed { command: String, message: String },

    #[error("Request was cancelled")]
    Cancelled,

    // === Client Protocol Errors ===
    #[error("DAP protocol error: {0}")]
    DapProtocol(String),

    #[error("Invalid arguments for '{command}': {message}")]
    InvalidArguments { command: String, message: String },

    #[error("Unrecognized request '{0}'")]
    UnsupportedCommand(String),

    #[error("Client connection closed")]
    ClientDisconnected,

    // === Configuration Errors ===
    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: &str) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Create an invalid arguments error
    pub fn invalid_arguments(command: &str, message: impl std::fmt::Display) -> Self {
        Self::InvalidArguments {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a runtime request failed error
    pub fn runtime_request_failed(command: &str, message: &str) -> Self {
        Self::RuntimeRequestFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Numeric id reported in the `error` body of failed DAP responses
    pub fn code(&self) -> i64 {
        match self {
            Error::ProgramNotFound(_) => 2001,
            Error::RuntimeNotFound(_) | Error::RuntimeSpawnFailed(_) => 2002,
            Error::ConnectionFailed { .. } => 2003,
            Error::SessionClosed => 2010,
            Error::InvalidState { .. } => 2011,
            Error::RuntimeUnresponsive { .. } => 2020,
            Error::RuntimeRequestFailed { .. } => 2021,
            Error::Cancelled => 2022,
            Error::InvalidArguments { .. } => 2030,
            Error::UnsupportedCommand(_) => 2031,
            _ => 2099,
        }
    }

    /// Short message for the DAP response `message` field
    ///
    /// DAP clients show `cancelled` specially, everything else carries the
    /// full error text.
    pub fn short_message(&self) -> String {
        match self {
            Error::Cancelled => "cancelled".to_string(),
            other => other.to_string(),
        }
    }
}
