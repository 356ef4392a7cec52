//! Error types and exit codes for edgesight
//!
//! Errors are split by how far they are allowed to travel:
//! - `ProtocolError` and `ValidationError` are absorbed by the decoder
//! - `ConnectionError` moves the session to `Failed`
//! - `ConfigurationError` is returned to whoever tried to save or use settings

use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

/// Transport-level failure while opening, using or closing a session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Failed to connect to {endpoint}: {message}")]
    Handshake { endpoint: String, message: String },

    #[error("Connection to {endpoint} timed out after {after_ms}ms")]
    Timeout { endpoint: String, after_ms: u64 },

    #[error("Stream error: {message}")]
    Stream { message: String },
}

/// Inbound message that could not be turned into a stream event
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Message is not valid JSON: {message}")]
    InvalidJson { message: String },

    #[error("Message has no 'type' field")]
    MissingType,

    #[error("Unknown message type: {kind}")]
    UnknownType { kind: String },

    #[error("Malformed '{kind}' message: {message}")]
    Malformed { kind: String, message: String },
}

/// A single object record that failed range checks
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Object record {index} is malformed: {message}")]
    Malformed { index: usize, message: String },

    #[error("Object record {index} has an empty id")]
    EmptyId { index: usize },

    #[error("Object {id} appears more than once in the batch")]
    DuplicateId { id: String },

    #[error("Object {id} has confidence {value} outside [0, 1]")]
    ConfidenceOutOfRange { id: String, value: f64 },

    #[error("Object {id} has bbox.{field} = {value} outside [0, 1]")]
    BoundingBoxOutOfRange {
        id: String,
        field: &'static str,
        value: f64,
    },

    #[error("Object {id} has invalid depth {value}")]
    InvalidDepth { id: String, value: f64 },
}

/// Rejected settings, surfaced before anything is persisted or connected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Server URL must start with ws:// or wss://, got: {url}")]
    UnsupportedScheme { url: String },

    #[error("Server URL must use wss:// in production builds, got: {url}")]
    InsecureScheme { url: String },

    #[error("Invalid server URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Confidence threshold {value} is outside [0, 1]")]
    ThresholdOutOfRange { value: f64 },

    #[error("Unknown setting: {key}")]
    UnknownKey { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main error type for edgesight operations
#[derive(Error, Debug)]
pub enum EdgeSightError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Settings storage error at {}: {message}", path.display())]
    Storage { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EdgeSightError {
    /// Convert error to an exit code for the CLI:
    /// - 0: Success
    /// - 1: IO / storage error
    /// - 2: Configuration error
    /// - 3: Connection error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Io(_) | Self::Storage { .. } => ExitCode::from(1),
            Self::Configuration(_) => ExitCode::from(2),
            Self::Connection(_) => ExitCode::from(3),
        }
    }
}

/// Result type alias for edgesight operations
pub type Result<T> = std::result::Result<T, EdgeSightError>;
