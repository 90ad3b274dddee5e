//! Error types for the client core.

use crate::crypto::CryptoError;
use crate::transport::TransportError;
use crate::types::SerialFormat;
use std::fmt;
use thiserror::Error;

/// Why a request gave up waiting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutReason {
    /// The request's own deadline passed.
    Request,
    /// The client stayed disconnected longer than the offline budget.
    Offline,
    /// The client faulted while the request was outstanding.
    General,
}

impl fmt::Display for TimeoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutReason::Request => write!(f, "request timeout expired"),
            TimeoutReason::Offline => write!(f, "offline timeout expired"),
            TimeoutReason::General => write!(f, "general fault"),
        }
    }
}

/// Main error type for client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Item already frozen/saved")]
    AlreadyFrozen,

    #[error("Item name not set")]
    MissingName,

    #[error(
        "The {format:?} serializer failed: {message}. \
         If a different encoding was intended, set the serial format to one of {alternatives}"
    )]
    Serialization {
        format: SerialFormat,
        message: String,
        alternatives: String,
    },

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Cannot deserialize: no resolvable data type (type name: {0:?})")]
    UnknownDataType(Option<String>),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Timeout: {0}")]
    Timeout(TimeoutReason),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Client has faulted")]
    Faulted,

    #[error("Client has been disposed")]
    Disposed,

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Too many results: expected at most one, got {0}")]
    TooManyResults(usize),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Server rejected request: {0}")]
    Rejected(String),
}

/// Coarse classification of errors, used to decide retry and escalation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retried through backoff; only surfaced once a budget is exceeded.
    Transient,
    /// The request's own deadline passed.
    RequestTimeout,
    /// The offline budget was exceeded; shared state escalated.
    OfflineExceeded,
    /// Encoding or decoding a payload failed. Never retried.
    Serialization,
    /// Programming or configuration error. Forces the Faulted state.
    Unexpected,
    /// Misconfiguration or invalid caller input.
    Configuration,
    /// The client is faulted or disposed.
    Lifecycle,
    /// The server answered with an error.
    Server,
}

impl ClientError {
    /// Build a serialization error naming the failed serializer.
    pub fn serialization(format: SerialFormat, message: impl Into<String>) -> Self {
        let alternatives = SerialFormat::ALL
            .iter()
            .filter(|f| **f != format && **f != SerialFormat::Undefined)
            .map(|f| format!("{:?}", f))
            .collect::<Vec<_>>()
            .join(", ");
        ClientError::Serialization {
            format,
            message: message.into(),
            alternatives,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Transport(e) if e.is_transient() => ErrorKind::Transient,
            ClientError::Transport(_) => ErrorKind::Unexpected,
            ClientError::Timeout(TimeoutReason::Request) => ErrorKind::RequestTimeout,
            ClientError::Timeout(TimeoutReason::Offline) => ErrorKind::OfflineExceeded,
            ClientError::Timeout(TimeoutReason::General) => ErrorKind::Lifecycle,
            ClientError::Serialization { .. }
            | ClientError::Deserialization(_)
            | ClientError::Compression(_)
            | ClientError::Crypto(_) => ErrorKind::Serialization,
            ClientError::UnknownDataType(_)
            | ClientError::MissingName
            | ClientError::AlreadyFrozen
            | ClientError::InvalidConfig(_)
            | ClientError::InvalidArgument(_)
            | ClientError::TooManyResults(_) => ErrorKind::Configuration,
            ClientError::Faulted | ClientError::Disposed => ErrorKind::Lifecycle,
            ClientError::Unexpected(_) => ErrorKind::Unexpected,
            ClientError::Rejected(_) => ErrorKind::Server,
        }
    }

    /// True if repeating the operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout(_))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Deserialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for ClientError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ClientError::serialization(SerialFormat::Binary, e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ClientError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ClientError::Deserialization(e.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Compression(e.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
