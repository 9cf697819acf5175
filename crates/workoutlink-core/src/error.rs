//! Error types for WorkoutLink

use thiserror::Error;

use crate::link::envelope::MessageKind;

/// Failure to decode an envelope or one of its typed payloads.
///
/// Decode failures never cross the wire: the receiving peer records them in
/// its diagnostics and drops the message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// The outer wrapper has no `kind` key
    #[error("Envelope is missing the `kind` key")]
    MissingKind,

    /// `kind` is present but outside the closed set
    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    /// The outer wrapper has no `payload` mapping
    #[error("Envelope is missing the `payload` mapping")]
    MissingPayload,

    /// The typed payload for a known kind failed structural decoding
    #[error("Malformed {kind} payload: {reason}")]
    MalformedPayload {
        /// Kind whose payload failed
        kind: MessageKind,
        /// Underlying serde error message
        reason: String,
    },

    /// The bytes were not a JSON object
    #[error("Invalid wire bytes: {0}")]
    InvalidBytes(String),
}

/// Failure handing an envelope to the transport.
///
/// Transport errors are recorded into the sending peer's diagnostics. They
/// are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The immediate channel is not usable right now
    #[error("Counterpart is not reachable")]
    NotReachable,

    /// The session has not completed activation
    #[error("Session is not activated")]
    NotActivated,

    /// The platform does not support a peer session on this device
    #[error("Peer session is not supported on this device")]
    Unsupported,

    /// The underlying platform rejected the message
    #[error("Transport failure: {0}")]
    Platform(String),
}

/// Crate-level error for WorkoutLink operations.
///
/// Codec and transport failures never surface here: peers record them in
/// their diagnostics instead.
#[derive(Error, Debug)]
pub enum LinkError {
    /// The peer's execution context has shut down
    #[error("Peer has been torn down")]
    PeerStopped,

    /// Configuration could not be loaded
    #[error("Config error: {0}")]
    Config(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using LinkError
pub type LinkResult<T> = Result<T, LinkError>;
