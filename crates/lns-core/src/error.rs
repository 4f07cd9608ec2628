//! Core error types.
//!
//! Validation failures are never errors here: an unknown device or a stale
//! frame counter is a typed request outcome, not an `Err`. These types cover
//! the genuinely fallible edges only: backend I/O and payload decoding.

use std::time::Duration;

/// Failures talking to the shared backend (directory, twin storage, per-device
/// client transport).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Backend could not be reached or answered with a transport fault.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Backend did not answer inside the allowed budget.
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    /// Backend answered but refused the operation.
    #[error("backend rejected the operation: {0}")]
    Rejected(String),

    /// A twin or telemetry document failed to serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Payload decoding failures. Non-fatal: telemetry is still emitted with the
/// raw payload attached.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// No decoder registered under the device's decoder identifier.
    #[error("unknown decoder: {0}")]
    UnknownDecoder(String),

    /// Decoder ran but could not make sense of the payload.
    #[error("decode failed: {0}")]
    DecodeFailed(String),
}
