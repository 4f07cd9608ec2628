//! Protocol-level error types.

/// Errors raised while parsing or validating protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Radio address was not 4 bytes of hex.
    #[error("invalid DevAddr: {0}")]
    InvalidDevAddr(String),

    /// Device EUI was not 8 bytes of hex.
    #[error("invalid DevEUI: {0}")]
    InvalidDevEui(String),

    /// Session key was not 16 bytes of hex.
    #[error("invalid session key: {0}")]
    InvalidKey(String),

    /// Data rate index outside the regional table.
    #[error("data rate DR{0} not defined for this region")]
    UnknownDataRate(u8),

    /// Hex decoding error.
    #[error("hex decoding error: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
