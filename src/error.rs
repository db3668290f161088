//! Error types for the kwami session core.

/// Top-level error type for a live voice session.
#[derive(Debug, thiserror::Error)]
pub enum KwamiError {
    /// A provider or model could not be constructed (missing credential, unknown id).
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A live component rejected an in-place option update.
    #[error("option update unsupported: {0}")]
    OptionUpdateUnsupported(String),

    /// A remote tool call received no result before its deadline.
    #[error("tool call timed out: {0}")]
    ToolCallTimeout(String),

    /// Another agent instance won arbitration for the room.
    ///
    /// This is the expected outcome for a duplicate instance, not a crash.
    #[error("arbitration lost to {winner}")]
    ArbitrationLoss { winner: String },

    /// An inbound data-channel payload could not be decoded.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Outbound data-channel publish failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Pipeline coordination error.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Memory collaborator error.
    #[error("memory error: {0}")]
    Memory(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// The session has been closed and accepts no more work.
    #[error("session closed")]
    SessionClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KwamiError {
    /// Whether the session may continue after this error.
    ///
    /// Only losing arbitration ends a session; every other failure is
    /// logged or surfaced and the session keeps running.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ArbitrationLoss { .. } | Self::SessionClosed)
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, KwamiError>;
