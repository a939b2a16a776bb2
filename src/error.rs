//! Error types for the `subtitle_saver` crate.

/// All errors that can occur while saving or converting subtitles.
///
/// The type is `Clone` because one outcome may be delivered to several
/// callers waiting on the same coalesced save.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SaveError {
    /// A required field was missing or malformed. Raised before any backend call.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The backend call itself failed (transport error or a panicking handler).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend answered with `success: false`.
    #[error("{0}")]
    Rejected(String),

    /// A backend response carried data that could not be decoded.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// No project is loaded in the service.
    #[error("No project loaded")]
    NoProject,

    /// The requested converter is not in the supported list.
    #[error("Unsupported converter: {0}")]
    UnsupportedConverter(String),

    /// The coordinator was destroyed before the request could complete.
    #[error("Auto-save coordinator destroyed")]
    Destroyed,
}

impl SaveError {
    /// Shorthand for building a [`SaveError::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Shorthand for building a [`SaveError::Transport`] from any displayable error.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

/// A type alias for `Result<T, SaveError>`.
pub type Result<T> = std::result::Result<T, SaveError>;
