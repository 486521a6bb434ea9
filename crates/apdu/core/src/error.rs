//! Core error type for APDU framing and transport
//!
//! All framing failures (malformed commands, truncated responses) and transport
//! failures are consolidated here so that callers only handle one error type.

use crate::transport::TransportError;

/// Result type for APDU operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type that encompasses all possible errors in the crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport failure while exchanging bytes with the card
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Raw command bytes do not form a valid APDU
    #[error("Invalid command length: {0}")]
    InvalidCommandLength(usize),

    /// Command data does not fit the extended length field
    #[error("Command data too long: {0} bytes (max 65535)")]
    DataTooLong(usize),

    /// Response shorter than a status word
    #[error("Incomplete response: {0} bytes")]
    IncompleteResponse(usize),

    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        source: Box<Self>,
    },
}

impl Error {
    /// Create a new error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost transport error, if this error was caused by one
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Context { source, .. } => source.transport_error(),
            _ => None,
        }
    }
}

/// Extension trait for Result with APDU Errors
pub(crate) trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<S: Into<String>>(self, context: S) -> Self {
        self.map_err(|e| e.with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keeps_transport_source() {
        let err = Error::from(TransportError::Timeout).with_context("exchanging INSERT_START");
        assert_eq!(
            err.to_string(),
            "exchanging INSERT_START: Operation timed out"
        );
        assert!(matches!(
            err.transport_error(),
            Some(TransportError::Timeout)
        ));
    }
}
