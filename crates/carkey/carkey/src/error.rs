use std::time::Duration;

use carkey_apdu_core::{StatusWord, TransportError};
use derive_more::Display;

use crate::codec::DecodeError;
use crate::identity::PrincipalId;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for protocol operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The card has not been issued yet
    #[error("Card not initialized: issue it at a reception terminal first")]
    CardNotInitialized,

    /// Certificate, signature, nonce or sequence check failed while authenticating
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(AuthFailure),

    /// A step after authentication failed
    #[error("Process failed: {0}")]
    ProcessFailed(ProcessFailure),

    /// The authority did not answer in time
    #[error("No message received within {0:?}")]
    MessageTimeout(Duration),

    /// The underlying exchange failed
    #[error("Transport failure: {0}")]
    TransportFailure(#[from] TransportError),

    /// APDU framing error
    #[error(transparent)]
    Apdu(carkey_apdu_core::Error),

    /// RSA key handling failed
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    /// Signing failed
    #[error("Signing failed: {0}")]
    Signing(#[from] rsa::signature::Error),

    /// The key does not fit the fixed-capacity key field
    #[error("RSA key of {bits} bits does not fit the {max}-bit key field")]
    KeyTooLarge {
        /// Modulus size of the rejected key
        bits: usize,
        /// Largest supported modulus size
        max: usize,
    },

    /// A certificate was paired with a signer holding a different key
    #[error("Certificate does not belong to this signer")]
    CredentialMismatch,

    /// A worker thread could not be started
    #[error("Could not start worker thread: {0}")]
    Worker(#[from] std::io::Error),
}

impl Error {
    /// Authentication failure with the given reason
    pub const fn auth(reason: AuthFailure) -> Self {
        Self::AuthenticationFailed(reason)
    }

    /// Process failure with the given reason
    pub const fn process(reason: ProcessFailure) -> Self {
        Self::ProcessFailed(reason)
    }

    /// Whether this error reports tampering
    pub const fn is_tamper(&self) -> bool {
        matches!(self, Self::ProcessFailed(ProcessFailure::Tamper(_)))
    }
}

impl From<carkey_apdu_core::Error> for Error {
    fn from(error: carkey_apdu_core::Error) -> Self {
        match error.transport_error() {
            Some(transport) => Self::TransportFailure(transport.clone()),
            None => Self::Apdu(error),
        }
    }
}

/// Why an authentication run was rejected
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum AuthFailure {
    /// The certificate was not issued by the trusted authority
    #[display("certificate not issued by the trusted authority")]
    InvalidCertificate,
    /// A signature did not verify
    #[display("signature verification failed")]
    BadSignature,
    /// The peer echoed a different nonce
    #[display("nonce echo does not match")]
    NonceMismatch,
    /// A sequence number was stale or out of order
    #[display("sequence number out of order")]
    SequenceMismatch,
    /// The authority lists the card as blocked
    #[display("card {_0} is blocked")]
    CardBlocked(PrincipalId),
    /// The peer answered with an error status word
    #[display("peer rejected the step with status {_0}")]
    Rejected(StatusWord),
    /// The peer's message could not be decoded
    #[display("malformed message: {_0}")]
    Malformed(DecodeError),
}

/// Why a step after authentication was rejected
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ProcessFailure {
    /// The operation needs an authenticated session
    #[display("no authenticated session")]
    NotAuthenticated,
    /// Tampering was detected
    #[display("tamper detected: {_0}")]
    Tamper(Tamper),
    /// A signature did not verify
    #[display("signature verification failed")]
    BadSignature,
    /// The peer echoed a different nonce
    #[display("nonce echo does not match")]
    NonceMismatch,
    /// A sequence number was stale or out of order
    #[display("sequence number out of order")]
    SequenceMismatch,
    /// The peer answered with an error status word
    #[display("peer rejected the step with status {_0}")]
    Rejected(StatusWord),
    /// The peer's message could not be decoded
    #[display("malformed message: {_0}")]
    Malformed(DecodeError),
    /// Every vehicle is rented out
    #[display("no vehicle available")]
    NoVehicleAvailable,
    /// The authority refused the card because it is blocked
    #[display("card {_0} is blocked")]
    CardBlocked(PrincipalId),
    /// The authority refused or returned something unusable
    #[display("database error: {_0}")]
    Database(String),
    /// The authority acknowledged with an unexpected text
    #[display("unexpected acknowledgment {received:?}, expected {expected:?}")]
    UnexpectedAcknowledgment {
        /// Acknowledgment the protocol requires
        expected: String,
        /// Acknowledgment actually received
        received: String,
    },
}

/// Kind of tampering detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Tamper {
    /// The card reports its manipulation flag as set
    #[display("card manipulation flag set")]
    ManipulationFlag,
    /// The card refused a counter that did not follow its own
    #[display("card rejected the usage counter")]
    CardRejectedCounter,
    /// The card confirmed a different counter than the vehicle sent
    #[display("counter mismatch: expected {expected}, received {received}")]
    CounterMismatch {
        /// Counter the vehicle holds
        expected: u32,
        /// Counter the card confirmed
        received: u32,
    },
}

impl From<AuthFailure> for Error {
    fn from(reason: AuthFailure) -> Self {
        Self::AuthenticationFailed(reason)
    }
}

impl From<ProcessFailure> for Error {
    fn from(reason: ProcessFailure) -> Self {
        Self::ProcessFailed(reason)
    }
}

impl From<Tamper> for Error {
    fn from(kind: Tamper) -> Self {
        Self::ProcessFailed(ProcessFailure::Tamper(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::from(Tamper::CounterMismatch {
            expected: 4,
            received: 5,
        });
        assert!(err.is_tamper());
        assert_eq!(
            err.to_string(),
            "Process failed: tamper detected: counter mismatch: expected 4, received 5"
        );

        let err = Error::auth(AuthFailure::Rejected(StatusWord::from_u16(0x6A02)));
        assert_eq!(
            err.to_string(),
            "Authentication failed: peer rejected the step with status 6A 02"
        );
        assert!(!err.is_tamper());
    }

    #[test]
    fn test_worker_spawn_failure_is_reported() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::OutOfMemory, "no threads left"));
        assert!(matches!(err, Error::Worker(_)));
        assert_eq!(err.to_string(), "Could not start worker thread: no threads left");
    }

    #[test]
    fn test_transport_errors_are_transport_failures() {
        let apdu = carkey_apdu_core::Error::from(TransportError::Disconnected).with_context("INSERT_START");
        assert!(matches!(
            Error::from(apdu),
            Error::TransportFailure(TransportError::Disconnected)
        ));
        assert!(matches!(
            Error::from(carkey_apdu_core::Error::IncompleteResponse(1)),
            Error::Apdu(_)
        ));
    }
}
