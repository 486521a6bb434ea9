use bytes::Bytes;
use carkey_apdu_core::{CardTransport, Command, Response, StatusWord};
use tracing::{Level, debug, warn};

use crate::codec::DecodeError;
use crate::constants::cla;
use crate::error::{AuthFailure, ProcessFailure, Tamper};
use crate::{Error, Result, status};

/// Protocol phase a step belongs to; selects how failures are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Mutual authentication
    Authentication,
    /// Any step after authentication
    Process,
}

impl Phase {
    /// Error for a status word the card answered with
    pub fn rejected(self, status: StatusWord) -> Error {
        if status == status::NOT_INITIALIZED {
            return Error::CardNotInitialized;
        }
        match self {
            Self::Authentication => AuthFailure::Rejected(status).into(),
            Self::Process if status == status::MANIPULATION => Tamper::CardRejectedCounter.into(),
            Self::Process => ProcessFailure::Rejected(status).into(),
        }
    }

    /// Error for a card message that could not be decoded
    pub fn malformed(self, error: DecodeError) -> Error {
        match self {
            Self::Authentication => AuthFailure::Malformed(error).into(),
            Self::Process => ProcessFailure::Malformed(error).into(),
        }
    }

    /// Error for a card signature that did not verify
    pub fn bad_signature(self) -> Error {
        match self {
            Self::Authentication => AuthFailure::BadSignature.into(),
            Self::Process => ProcessFailure::BadSignature.into(),
        }
    }

    /// Error for a nonce echo that did not match
    pub fn nonce_mismatch(self) -> Error {
        match self {
            Self::Authentication => AuthFailure::NonceMismatch.into(),
            Self::Process => ProcessFailure::NonceMismatch.into(),
        }
    }

    /// Error for an out-of-order sequence number
    pub fn sequence_mismatch(self) -> Error {
        match self {
            Self::Authentication => AuthFailure::SequenceMismatch.into(),
            Self::Process => ProcessFailure::SequenceMismatch.into(),
        }
    }
}

/// APDU channel to a card.
///
/// Each [`exchange`](Self::exchange) is one complete round-trip; the link is
/// borrowed mutably for its duration, so nothing can interleave.
#[derive(Debug)]
pub struct CardLink<T> {
    transport: T,
}

impl<T: CardTransport> CardLink<T> {
    /// Wrap a transport
    pub const fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Underlying transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably
    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Release the transport
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Send one command and wait for the card's answer
    pub fn exchange(&mut self, class: u8, instruction: u8, payload: &[u8]) -> Result<Response> {
        let command =
            Command::new(class, instruction, 0x00, 0x00).with_data(Bytes::copy_from_slice(payload));
        let response = self.transport.transmit(&command)?;

        let sw = response.status();
        if sw.tracing_level() == Level::DEBUG {
            debug!(cla = class, ins = instruction, len = response.data().len(), "Card answered");
        } else {
            warn!(
                cla = class,
                ins = instruction,
                status = %sw,
                reason = status::describe(sw),
                "Card rejected command"
            );
        }
        Ok(response)
    }

    /// Exchange and require success, returning the response payload
    pub fn expect(&mut self, class: u8, instruction: u8, payload: &[u8], phase: Phase) -> Result<Bytes> {
        let response = self.exchange(class, instruction, payload)?;
        if response.is_success() {
            Ok(response.payload().clone().unwrap_or_default())
        } else {
            Err(phase.rejected(response.status()))
        }
    }

    /// Tell the card the step `instruction` was rejected with `status`.
    ///
    /// Best effort: a failure to deliver the abort is logged and ignored.
    pub fn abort(&mut self, instruction: u8, status: StatusWord) {
        if let Err(e) = self.exchange(cla::ERROR, instruction, &status.to_bytes()) {
            debug!(error = %e, "Abort not delivered");
        }
    }

    /// Whether the transport is connected
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}
