//! Transport traits for APDU communication with cards
//!
//! This module provides abstractions for communicating with smart cards through
//! different transport mechanisms.

pub mod error;

use std::fmt;

use bytes::Bytes;
pub use error::TransportError;
use tracing::{debug, trace};

use crate::{Command, Response, ResultExt};

/// Trait for basic card transports
///
/// A transport is responsible for sending and receiving raw APDU bytes.
/// It has no knowledge of command semantics. One call to [`transmit_raw`] is one
/// complete round-trip; implementations must not interleave another exchange while
/// a command is outstanding.
///
/// [`transmit_raw`]: CardTransport::transmit_raw
pub trait CardTransport: Send + fmt::Debug {
    /// Send raw APDU bytes to card and return response bytes
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        trace!(command = ?hex::encode(command), "Transmitting raw command");
        let result = self.do_transmit_raw(command);
        match &result {
            Ok(response) => {
                trace!(response = ?hex::encode(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = ?e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of transmit_raw
    /// This is the method that concrete implementations should override
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError>;

    /// Serialize a command, transmit it and parse the response
    fn transmit(&mut self, command: &Command) -> crate::Result<Response> {
        let bytes = command.to_bytes()?;
        let response = self
            .transmit_raw(&bytes)
            .map_err(crate::Error::from)
            .context(format!(
                "CLA {:#04x} INS {:#04x}",
                command.cla, command.ins
            ))?;
        Response::from_bytes(&response)
    }

    /// Check if the transport is connected to a card
    fn is_connected(&self) -> bool;

    /// Reset the transport connection
    fn reset(&mut self) -> Result<(), TransportError>;
}

impl<T: CardTransport + ?Sized> CardTransport for Box<T> {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        (**self).transmit_raw(command)
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        (**self).do_transmit_raw(command)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        (**self).reset()
    }
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct MockTransport {
    /// Mock responses to return
    pub(crate) responses: Vec<Bytes>,
    /// Commands that were sent
    pub(crate) commands: Vec<Bytes>,
    /// Whether the transport is connected
    pub(crate) connected: bool,
}

#[cfg(test)]
impl MockTransport {
    pub(crate) fn new(responses: Vec<Bytes>) -> Self {
        Self {
            responses,
            commands: Vec::new(),
            connected: true,
        }
    }
}

#[cfg(test)]
impl CardTransport for MockTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        if !self.connected {
            return Err(TransportError::Connection);
        }

        self.commands.push(Bytes::copy_from_slice(command));

        if self.responses.is_empty() {
            return Err(TransportError::Transmission);
        }
        Ok(self.responses.remove(0))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        self.commands.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_transmit_command() {
        let mut transport = MockTransport::new(vec![Bytes::from_static(&[0x01, 0x90, 0x00])]);
        let response = transport
            .transmit(&Command::new(0x80, 0x01, 0x00, 0x00).with_data(vec![0xAB]))
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.data(), &[0x01]);
        assert_eq!(transport.commands[0].as_ref(), &[0x80, 0x01, 0x00, 0x00, 0x01, 0xAB]);
    }

    #[test]
    fn test_transmit_failure_carries_context() {
        let mut transport = MockTransport::new(Vec::new());
        let err = transport
            .transmit(&Command::new(0x80, 0x02, 0x00, 0x00))
            .unwrap_err();

        assert!(matches!(err, Error::Context { .. }));
        assert_eq!(err.transport_error(), Some(&TransportError::Transmission));
    }

    #[test]
    fn test_disconnected() {
        let mut transport = MockTransport::new(Vec::new());
        transport.connected = false;
        assert_eq!(
            transport.transmit_raw(&[0x80, 0x01, 0x00, 0x00]),
            Err(TransportError::Connection)
        );
        transport.reset().unwrap();
        assert!(transport.is_connected());
    }
}
