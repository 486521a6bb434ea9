//! Card transports for simulation and tests.
//!
//! [`LocalCard`] drives a [`Smartcard`] in-process, [`CardActor`] runs it on a
//! thread of its own behind channels, and [`Interceptor`] wraps any transport to
//! rewrite or delay the raw bytes in both directions.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use carkey_apdu_core::{CardTransport, Command, Response, TransportError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::card::Smartcard;
use crate::status;

/// Run one raw command through the applet. Unparseable framing is answered
/// with `WRONG_LENGTH`.
fn answer(card: &mut Smartcard, raw: &[u8]) -> Bytes {
    match Command::from_bytes(raw) {
        Ok(command) => card.process(&command).to_bytes(),
        Err(e) => {
            debug!(error = %e, "Unparseable command");
            Response::error(status::WRONG_LENGTH).to_bytes()
        }
    }
}

/// In-process transport to a card.
///
/// The card is locked for the whole round-trip.
#[derive(Debug, Clone)]
pub struct LocalCard {
    card: Arc<Mutex<Smartcard>>,
    connected: bool,
}

impl LocalCard {
    /// Transport owning `card`
    pub fn new(card: Smartcard) -> Self {
        Self::shared(Arc::new(Mutex::new(card)))
    }

    /// Transport to a card shared with other transports
    pub const fn shared(card: Arc<Mutex<Smartcard>>) -> Self {
        Self {
            card,
            connected: true,
        }
    }

    /// The card behind this transport
    pub const fn card(&self) -> &Arc<Mutex<Smartcard>> {
        &self.card
    }

    /// Simulate pulling the card; transmissions fail until [`reset`](CardTransport::reset)
    pub fn disconnect(&mut self) {
        self.connected = false;
    }
}

impl CardTransport for LocalCard {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        Ok(answer(&mut self.card.lock(), command))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.card.lock().deselect();
        self.connected = true;
        Ok(())
    }
}

enum ActorMail {
    Command { raw: Bytes, reply_to: Sender<Bytes> },
    Reset,
    Stop,
}

/// A card running on its own thread, reachable only through messages
#[derive(Debug)]
pub struct CardActor {
    inbox: Sender<ActorMail>,
    worker: Option<JoinHandle<Smartcard>>,
}

impl fmt::Debug for ActorMail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command { raw, .. } => write!(f, "Command({})", hex::encode(raw)),
            Self::Reset => f.write_str("Reset"),
            Self::Stop => f.write_str("Stop"),
        }
    }
}

impl CardActor {
    /// Move `card` onto a new thread
    pub fn spawn(card: Smartcard) -> std::io::Result<Self> {
        let (inbox, mailbox) = unbounded();
        let worker = thread::Builder::new()
            .name("card".into())
            .spawn(move || run_card(card, &mailbox))?;
        Ok(Self {
            inbox,
            worker: Some(worker),
        })
    }

    /// A transport to this card. `timeout` bounds each round-trip; `None` waits forever.
    pub fn transport(&self, timeout: Option<Duration>) -> ActorTransport {
        ActorTransport {
            inbox: self.inbox.clone(),
            timeout,
            connected: true,
        }
    }

    /// Stop the thread and take the card back
    pub fn stop(mut self) -> Option<Smartcard> {
        self.halt()
    }

    fn halt(&mut self) -> Option<Smartcard> {
        let worker = self.worker.take()?;
        let _ = self.inbox.send(ActorMail::Stop);
        match worker.join() {
            Ok(card) => Some(card),
            Err(_) => {
                warn!("Card thread panicked");
                None
            }
        }
    }
}

impl Drop for CardActor {
    fn drop(&mut self) {
        self.halt();
    }
}

fn run_card(mut card: Smartcard, mailbox: &Receiver<ActorMail>) -> Smartcard {
    while let Ok(mail) = mailbox.recv() {
        trace!(?mail, "Card thread received");
        match mail {
            ActorMail::Command { raw, reply_to } => {
                let response = answer(&mut card, &raw);
                if reply_to.send(response).is_err() {
                    debug!("Host stopped waiting for the response");
                }
            }
            ActorMail::Reset => card.deselect(),
            ActorMail::Stop => break,
        }
    }
    card
}

/// Transport to a [`CardActor`]
#[derive(Debug, Clone)]
pub struct ActorTransport {
    inbox: Sender<ActorMail>,
    timeout: Option<Duration>,
    connected: bool,
}

impl CardTransport for ActorTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        let (reply_to, replies) = bounded(1);
        self.inbox
            .send(ActorMail::Command {
                raw: Bytes::copy_from_slice(command),
                reply_to,
            })
            .map_err(|_| TransportError::Disconnected)?;

        match self.timeout {
            None => replies.recv().map_err(|_| TransportError::Disconnected),
            Some(timeout) => replies.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => TransportError::Timeout,
                RecvTimeoutError::Disconnected => TransportError::Disconnected,
            }),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.inbox
            .send(ActorMail::Reset)
            .map_err(|_| TransportError::Disconnected)?;
        self.connected = true;
        Ok(())
    }
}

/// Direction of the bytes an [`Interceptor`] hook sees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to card
    Command,
    /// Card to host
    Response,
}

type Hook = Box<dyn FnMut(Direction, &mut Vec<u8>) -> Result<(), TransportError> + Send>;

/// Wraps a transport and hands every command and response to a hook first.
///
/// The hook may rewrite the bytes in place, sleep, or fail the round-trip.
pub struct Interceptor<T> {
    inner: T,
    hook: Hook,
}

impl<T: fmt::Debug> fmt::Debug for Interceptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<T: CardTransport> Interceptor<T> {
    /// Wrap `inner` with `hook`
    pub fn new<F>(inner: T, hook: F) -> Self
    where
        F: FnMut(Direction, &mut Vec<u8>) -> Result<(), TransportError> + Send + 'static,
    {
        Self {
            inner,
            hook: Box::new(hook),
        }
    }

    /// Wrapped transport
    pub const fn inner(&self) -> &T {
        &self.inner
    }

    /// Unwrap
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: CardTransport> CardTransport for Interceptor<T> {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        let mut command = command.to_vec();
        (self.hook)(Direction::Command, &mut command)?;
        let mut response = self.inner.transmit_raw(&command)?.to_vec();
        (self.hook)(Direction::Response, &mut response)?;
        Ok(response.into())
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.inner.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::CardState;
    use crate::constants::cla;

    fn status_command() -> Command {
        Command::new(cla::DEBUG, crate::constants::ins::STATUS, 0x00, 0x00)
    }

    #[test]
    fn test_local_card_answers() {
        let mut transport = LocalCard::new(Smartcard::default());
        let response = transport.transmit(&status_command()).unwrap();
        assert!(response.is_success());
        assert_eq!(transport.card().lock().state(), CardState::Empty);
    }

    #[test]
    fn test_garbage_is_wrong_length() {
        let mut transport = LocalCard::new(Smartcard::default());
        let raw = transport.transmit_raw(&[0x80, 0x10]).unwrap();
        assert_eq!(raw.as_ref(), &status::WRONG_LENGTH.to_bytes());
    }

    #[test]
    fn test_disconnected_local_card() {
        let mut transport = LocalCard::new(Smartcard::default());
        transport.disconnect();
        assert_eq!(
            transport.transmit_raw(&[0x86, 0x7F, 0x00, 0x00]),
            Err(TransportError::Disconnected)
        );
        transport.reset().unwrap();
        assert!(transport.is_connected());
    }

    #[test]
    fn test_actor_round_trip_and_stop() {
        let actor = CardActor::spawn(Smartcard::default()).unwrap();
        let mut transport = actor.transport(Some(Duration::from_secs(5)));
        assert!(transport.transmit(&status_command()).unwrap().is_success());

        let card = actor.stop().unwrap();
        assert_eq!(card.state(), CardState::Empty);
        assert_eq!(
            transport.transmit_raw(&[0x86, 0x7F, 0x00, 0x00]),
            Err(TransportError::Disconnected)
        );
    }

    #[test]
    fn test_interceptor_rewrites_and_fails() {
        let mut transport = Interceptor::new(LocalCard::new(Smartcard::default()), |direction, bytes| {
            match direction {
                Direction::Command if bytes[1] == 0x00 => Err(TransportError::Transmission),
                Direction::Command => Ok(()),
                Direction::Response => {
                    bytes.clear();
                    bytes.extend_from_slice(&[0x90, 0x00]);
                    Ok(())
                }
            }
        });
        assert_eq!(
            transport.transmit_raw(&[0x86, 0x00, 0x00, 0x00]),
            Err(TransportError::Transmission)
        );
        assert_eq!(transport.transmit_raw(&[0x86, 0x7F, 0x00, 0x00]).unwrap().as_ref(), &[0x90, 0x00]);
    }
}
