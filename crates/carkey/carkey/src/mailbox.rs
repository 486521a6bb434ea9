//! Asynchronous FIFO mailboxes for out-of-band coordination with the authority.
//!
//! A mailbox has exactly one consumer. Any number of [`Postbox`] clones may post
//! into it. Terminals open a fresh reply mailbox per request instead of sharing
//! one inbound queue.

use std::time::Duration;

use bytes::Bytes;
use carkey_apdu_core::TransportError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::{Error, Result};

/// Open a mailbox and the postbox that feeds it
pub fn channel<M>() -> (Postbox<M>, Mailbox<M>) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (Postbox { sender }, Mailbox { receiver })
}

/// Sending half of a mailbox
#[derive(Debug)]
pub struct Postbox<M = Bytes> {
    sender: Sender<M>,
}

impl<M> Clone for Postbox<M> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<M> Postbox<M> {
    /// Post a message; fails once the mailbox is gone
    pub fn post(&self, message: M) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| Error::TransportFailure(TransportError::Disconnected))
    }
}

/// Receiving half of a mailbox
#[derive(Debug)]
pub struct Mailbox<M = Bytes> {
    receiver: Receiver<M>,
}

impl<M> Mailbox<M> {
    /// Block until a message arrives or `timeout` elapses
    pub fn await_message(&self, timeout: Duration) -> Result<M> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => Error::MessageTimeout(timeout),
            RecvTimeoutError::Disconnected => Error::TransportFailure(TransportError::Disconnected),
        })
    }

    /// Block until a message arrives or every postbox is dropped
    pub fn recv(&self) -> Result<M> {
        self.receiver
            .recv()
            .map_err(|_| Error::TransportFailure(TransportError::Disconnected))
    }

    /// Take a message if one is waiting
    pub fn try_message(&self) -> Result<Option<M>> {
        match self.receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::TransportFailure(TransportError::Disconnected)),
        }
    }

    /// Messages waiting
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether no message is waiting
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
