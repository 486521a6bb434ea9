use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::{Authority, AuthorityReply, AuthorityRequest};
use crate::error::ProcessFailure;
use crate::identity::{Certificate, PrincipalId, PublicKey};
use crate::mailbox::{self, Mailbox, Postbox};
use crate::messages::WireMessage;
use crate::Result;

/// Mail delivered to the authority's inbox
#[derive(Debug)]
pub enum AuthorityMail {
    /// An encoded [`AuthorityRequest`] and where to post the encoded reply
    Request {
        /// Encoded request
        body: Bytes,
        /// Reply mailbox of the requesting run
        reply_to: Postbox,
    },
    /// Stop the worker
    Shutdown,
}

/// The authority running on its own thread, serving its inbox in FIFO order
#[derive(Debug)]
pub struct AuthorityService {
    state: Arc<Mutex<Authority>>,
    inbox: Postbox<AuthorityMail>,
    worker: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl AuthorityService {
    /// Start serving `authority` on a thread of its own
    pub fn spawn(authority: Authority) -> Result<Self> {
        let timeout = authority.config.mailbox_timeout;
        let state = Arc::new(Mutex::new(authority));
        let (inbox, mailbox) = mailbox::channel::<AuthorityMail>();

        let worker_state = Arc::clone(&state);
        let worker = thread::Builder::new()
            .name("authority".into())
            .spawn(move || serve(&worker_state, &mailbox))?;

        Ok(Self {
            state,
            inbox,
            worker: Some(worker),
            timeout,
        })
    }

    /// Handle for terminals
    pub fn handle(&self) -> AuthorityHandle {
        AuthorityHandle::new(self.inbox.clone(), self.timeout)
    }

    /// Direct access to the authority state (enrolment, inspection)
    pub fn authority(&self) -> MutexGuard<'_, Authority> {
        self.state.lock()
    }

    /// Stop the worker and wait for it
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.inbox.post(AuthorityMail::Shutdown);
            if worker.join().is_err() {
                warn!("Authority worker panicked");
            }
        }
    }
}

impl Drop for AuthorityService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(state: &Mutex<Authority>, inbox: &Mailbox<AuthorityMail>) {
    while let Ok(mail) = inbox.recv() {
        match mail {
            AuthorityMail::Request { body, reply_to } => {
                let reply = match AuthorityRequest::decode(&body) {
                    Ok(request) => state.lock().handle(request),
                    Err(e) => AuthorityReply::Refused(format!("malformed request: {e}")),
                };
                if reply_to.post(reply.encode()).is_err() {
                    debug!("Requester gone before the reply");
                }
            }
            AuthorityMail::Shutdown => break,
        }
    }
    debug!("Authority worker stopped");
}

/// Terminal-side access to the authority.
///
/// Every request opens its own reply mailbox and waits on it for at most the
/// configured timeout.
#[derive(Debug, Clone)]
pub struct AuthorityHandle {
    inbox: Postbox<AuthorityMail>,
    timeout: Duration,
}

impl AuthorityHandle {
    /// Handle posting into `inbox`, waiting `timeout` for each reply
    pub const fn new(inbox: Postbox<AuthorityMail>, timeout: Duration) -> Self {
        Self { inbox, timeout }
    }

    /// Reply timeout
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Post `request` and wait for the reply
    pub fn request(&self, request: &AuthorityRequest) -> Result<AuthorityReply> {
        let (reply_to, replies) = mailbox::channel::<Bytes>();
        self.inbox.post(AuthorityMail::Request {
            body: request.encode(),
            reply_to,
        })?;
        let reply = replies.await_message(self.timeout)?;
        AuthorityReply::decode(&reply)
            .map_err(|e| ProcessFailure::Database(format!("malformed reply: {e}")).into())
    }

    /// Blocklist lookup
    pub fn is_blocked(&self, card: PrincipalId) -> Result<bool> {
        match self.request(&AuthorityRequest::IsBlocked(card))? {
            AuthorityReply::Blocked(blocked) => Ok(blocked),
            other => Err(unexpected(other)),
        }
    }

    /// Certify a card key
    pub fn register_card(&self, public_key: PublicKey) -> Result<Certificate> {
        match self.request(&AuthorityRequest::RegisterCard(public_key))? {
            AuthorityReply::Certificate(certificate) => Ok(certificate),
            other => Err(unexpected(other)),
        }
    }

    /// Ask for a free vehicle for `card`
    pub fn assign(&self, card: PrincipalId) -> Result<Certificate> {
        match self.request(&AuthorityRequest::AssignVehicle(card))? {
            AuthorityReply::VehicleAssigned(certificate) => Ok(certificate),
            AuthorityReply::NoVehicleAvailable => Err(ProcessFailure::NoVehicleAvailable.into()),
            AuthorityReply::CardBlocked => Err(ProcessFailure::CardBlocked(card).into()),
            other => Err(unexpected(other)),
        }
    }

    /// Close the rental of `card`; returns the acknowledgment text
    pub fn return_vehicle(&self, card: PrincipalId, usage: u32) -> Result<String> {
        acknowledgment(self.request(&AuthorityRequest::ReturnVehicle { card, usage })?)
    }

    /// Keep the rental of `card` open for reconciliation; returns the acknowledgment text
    pub fn hold_rental(&self, card: PrincipalId) -> Result<String> {
        acknowledgment(self.request(&AuthorityRequest::HoldRental(card))?)
    }

    /// Block `card`; returns the acknowledgment text
    pub fn block(&self, card: PrincipalId) -> Result<String> {
        acknowledgment(self.request(&AuthorityRequest::BlockCard(card))?)
    }

    /// Unblock `card`; returns the acknowledgment text
    pub fn unblock(&self, card: PrincipalId) -> Result<String> {
        acknowledgment(self.request(&AuthorityRequest::UnblockCard(card))?)
    }
}

fn acknowledgment(reply: AuthorityReply) -> Result<String> {
    match reply {
        AuthorityReply::Acknowledged(text) => Ok(text),
        other => Err(unexpected(other)),
    }
}

fn unexpected(reply: AuthorityReply) -> crate::Error {
    match reply {
        AuthorityReply::Refused(reason) => ProcessFailure::Database(reason).into(),
        other => ProcessFailure::Database(format!("unexpected reply {other:?}")).into(),
    }
}
