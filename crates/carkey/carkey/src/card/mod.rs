//! The smartcard applet: the responder side of every protocol.
//!
//! The card keeps one [`Session`] per link (vehicle, reception terminal) and a
//! single expected-step marker. Every command is validated before any state
//! changes; a failed check tears down the session of the command's link and
//! answers with the status word naming the failed check.

mod handshake;
mod rental;

use std::sync::Arc;

use bytes::Bytes;
use carkey_apdu_core::{Command, Response, StatusWord};
use tracing::{debug, instrument, warn};

use crate::codec::DecodeError;
use crate::config::ProtocolConfig;
use crate::constants::{cla, ins};
use crate::crypto::{NonceSource, RsaSigner, Signer};
use crate::identity::{Certificate, Credentials, PrincipalId, PublicKey};
use crate::messages::{BlockOrder, CardStatus, Signed, WireMessage};
use crate::session::Session;
use crate::status;

/// Lifecycle of a card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    /// Not issued yet
    Empty,
    /// Issued, no vehicle assigned
    Unassigned,
    /// A vehicle is assigned
    Assigned,
    /// Blocked for good
    EndOfLife,
}

impl CardState {
    /// Wire encoding
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Unassigned => 1,
            Self::Assigned => 2,
            Self::EndOfLife => 3,
        }
    }

    /// Parse the wire encoding
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Empty),
            1 => Some(Self::Unassigned),
            2 => Some(Self::Assigned),
            3 => Some(Self::EndOfLife),
            _ => None,
        }
    }
}

/// Which counterpart a command belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// The vehicle controller
    Vehicle,
    /// The reception terminal
    Terminal,
}

/// Link a protocol instruction belongs to; `None` for issuance, diagnostics
/// and unknown instructions
pub const fn link_of(instruction: u8) -> Option<Link> {
    match instruction {
        ins::INSERT_START | ins::INSERT_M2 | ins::INSERT_MS | ins::USAGE_UPDATE => Some(Link::Vehicle),
        ins::AUTH_RECEPTION_START
        | ins::AUTH_RECEPTION_M2
        | ins::AUTH_RECEPTION_MS
        | ins::CAR_ASSIGNMENT_START
        | ins::CAR_ASSIGNMENT_M2
        | ins::CAR_RETURN_START
        | ins::CAR_RETURN_M2
        | ins::CAR_RETURN_MS
        | ins::BLOCK => Some(Link::Terminal),
        _ => None,
    }
}

/// Link a rejected command interrupts. Issuance, diagnostics and unknown
/// classes leave every session alone.
const fn interrupted_link(command: &Command) -> Option<Link> {
    match command.cla {
        cla::AUTH | cla::PROC | cla::CONT | cla::EOL => link_of(command.ins),
        _ => None,
    }
}

/// Step the card expects next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    Start,
    InsertM2,
    InsertSuccess,
    ReceptionM2,
    ReceptionSuccess,
    AssignmentM2,
    ReturnM2,
    ReturnSuccess,
}

impl Awaiting {
    const fn for_continuation(instruction: u8) -> Option<Self> {
        match instruction {
            ins::INSERT_M2 => Some(Self::InsertM2),
            ins::INSERT_MS => Some(Self::InsertSuccess),
            ins::AUTH_RECEPTION_M2 => Some(Self::ReceptionM2),
            ins::AUTH_RECEPTION_MS => Some(Self::ReceptionSuccess),
            ins::CAR_ASSIGNMENT_M2 => Some(Self::AssignmentM2),
            ins::CAR_RETURN_M2 => Some(Self::ReturnM2),
            ins::CAR_RETURN_MS => Some(Self::ReturnSuccess),
            _ => None,
        }
    }
}

/// Vehicle bound to the card by an assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedVehicle {
    /// Vehicle id
    pub id: PrincipalId,
    /// Vehicle public key
    pub public_key: PublicKey,
}

/// Result of one command: an optional payload or the rejecting status word
type Outcome = std::result::Result<Option<Bytes>, StatusWord>;

/// Card applet state
#[derive(Debug, Clone)]
pub struct Smartcard {
    state: CardState,
    credentials: Option<Credentials>,
    pending_key: Option<RsaSigner>,
    authority_key: Option<PublicKey>,
    vehicle: Option<AssignedVehicle>,
    usage: u32,
    manipulated: bool,
    awaiting: Awaiting,
    vehicle_session: Session,
    terminal_session: Session,
    nonces: NonceSource,
    key_bits: usize,
}

impl Default for Smartcard {
    fn default() -> Self {
        Self::new(&ProtocolConfig::default())
    }
}

impl Smartcard {
    /// A blank card, to be issued at a reception terminal
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            state: CardState::Empty,
            credentials: None,
            pending_key: None,
            authority_key: None,
            vehicle: None,
            usage: 0,
            manipulated: false,
            awaiting: Awaiting::Start,
            vehicle_session: Session::default(),
            terminal_session: Session::default(),
            nonces: NonceSource::new(config.nonce_history),
            key_bits: config.key_bits,
        }
    }

    /// Process one command and answer it
    #[instrument(level = "trace", skip_all, fields(cla = command.cla, ins = command.ins))]
    pub fn process(&mut self, command: &Command) -> Response {
        match self.dispatch(command) {
            Ok(payload) => Response::success(payload),
            Err(status) => {
                if let Some(link) = interrupted_link(command) {
                    self.teardown(link);
                }
                Response::error(status)
            }
        }
    }

    /// The card left the reader: forget both sessions
    pub fn deselect(&mut self) {
        self.vehicle_session.destroy();
        self.terminal_session.destroy();
        self.awaiting = Awaiting::Start;
    }

    /// Lifecycle state
    pub const fn state(&self) -> CardState {
        self.state
    }

    /// Usage counter
    pub const fn usage(&self) -> u32 {
        self.usage
    }

    /// Whether a tampered usage update was seen
    pub const fn is_manipulated(&self) -> bool {
        self.manipulated
    }

    /// Card id, once issued
    pub fn id(&self) -> Option<PrincipalId> {
        self.credentials.as_ref().map(Credentials::id)
    }

    /// Vehicle assigned to the card
    pub const fn assigned_vehicle(&self) -> Option<&AssignedVehicle> {
        self.vehicle.as_ref()
    }

    /// Session with the vehicle
    pub const fn vehicle_session(&self) -> &Session {
        &self.vehicle_session
    }

    /// Session with the reception terminal
    pub const fn terminal_session(&self) -> &Session {
        &self.terminal_session
    }

    fn dispatch(&mut self, command: &Command) -> Outcome {
        let data = command.payload();

        if self.state == CardState::EndOfLife && command.cla != cla::DEBUG {
            return Err(reject(status::CARD_BLOCKED, "card reached end of life"));
        }

        match command.cla {
            cla::DEBUG => self.status(command.ins),
            cla::INIT => self.initialize(command.ins, data),
            cla::ERROR => {
                self.abort(command.ins, data);
                Ok(None)
            }
            _ if self.state == CardState::Empty => Err(reject(status::NOT_INITIALIZED, "card not issued")),
            cla::AUTH => match command.ins {
                ins::INSERT_START => self.offer_certificate(Link::Vehicle),
                ins::AUTH_RECEPTION_START => self.offer_certificate(Link::Terminal),
                _ => Err(status::INVALID_INSTRUCTION),
            },
            cla::PROC => match command.ins {
                ins::CAR_ASSIGNMENT_START => self.request_assignment(),
                ins::CAR_RETURN_START => self.request_return(),
                ins::USAGE_UPDATE => self.update_usage(data),
                _ => Err(status::INVALID_INSTRUCTION),
            },
            cla::CONT => self.continue_protocol(command.ins, data),
            cla::EOL => match command.ins {
                ins::BLOCK => self.block(data),
                _ => Err(status::INVALID_INSTRUCTION),
            },
            _ => Err(status::CLASS_NOT_SUPPORTED),
        }
    }

    fn continue_protocol(&mut self, instruction: u8, data: &[u8]) -> Outcome {
        let expected = Awaiting::for_continuation(instruction).ok_or(status::INVALID_INSTRUCTION)?;
        if self.awaiting != expected {
            warn!(awaiting = ?self.awaiting, received = ?expected, "Out-of-order step");
            return Err(status::CONDITIONS_NOT_SATISFIED);
        }

        match instruction {
            ins::INSERT_M2 => self.answer_challenge(Link::Vehicle, data),
            ins::INSERT_MS => self.confirm_authentication(Link::Vehicle, data),
            ins::AUTH_RECEPTION_M2 => self.answer_challenge(Link::Terminal, data),
            ins::AUTH_RECEPTION_MS => self.confirm_authentication(Link::Terminal, data),
            ins::CAR_ASSIGNMENT_M2 => self.accept_assignment(data),
            ins::CAR_RETURN_M2 => self.report_usage(data),
            ins::CAR_RETURN_MS => self.finish_return(data),
            _ => Err(status::INVALID_INSTRUCTION),
        }
    }

    fn initialize(&mut self, instruction: u8, data: &[u8]) -> Outcome {
        if self.state != CardState::Empty {
            return Err(reject(status::CONDITIONS_NOT_SATISFIED, "card already issued"));
        }

        match instruction {
            ins::GENERATE_KEYS => {
                let authority_key = PublicKey::decode(data).map_err(malformed)?;
                let signer = RsaSigner::generate(self.key_bits).map_err(|e| {
                    warn!(error = %e, "Key generation failed");
                    status::NO_PRECISE_DIAGNOSIS
                })?;
                let field = signer.public_key().encode();
                self.authority_key = Some(authority_key);
                self.pending_key = Some(signer);
                debug!("Generated card key pair");
                Ok(Some(Bytes::copy_from_slice(&field)))
            }
            ins::STORE_CERTIFICATE => {
                let certificate = Certificate::decode(data).map_err(malformed)?;
                let (Some(signer), Some(authority_key)) = (&self.pending_key, &self.authority_key) else {
                    return Err(reject(status::CONDITIONS_NOT_SATISFIED, "no key pair generated"));
                };
                if certificate.public_key() != signer.public_key() || !certificate.verify(authority_key) {
                    return Err(reject(status::BAD_CERTIFICATE, "certificate does not match card key"));
                }
                let signer: Arc<dyn Signer> = Arc::new(signer.clone());
                let credentials =
                    Credentials::new(signer, certificate).map_err(|_| status::BAD_CERTIFICATE)?;
                debug!(id = %credentials.id(), "Card issued");
                self.credentials = Some(credentials);
                self.pending_key = None;
                self.state = CardState::Unassigned;
                Ok(None)
            }
            _ => Err(status::INVALID_INSTRUCTION),
        }
    }

    fn block(&mut self, data: &[u8]) -> Outcome {
        if self.awaiting != Awaiting::ReceptionM2 {
            return Err(reject(status::CONDITIONS_NOT_SATISFIED, "block order outside authentication"));
        }
        let order = BlockOrder::decode(data).map_err(malformed)?;
        if !order.terminal.verify(self.authority_key()?) {
            return Err(reject(status::BAD_CERTIFICATE, "block order from uncertified terminal"));
        }
        if !self.terminal_session.accepts(order.sequence, 0) {
            return Err(reject(status::BAD_SEQUENCE, "stale block order"));
        }
        if !order.verify(order.terminal.public_key()) {
            return Err(reject(status::BAD_SIGNATURE, "block order signature"));
        }

        warn!(terminal = %order.terminal.id(), "Card blocked");
        self.state = CardState::EndOfLife;
        self.deselect();
        Ok(None)
    }

    fn abort(&mut self, instruction: u8, data: &[u8]) {
        let reason = match data {
            [sw1, sw2] => status::describe(StatusWord::new(*sw1, *sw2)),
            _ => "unspecified",
        };
        warn!(ins = instruction, reason, "Peer aborted the protocol");
        if let Some(link) = link_of(instruction) {
            self.teardown(link);
        }
    }

    fn status(&self, instruction: u8) -> Outcome {
        if instruction != ins::STATUS {
            return Err(status::INVALID_INSTRUCTION);
        }
        let report = CardStatus {
            state: self.state,
            usage: self.usage,
            manipulated: self.manipulated,
            id: self.id(),
        };
        Ok(Some(report.encode()))
    }

    fn teardown(&mut self, link: Link) {
        self.session_mut(link).destroy();
        self.awaiting = Awaiting::Start;
    }

    fn credentials(&self) -> std::result::Result<&Credentials, StatusWord> {
        self.credentials.as_ref().ok_or(status::NOT_INITIALIZED)
    }

    fn authority_key(&self) -> std::result::Result<&PublicKey, StatusWord> {
        self.authority_key.as_ref().ok_or(status::NOT_INITIALIZED)
    }

    const fn session(&self, link: Link) -> &Session {
        match link {
            Link::Vehicle => &self.vehicle_session,
            Link::Terminal => &self.terminal_session,
        }
    }

    const fn session_mut(&mut self, link: Link) -> &mut Session {
        match link {
            Link::Vehicle => &mut self.vehicle_session,
            Link::Terminal => &mut self.terminal_session,
        }
    }
}

fn reject(status: StatusWord, reason: &'static str) -> StatusWord {
    warn!(status = %status, reason, "Rejecting command");
    status
}

fn malformed(error: DecodeError) -> StatusWord {
    warn!(%error, "Malformed command payload");
    status::WRONG_LENGTH
}

fn signing_failed(error: crate::Error) -> StatusWord {
    warn!(%error, "Signing failed");
    status::NO_PRECISE_DIAGNOSIS
}
