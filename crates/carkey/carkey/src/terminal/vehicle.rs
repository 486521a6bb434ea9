use carkey_apdu_core::{CardTransport, TransportError};
use tracing::{debug, info, instrument, warn};

use super::handshake::{self, VEHICLE_STEPS};
use super::{CardLink, Phase};
use crate::config::ProtocolConfig;
use crate::constants::{cla, ins};
use crate::crypto::NonceSource;
use crate::error::{ProcessFailure, Tamper};
use crate::identity::{Credentials, PrincipalId, PublicKey};
use crate::messages::{Signed, UsageConfirmation, UsageUpdate, WireMessage};
use crate::session::Session;
use crate::{Error, Result, status};

/// Vehicle controller: authenticates the inserted card (P1) and co-signs the
/// usage counter with it (P5)
#[derive(Debug)]
pub struct Vehicle<T> {
    credentials: Credentials,
    authority_key: PublicKey,
    link: Option<CardLink<T>>,
    session: Session,
    nonces: NonceSource,
    /// Card the rental counter belongs to
    renter: Option<PrincipalId>,
    usage: u32,
}

impl<T: CardTransport> Vehicle<T> {
    /// Vehicle holding `credentials`, trusting certificates issued under `authority_key`
    pub fn new(credentials: Credentials, authority_key: PublicKey, config: &ProtocolConfig) -> Self {
        Self {
            credentials,
            authority_key,
            link: None,
            session: Session::default(),
            nonces: NonceSource::new(config.nonce_history),
            renter: None,
            usage: 0,
        }
    }

    /// Vehicle id
    pub const fn id(&self) -> PrincipalId {
        self.credentials.id()
    }

    /// Rental usage counter as last confirmed by the card
    pub const fn usage(&self) -> u32 {
        self.usage
    }

    /// Session with the inserted card
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Insert a card
    pub fn insert(&mut self, transport: T) {
        self.session.destroy();
        self.link = Some(CardLink::new(transport));
    }

    /// Remove the card, returning its transport
    pub fn eject(&mut self) -> Option<T> {
        self.session.destroy();
        self.link.take().map(CardLink::into_inner)
    }

    /// Forget the rental counter; the next authenticated card starts from zero
    pub fn end_rental(&mut self) {
        self.renter = None;
        self.usage = 0;
    }

    /// P1: mutually authenticate the inserted card
    #[instrument(level = "debug", skip_all, fields(vehicle = %self.credentials.id()))]
    pub fn authenticate_card(&mut self) -> Result<PrincipalId> {
        self.session.destroy();
        let link = self
            .link
            .as_mut()
            .ok_or(Error::TransportFailure(TransportError::Disconnected))?;

        let offer = handshake::receive_offer(link, VEHICLE_STEPS, &self.authority_key)?;
        handshake::complete(
            link,
            VEHICLE_STEPS,
            &self.credentials,
            &mut self.session,
            &mut self.nonces,
            &offer,
        )?;

        let card = offer.certificate.id();
        if self.renter != Some(card) {
            debug!(%card, "New renter, resetting usage counter");
            self.renter = Some(card);
            self.usage = 0;
        }
        info!(%card, "Card authenticated");
        Ok(card)
    }

    /// P5: advance the usage counter by one and have the card co-sign it.
    ///
    /// The counter is committed only after the card's confirmation carries the
    /// same value, in sequence, under a valid signature. A rejected confirmation
    /// is reported back to the card, which drops its vehicle session.
    #[instrument(level = "debug", skip_all, fields(vehicle = %self.credentials.id()))]
    pub fn update_usage(&mut self) -> Result<u32> {
        if !self.session.is_authenticated() {
            return Err(ProcessFailure::NotAuthenticated.into());
        }
        let result = self.run_update();
        if result.is_err() {
            self.session.destroy();
        }
        result
    }

    fn run_update(&mut self) -> Result<u32> {
        let link = self
            .link
            .as_mut()
            .ok_or(Error::TransportFailure(TransportError::Disconnected))?;
        let session = &mut self.session;
        let card_key = session
            .peer_public_key()
            .cloned()
            .ok_or(ProcessFailure::NotAuthenticated)?;

        let counter = self.usage.wrapping_add(1);
        let step = session.next_step();
        let update = UsageUpdate::sign(counter, session.outgoing(step.wrapping_add(1)), self.credentials.signer())?;
        let payload = link.expect(cla::PROC, ins::USAGE_UPDATE, &update.encode(), Phase::Process)?;
        let confirmation = match UsageConfirmation::decode(&payload) {
            Ok(confirmation) => confirmation,
            Err(e) => {
                link.abort(ins::USAGE_UPDATE, status::WRONG_LENGTH);
                return Err(Phase::Process.malformed(e));
            }
        };

        if confirmation.counter != counter {
            warn!(expected = counter, received = confirmation.counter, "Card confirmed a different counter");
            link.abort(ins::USAGE_UPDATE, status::MANIPULATION);
            return Err(Tamper::CounterMismatch {
                expected: counter,
                received: confirmation.counter,
            }
            .into());
        }
        if !session.accepts(confirmation.sequence, step) {
            link.abort(ins::USAGE_UPDATE, status::BAD_SEQUENCE);
            return Err(Phase::Process.sequence_mismatch());
        }
        if !confirmation.verify(&card_key) {
            link.abort(ins::USAGE_UPDATE, status::BAD_SIGNATURE);
            return Err(Phase::Process.bad_signature());
        }

        session.advance();
        self.usage = counter;
        debug!(usage = counter, "Usage counter confirmed");
        Ok(counter)
    }
}
