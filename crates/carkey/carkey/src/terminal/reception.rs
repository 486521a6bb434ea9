use carkey_apdu_core::{CardTransport, TransportError};
use tracing::{info, instrument, warn};

use super::handshake::{self, RECEPTION_STEPS};
use super::{CardLink, Phase};
use crate::authority::{self, AuthorityHandle};
use crate::config::ProtocolConfig;
use crate::constants::{cla, ins};
use crate::crypto::NonceSource;
use crate::error::{AuthFailure, ProcessFailure, Tamper};
use crate::identity::{Credentials, PrincipalId, PublicKey};
use crate::messages::{
    AssignmentGrant, AssignmentRequest, BlockOrder, ReturnChallenge, ReturnReport, ReturnRequest,
    Signed, SuccessProof, WireMessage,
};
use crate::session::Session;
use crate::{Error, Result, status};

const PHASE: Phase = Phase::Process;

/// Reception terminal: issues cards, authenticates them (P2), assigns (P3) and
/// takes back (P4) vehicles, and blocks cards (P6). Consults the authority
/// through its mailbox.
#[derive(Debug)]
pub struct ReceptionTerminal<T> {
    credentials: Credentials,
    authority_key: PublicKey,
    authority: AuthorityHandle,
    link: Option<CardLink<T>>,
    session: Session,
    nonces: NonceSource,
}

impl<T: CardTransport> ReceptionTerminal<T> {
    /// Terminal holding `credentials`, trusting `authority_key`, consulting `authority`
    pub fn new(
        credentials: Credentials,
        authority_key: PublicKey,
        authority: AuthorityHandle,
        config: &ProtocolConfig,
    ) -> Self {
        Self {
            credentials,
            authority_key,
            authority,
            link: None,
            session: Session::default(),
            nonces: NonceSource::new(config.nonce_history),
        }
    }

    /// Terminal id
    pub const fn id(&self) -> PrincipalId {
        self.credentials.id()
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

    fn link(&mut self) -> Result<&mut CardLink<T>> {
        self.link
            .as_mut()
            .ok_or(Error::TransportFailure(TransportError::Disconnected))
    }

    /// Issue the inserted blank card: it generates its key pair, the authority
    /// certifies the public key under a fresh id
    #[instrument(level = "debug", skip_all)]
    pub fn issue_card(&mut self) -> Result<PrincipalId> {
        let authority_key = self.authority_key.encode();
        let link = self.link()?;
        let payload = link.expect(cla::INIT, ins::GENERATE_KEYS, &authority_key, PHASE)?;
        let card_key = PublicKey::decode(&payload).map_err(|e| PHASE.malformed(e))?;

        let certificate = self.authority.register_card(card_key)?;
        let id = certificate.id();
        self.link()?
            .expect(cla::INIT, ins::STORE_CERTIFICATE, &certificate.encode(), PHASE)?;
        info!(card = %id, "Card issued");
        Ok(id)
    }

    /// P2: mutually authenticate the inserted card.
    ///
    /// The blocklist is consulted once the card's certificate verifies. A blocked
    /// card receives a signed block order instead of the challenge and is retired.
    #[instrument(level = "debug", skip_all, fields(terminal = %self.credentials.id()))]
    pub fn authenticate_card(&mut self) -> Result<PrincipalId> {
        self.session.destroy();
        let link = self
            .link
            .as_mut()
            .ok_or(Error::TransportFailure(TransportError::Disconnected))?;

        let offer = handshake::receive_offer(link, RECEPTION_STEPS, &self.authority_key)?;
        let card = offer.certificate.id();

        let blocked = match self.authority.is_blocked(card) {
            Ok(blocked) => blocked,
            Err(e) => {
                link.abort(RECEPTION_STEPS.challenge, status::DATABASE_ERROR);
                return Err(e);
            }
        };
        if blocked {
            warn!(%card, "Card is blocked, retiring it");
            let order = BlockOrder::sign(
                self.credentials.certificate().clone(),
                offer.nonce,
                self.credentials.signer(),
            )?;
            link.expect(cla::EOL, ins::BLOCK, &order.encode(), Phase::Authentication)?;
            return Err(AuthFailure::CardBlocked(card).into());
        }

        handshake::complete(
            link,
            RECEPTION_STEPS,
            &self.credentials,
            &mut self.session,
            &mut self.nonces,
            &offer,
        )?;
        info!(%card, "Card authenticated");
        Ok(card)
    }

    fn authenticated_card(&self) -> Result<(PrincipalId, PublicKey)> {
        match (self.session.is_authenticated(), self.session.peer_id(), self.session.peer_public_key()) {
            (true, Some(id), Some(key)) => Ok((id, key.clone())),
            _ => Err(ProcessFailure::NotAuthenticated.into()),
        }
    }

    /// P3: hand the authenticated card a free vehicle. Consumes the session.
    ///
    /// A grant the card rejects is released at the authority again. Once the card
    /// has answered the grant with success it holds the vehicle, so a proof that
    /// fails to verify leaves the rental open and held for reconciliation.
    #[instrument(level = "debug", skip_all, fields(terminal = %self.credentials.id()))]
    pub fn assign_vehicle(&mut self) -> Result<PrincipalId> {
        let (card, card_key) = self.authenticated_card()?;
        let result = self.run_assignment(card, &card_key);
        self.session.destroy();
        result
    }

    fn run_assignment(&mut self, card: PrincipalId, card_key: &PublicKey) -> Result<PrincipalId> {
        let link = self
            .link
            .as_mut()
            .ok_or(Error::TransportFailure(TransportError::Disconnected))?;
        let session = &self.session;

        let payload = link.expect(cla::PROC, ins::CAR_ASSIGNMENT_START, &[], PHASE)?;
        let request = match AssignmentRequest::decode(&payload) {
            Ok(request) => request,
            Err(e) => {
                link.abort(ins::CAR_ASSIGNMENT_M2, status::WRONG_LENGTH);
                return Err(PHASE.malformed(e));
            }
        };
        if !session.accepts(request.sequence, 1) {
            link.abort(ins::CAR_ASSIGNMENT_M2, status::BAD_SEQUENCE);
            return Err(PHASE.sequence_mismatch());
        }
        if !request.verify(card_key) {
            link.abort(ins::CAR_ASSIGNMENT_M2, status::BAD_SIGNATURE);
            return Err(PHASE.bad_signature());
        }

        let vehicle = match self.authority.assign(card) {
            Ok(vehicle) => vehicle,
            Err(e) => {
                warn!(%card, error = %e, "Authority could not assign a vehicle");
                link.abort(ins::CAR_ASSIGNMENT_M2, status::DATABASE_ERROR);
                return Err(e);
            }
        };
        let vehicle_id = vehicle.id();

        let grant = match AssignmentGrant::sign(vehicle, session.outgoing(1), self.credentials.signer()) {
            Ok(grant) => grant,
            Err(e) => {
                link.abort(ins::CAR_ASSIGNMENT_M2, status::NO_PRECISE_DIAGNOSIS);
                release(&self.authority, card);
                return Err(e);
            }
        };
        let response = match link.exchange(cla::CONT, ins::CAR_ASSIGNMENT_M2, &grant.encode()) {
            Ok(response) => response,
            Err(e) => {
                // The card may have stored the grant before the answer was lost
                hold(&self.authority, card);
                return Err(e);
            }
        };
        if !response.is_success() {
            // Rejected grants are never stored by the card
            release(&self.authority, card);
            return Err(PHASE.rejected(response.status()));
        }

        // From here on the card holds the vehicle
        let payload = response.payload().clone().unwrap_or_default();
        let confirmed = match SuccessProof::decode(&payload) {
            Err(e) => Err((status::WRONG_LENGTH, PHASE.malformed(e))),
            Ok(proof) if !session.accepts(proof.sequence, 2) => {
                Err((status::BAD_SEQUENCE, PHASE.sequence_mismatch()))
            }
            Ok(proof) if !proof.verify(card_key) => Err((status::BAD_SIGNATURE, PHASE.bad_signature())),
            Ok(_) => Ok(()),
        };
        if let Err((rejection, e)) = confirmed {
            warn!(%card, vehicle = %vehicle_id, error = %e, "Assignment not confirmed by the card");
            link.abort(ins::CAR_ASSIGNMENT_M2, rejection);
            hold(&self.authority, card);
            return Err(e);
        }
        info!(%card, vehicle = %vehicle_id, "Vehicle assigned");
        Ok(vehicle_id)
    }

    /// P4: take the vehicle back from the authenticated card and return the final
    /// usage counter. Consumes the session.
    ///
    /// A raised manipulation flag aborts the run before the card's signature is
    /// looked at.
    #[instrument(level = "debug", skip_all, fields(terminal = %self.credentials.id()))]
    pub fn return_vehicle(&mut self) -> Result<u32> {
        let (card, card_key) = self.authenticated_card()?;
        let result = self.run_return(card, &card_key);
        self.session.destroy();
        result
    }

    fn run_return(&mut self, card: PrincipalId, card_key: &PublicKey) -> Result<u32> {
        let link = self
            .link
            .as_mut()
            .ok_or(Error::TransportFailure(TransportError::Disconnected))?;
        let session = &self.session;

        let payload = link.expect(cla::PROC, ins::CAR_RETURN_START, &[], PHASE)?;
        let request = match ReturnRequest::decode(&payload) {
            Ok(request) => request,
            Err(e) => {
                link.abort(ins::CAR_RETURN_M2, status::WRONG_LENGTH);
                return Err(PHASE.malformed(e));
            }
        };
        if !session.accepts(request.sequence, 1) {
            link.abort(ins::CAR_RETURN_M2, status::BAD_SEQUENCE);
            return Err(PHASE.sequence_mismatch());
        }
        if request.manipulation {
            warn!(%card, "Usage counter on card might have been manipulated");
            link.abort(ins::CAR_RETURN_M2, status::MANIPULATION);
            return Err(Tamper::ManipulationFlag.into());
        }
        if !request.verify(card_key) {
            link.abort(ins::CAR_RETURN_M2, status::BAD_SIGNATURE);
            return Err(PHASE.bad_signature());
        }

        let challenge_nonce = self.nonces.next_nonce();
        let challenge = ReturnChallenge::sign(challenge_nonce, session.outgoing(1), self.credentials.signer())?;
        let payload = link.expect(cla::CONT, ins::CAR_RETURN_M2, &challenge.encode(), PHASE)?;
        let report = match ReturnReport::decode(&payload) {
            Ok(report) => report,
            Err(e) => {
                link.abort(ins::CAR_RETURN_MS, status::WRONG_LENGTH);
                return Err(PHASE.malformed(e));
            }
        };
        if report.echo != challenge_nonce {
            link.abort(ins::CAR_RETURN_MS, status::BAD_NONCE);
            return Err(PHASE.nonce_mismatch());
        }
        if !session.accepts(report.sequence, 2) {
            link.abort(ins::CAR_RETURN_MS, status::BAD_SEQUENCE);
            return Err(PHASE.sequence_mismatch());
        }
        if !report.verify(card_key) {
            link.abort(ins::CAR_RETURN_MS, status::BAD_SIGNATURE);
            return Err(PHASE.bad_signature());
        }

        let success = SuccessProof::sign(session.outgoing(2), self.credentials.signer())?;
        link.expect(cla::CONT, ins::CAR_RETURN_MS, &success.encode(), PHASE)?;

        let ack = self.authority.return_vehicle(card, report.usage)?;
        expect_acknowledgment(authority::removed_from_rent_relations(card), ack)?;
        info!(%card, usage = report.usage, "Vehicle returned");
        Ok(report.usage)
    }

    /// P6: put `card` on the authority's blocklist
    #[instrument(level = "debug", skip(self))]
    pub fn block_card(&self, card: PrincipalId) -> Result<()> {
        let ack = self.authority.block(card)?;
        expect_acknowledgment(authority::removed_from_cards(card), ack)?;
        warn!(%card, "Card blocked");
        Ok(())
    }

    /// Take `card` off the authority's blocklist
    #[instrument(level = "debug", skip(self))]
    pub fn unblock_card(&self, card: PrincipalId) -> Result<()> {
        let ack = self.authority.unblock(card)?;
        expect_acknowledgment(authority::restored_to_cards(card), ack)?;
        info!(%card, "Card unblocked");
        Ok(())
    }
}

/// Undo the rent relation of an assignment the card never stored
fn release(authority: &AuthorityHandle, card: PrincipalId) {
    if let Err(e) = authority.return_vehicle(card, 0) {
        warn!(%card, error = %e, "Could not release vehicle");
    }
}

/// Keep the rent relation of an assignment the card may have stored
fn hold(authority: &AuthorityHandle, card: PrincipalId) {
    match authority.hold_rental(card) {
        Ok(ack) if ack == authority::held_for_reconciliation(card) => {}
        Ok(ack) => warn!(%card, %ack, "Unexpected acknowledgment for a held rental"),
        Err(e) => warn!(%card, error = %e, "Could not hold rental for reconciliation"),
    }
}

fn expect_acknowledgment(expected: String, received: String) -> Result<()> {
    if received == expected {
        Ok(())
    } else {
        warn!(%expected, %received, "Unexpected acknowledgment from the authority");
        Err(ProcessFailure::UnexpectedAcknowledgment { expected, received }.into())
    }
}
