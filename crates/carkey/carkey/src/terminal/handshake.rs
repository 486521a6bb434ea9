//! Initiator half of the mutual authentication run shared by the vehicle and the
//! reception terminal.

use carkey_apdu_core::CardTransport;
use tracing::warn;

use super::{CardLink, Phase};
use crate::constants::{cla, ins};
use crate::crypto::NonceSource;
use crate::error::AuthFailure;
use crate::identity::{Credentials, PublicKey};
use crate::messages::{CertificateOffer, ChallengeResponse, NonceProof, Signed, SuccessProof, WireMessage};
use crate::session::Session;
use crate::{Result, status};

const PHASE: Phase = Phase::Authentication;

/// Instructions of one authentication run
#[derive(Debug, Clone, Copy)]
pub(crate) struct Steps {
    start: u8,
    pub(crate) challenge: u8,
    success: u8,
}

pub(crate) const VEHICLE_STEPS: Steps = Steps {
    start: ins::INSERT_START,
    challenge: ins::INSERT_M2,
    success: ins::INSERT_MS,
};

pub(crate) const RECEPTION_STEPS: Steps = Steps {
    start: ins::AUTH_RECEPTION_START,
    challenge: ins::AUTH_RECEPTION_M2,
    success: ins::AUTH_RECEPTION_MS,
};

/// Message 1: fetch the card's certificate and nonce, and check the certificate
pub(crate) fn receive_offer<T: CardTransport>(
    link: &mut CardLink<T>,
    steps: Steps,
    authority_key: &PublicKey,
) -> Result<CertificateOffer> {
    let payload = link.expect(cla::AUTH, steps.start, &[], PHASE)?;
    let offer = match CertificateOffer::decode(&payload) {
        Ok(offer) => offer,
        Err(e) => {
            link.abort(steps.challenge, status::WRONG_LENGTH);
            return Err(PHASE.malformed(e));
        }
    };

    if !offer.certificate.verify(authority_key) {
        warn!(card = %offer.certificate.id(), "Card certificate not issued by the authority");
        link.abort(steps.challenge, status::BAD_CERTIFICATE);
        return Err(AuthFailure::InvalidCertificate.into());
    }
    Ok(offer)
}

/// Messages 2, 3 and the success message. The session is destroyed on any failure.
pub(crate) fn complete<T: CardTransport>(
    link: &mut CardLink<T>,
    steps: Steps,
    credentials: &Credentials,
    session: &mut Session,
    nonces: &mut NonceSource,
    offer: &CertificateOffer,
) -> Result<()> {
    let result = run(link, steps, credentials, session, nonces, offer);
    if result.is_err() {
        session.destroy();
    }
    result
}

fn run<T: CardTransport>(
    link: &mut CardLink<T>,
    steps: Steps,
    credentials: &Credentials,
    session: &mut Session,
    nonces: &mut NonceSource,
    offer: &CertificateOffer,
) -> Result<()> {
    let card_key = offer.certificate.public_key();
    session.begin(nonces.next_nonce());
    session.bind_peer(offer.certificate.id(), card_key.clone());
    session.set_peer_nonce(offer.nonce);

    let challenge = ChallengeResponse::sign(
        credentials.certificate().clone(),
        offer.nonce,
        session.local_nonce(),
        credentials.signer(),
    )?;
    let payload = link.expect(cla::CONT, steps.challenge, &challenge.encode(), PHASE)?;

    let proof = match NonceProof::decode(&payload) {
        Ok(proof) => proof,
        Err(e) => {
            link.abort(steps.success, status::WRONG_LENGTH);
            return Err(PHASE.malformed(e));
        }
    };
    if !session.accepts(proof.echo, 0) {
        warn!(expected = session.local_nonce(), received = proof.echo, "Nonce echo does not match");
        link.abort(steps.success, status::BAD_NONCE);
        return Err(PHASE.nonce_mismatch());
    }
    if !proof.verify(card_key) {
        warn!("Card nonce proof does not verify");
        link.abort(steps.success, status::BAD_SIGNATURE);
        return Err(PHASE.bad_signature());
    }

    let success = SuccessProof::sign(session.outgoing(1), credentials.signer())?;
    link.expect(cla::CONT, steps.success, &success.encode(), PHASE)?;
    session.mark_authenticated();
    Ok(())
}
