//! Responder half of the mutual authentication shared by the vehicle and
//! reception links.

use tracing::{debug, info};

use super::{Awaiting, Link, Outcome, Smartcard, malformed, reject, signing_failed};
use crate::messages::{CertificateOffer, ChallengeResponse, NonceProof, Signed, SuccessProof, WireMessage};
use crate::status;

impl Link {
    const fn awaiting_challenge(self) -> Awaiting {
        match self {
            Self::Vehicle => Awaiting::InsertM2,
            Self::Terminal => Awaiting::ReceptionM2,
        }
    }

    const fn awaiting_success(self) -> Awaiting {
        match self {
            Self::Vehicle => Awaiting::InsertSuccess,
            Self::Terminal => Awaiting::ReceptionSuccess,
        }
    }
}

impl Smartcard {
    /// Message 1: certificate and a fresh card nonce
    pub(super) fn offer_certificate(&mut self, link: Link) -> Outcome {
        let certificate = self.credentials()?.certificate().clone();
        let nonce = self.nonces.next_nonce();

        self.session_mut(link).begin(nonce);
        self.awaiting = link.awaiting_challenge();
        debug!(?link, "Offering card certificate");
        Ok(Some(CertificateOffer { certificate, nonce }.encode()))
    }

    /// Message 2 in, message 3 out: check the peer, prove possession of the card key
    pub(super) fn answer_challenge(&mut self, link: Link, data: &[u8]) -> Outcome {
        let challenge = ChallengeResponse::decode(data).map_err(malformed)?;
        let peer = &challenge.certificate;

        if !peer.verify(self.authority_key()?) {
            return Err(reject(status::BAD_CERTIFICATE, "peer certificate not issued by the authority"));
        }
        if link == Link::Vehicle
            && let Some(vehicle) = &self.vehicle
            && (vehicle.id != peer.id() || &vehicle.public_key != peer.public_key())
        {
            return Err(reject(status::BAD_CERTIFICATE, "not the assigned vehicle"));
        }
        if !self.session(link).accepts(challenge.echo, 0) {
            return Err(reject(status::BAD_NONCE, "nonce echo does not match"));
        }
        if !challenge.verify(peer.public_key()) {
            return Err(reject(status::BAD_SIGNATURE, "challenge signature"));
        }

        let proof = NonceProof::sign(challenge.nonce, self.credentials()?.signer())
            .map_err(signing_failed)?;

        let session = self.session_mut(link);
        session.bind_peer(peer.id(), peer.public_key().clone());
        session.set_peer_nonce(challenge.nonce);
        self.awaiting = link.awaiting_success();
        Ok(Some(proof.encode()))
    }

    /// Success message: the peer saw our proof; the link is authenticated
    pub(super) fn confirm_authentication(&mut self, link: Link, data: &[u8]) -> Outcome {
        let proof = SuccessProof::decode(data).map_err(malformed)?;
        let session = self.session(link);

        if !session.accepts(proof.sequence, 1) {
            return Err(reject(status::BAD_SEQUENCE, "success message out of sequence"));
        }
        let peer_key = session
            .peer_public_key()
            .ok_or(status::CONDITIONS_NOT_SATISFIED)?;
        if !proof.verify(peer_key) {
            return Err(reject(status::BAD_SIGNATURE, "success message signature"));
        }

        let session = self.session_mut(link);
        session.mark_authenticated();
        info!(?link, peer = ?session.peer_id(), "Peer authenticated");
        self.awaiting = Awaiting::Start;
        Ok(None)
    }
}
