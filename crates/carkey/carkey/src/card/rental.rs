//! Responder half of vehicle assignment, vehicle return and usage updates.

use tracing::{debug, info, warn};

use super::{AssignedVehicle, Awaiting, CardState, Outcome, Smartcard, malformed, reject, signing_failed};
use crate::messages::{
    AssignmentGrant, AssignmentRequest, ReturnChallenge, ReturnReport, ReturnRequest, Signed,
    SuccessProof, UsageConfirmation, UsageUpdate, WireMessage,
};
use crate::status;

impl Smartcard {
    fn require_terminal(&self) -> std::result::Result<(), carkey_apdu_core::StatusWord> {
        if self.terminal_session.is_authenticated() {
            Ok(())
        } else {
            Err(reject(status::NOT_AUTHENTICATED, "terminal not authenticated"))
        }
    }

    /// Ask the authenticated terminal for a vehicle
    pub(super) fn request_assignment(&mut self) -> Outcome {
        self.require_terminal()?;
        if self.state == CardState::Assigned {
            return Err(reject(status::CONDITIONS_NOT_SATISFIED, "a vehicle is already assigned"));
        }

        let sequence = self.terminal_session.outgoing(1);
        let request = AssignmentRequest::sign(sequence, self.credentials()?.signer())
            .map_err(signing_failed)?;
        self.awaiting = Awaiting::AssignmentM2;
        Ok(Some(request.encode()))
    }

    /// Store the granted vehicle and close the terminal session
    pub(super) fn accept_assignment(&mut self, data: &[u8]) -> Outcome {
        let grant = AssignmentGrant::decode(data).map_err(malformed)?;
        if !grant.vehicle.verify(self.authority_key()?) {
            return Err(reject(status::BAD_CERTIFICATE, "vehicle certificate not issued by the authority"));
        }

        let session = &self.terminal_session;
        if !session.accepts(grant.sequence, 1) {
            return Err(reject(status::BAD_SEQUENCE, "grant out of sequence"));
        }
        let terminal_key = session
            .peer_public_key()
            .ok_or(status::NOT_AUTHENTICATED)?;
        if !grant.verify(terminal_key) {
            return Err(reject(status::BAD_SIGNATURE, "grant signature"));
        }

        let proof = SuccessProof::sign(session.outgoing(2), self.credentials()?.signer())
            .map_err(signing_failed)?;

        info!(vehicle = %grant.vehicle.id(), "Vehicle assigned");
        self.vehicle = Some(AssignedVehicle {
            id: grant.vehicle.id(),
            public_key: grant.vehicle.public_key().clone(),
        });
        self.state = CardState::Assigned;
        self.usage = 0;
        self.manipulated = false;
        self.vehicle_session.destroy();
        self.terminal_session.destroy();
        self.awaiting = Awaiting::Start;
        Ok(Some(proof.encode()))
    }

    /// Open a return, reporting the manipulation flag
    pub(super) fn request_return(&mut self) -> Outcome {
        self.require_terminal()?;
        if self.state != CardState::Assigned {
            return Err(reject(status::CONDITIONS_NOT_SATISFIED, "no vehicle to return"));
        }

        let sequence = self.terminal_session.outgoing(1);
        let request = ReturnRequest::sign(sequence, self.manipulated, self.credentials()?.signer())
            .map_err(signing_failed)?;
        self.awaiting = Awaiting::ReturnM2;
        Ok(Some(request.encode()))
    }

    /// Answer the terminal's challenge with the usage counter
    pub(super) fn report_usage(&mut self, data: &[u8]) -> Outcome {
        let challenge = ReturnChallenge::decode(data).map_err(malformed)?;
        let session = &self.terminal_session;

        if !session.accepts(challenge.sequence, 1) {
            return Err(reject(status::BAD_SEQUENCE, "return challenge out of sequence"));
        }
        let terminal_key = session
            .peer_public_key()
            .ok_or(status::NOT_AUTHENTICATED)?;
        if !challenge.verify(terminal_key) {
            return Err(reject(status::BAD_SIGNATURE, "return challenge signature"));
        }

        let report = ReturnReport::sign(
            self.usage,
            challenge.nonce,
            session.outgoing(2),
            self.credentials()?.signer(),
        )
        .map_err(signing_failed)?;
        self.awaiting = Awaiting::ReturnSuccess;
        Ok(Some(report.encode()))
    }

    /// The terminal accepted the report: release the vehicle
    pub(super) fn finish_return(&mut self, data: &[u8]) -> Outcome {
        let proof = SuccessProof::decode(data).map_err(malformed)?;
        let session = &self.terminal_session;

        if !session.accepts(proof.sequence, 2) {
            return Err(reject(status::BAD_SEQUENCE, "return confirmation out of sequence"));
        }
        let terminal_key = session
            .peer_public_key()
            .ok_or(status::NOT_AUTHENTICATED)?;
        if !proof.verify(terminal_key) {
            return Err(reject(status::BAD_SIGNATURE, "return confirmation signature"));
        }

        info!(usage = self.usage, "Vehicle returned");
        self.vehicle = None;
        self.usage = 0;
        self.manipulated = false;
        self.state = CardState::Unassigned;
        self.deselect();
        Ok(None)
    }

    /// Commit the next usage counter and co-sign it.
    ///
    /// The counter value is checked before the signature: a counter that does not
    /// follow the card's own is tampering even when correctly signed.
    pub(super) fn update_usage(&mut self, data: &[u8]) -> Outcome {
        if !self.vehicle_session.is_authenticated() {
            return Err(reject(status::NOT_AUTHENTICATED, "vehicle not authenticated"));
        }
        if self.state != CardState::Assigned {
            return Err(reject(status::CONDITIONS_NOT_SATISFIED, "no vehicle assigned"));
        }
        let update = UsageUpdate::decode(data).map_err(malformed)?;

        let expected = self.usage.wrapping_add(1);
        if update.counter != expected {
            warn!(expected, received = update.counter, "Usage counter does not follow");
            self.manipulated = true;
            return Err(status::MANIPULATION);
        }

        let session = &self.vehicle_session;
        let step = session.next_step();
        if !session.accepts(update.sequence, step.wrapping_add(1)) {
            return Err(reject(status::BAD_SEQUENCE, "usage update out of sequence"));
        }
        let vehicle_key = session
            .peer_public_key()
            .ok_or(status::NOT_AUTHENTICATED)?;
        if !update.verify(vehicle_key) {
            warn!("Usage update signature does not verify");
            self.manipulated = true;
            return Err(status::BAD_SIGNATURE);
        }

        let confirmation = UsageConfirmation::sign(
            expected,
            session.outgoing(step),
            self.credentials()?.signer(),
        )
        .map_err(signing_failed)?;

        self.usage = expected;
        self.vehicle_session.advance();
        debug!(usage = expected, "Usage counter committed");
        Ok(Some(confirmation.encode()))
    }
}
