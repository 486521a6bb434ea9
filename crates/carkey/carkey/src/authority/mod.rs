//! The identity authority ("Database"): trust root, registries, rent relations
//! and the blocklist.
//!
//! Terminals never touch [`Authority`] directly during a protocol run; they post
//! [`AuthorityRequest`]s through an [`AuthorityHandle`] and wait for the reply
//! on a mailbox of their own.

mod messages;
mod service;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use derive_more::Display;
use tracing::{debug, info, warn};

pub use messages::{AuthorityReply, AuthorityRequest};
pub use service::{AuthorityHandle, AuthorityMail, AuthorityService};

use crate::Result;
use crate::config::ProtocolConfig;
use crate::crypto::{RsaSigner, Signer};
use crate::identity::{Certificate, Credentials, PrincipalId, PublicKey};

/// Acknowledgment for a blocked card
pub fn removed_from_cards(card: PrincipalId) -> String {
    format!("{card} has been removed from cards.")
}

/// Acknowledgment for an unblocked card
pub fn restored_to_cards(card: PrincipalId) -> String {
    format!("{card} has been restored to cards.")
}

/// Acknowledgment for a closed rental
pub fn removed_from_rent_relations(card: PrincipalId) -> String {
    format!("{card} has been removed from Rent Relations.")
}

/// Acknowledgment for a rental kept open until the card is seen again
pub fn held_for_reconciliation(card: PrincipalId) -> String {
    format!("{card} has been held for reconciliation.")
}

/// Why the authority refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Refusal {
    /// The card is not registered
    #[display("unknown card")]
    UnknownCard,
    /// The card is blocked
    #[display("card is blocked")]
    CardBlocked,
    /// Every vehicle is rented out
    #[display("no vehicle available")]
    NoVehicleAvailable,
    /// The card already rents a vehicle
    #[display("card already rents a vehicle")]
    AlreadyRenting,
    /// The card rents no vehicle
    #[display("card rents no vehicle")]
    NotRenting,
}

#[derive(Debug, Clone)]
struct CardRecord {
    certificate: Certificate,
    blocked: bool,
}

/// Rental as recorded by the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rental {
    /// Rented vehicle
    pub vehicle: PrincipalId,
    /// Usage reported at return; `None` while the rental is open
    pub usage: Option<u32>,
}

/// Authority state
#[derive(Debug)]
pub struct Authority {
    signer: RsaSigner,
    config: ProtocolConfig,
    cards: HashMap<PrincipalId, CardRecord>,
    vehicles: BTreeMap<PrincipalId, Certificate>,
    terminals: HashMap<PrincipalId, Certificate>,
    rentals: HashMap<PrincipalId, PrincipalId>,
    /// Rentals whose assignment the card never confirmed
    unconfirmed: HashSet<PrincipalId>,
    closed: Vec<(PrincipalId, Rental)>,
}

impl Authority {
    /// New authority with a freshly generated root key
    pub fn new(config: ProtocolConfig) -> Result<Self> {
        Ok(Self::with_signer(RsaSigner::generate(config.key_bits)?, config))
    }

    /// New authority around an existing root key
    pub fn with_signer(signer: RsaSigner, config: ProtocolConfig) -> Self {
        Self {
            signer,
            config,
            cards: HashMap::new(),
            vehicles: BTreeMap::new(),
            terminals: HashMap::new(),
            rentals: HashMap::new(),
            unconfirmed: HashSet::new(),
            closed: Vec::new(),
        }
    }

    /// Root public key every principal trusts
    pub fn public_key(&self) -> &PublicKey {
        self.signer.public_key()
    }

    /// Certify `public_key` under `id`
    pub fn issue_certificate(&self, public_key: PublicKey, id: PrincipalId) -> Result<Certificate> {
        Certificate::issue(public_key, id, &self.signer)
    }

    /// Generate keys and a certificate for a new vehicle
    pub fn enroll_vehicle(&mut self) -> Result<Credentials> {
        let credentials = self.enroll()?;
        self.vehicles
            .insert(credentials.id(), credentials.certificate().clone());
        info!(vehicle = %credentials.id(), "Vehicle enrolled");
        Ok(credentials)
    }

    /// Generate keys and a certificate for a new reception terminal
    pub fn enroll_terminal(&mut self) -> Result<Credentials> {
        let credentials = self.enroll()?;
        self.terminals
            .insert(credentials.id(), credentials.certificate().clone());
        info!(terminal = %credentials.id(), "Terminal enrolled");
        Ok(credentials)
    }

    fn enroll(&self) -> Result<Credentials> {
        let signer = RsaSigner::generate(self.config.key_bits)?;
        let certificate = self.issue_certificate(signer.public_key().clone(), self.fresh_id())?;
        let signer: Arc<dyn Signer> = Arc::new(signer);
        Credentials::new(signer, certificate)
    }

    fn fresh_id(&self) -> PrincipalId {
        loop {
            let id = PrincipalId::random();
            let taken = self.cards.contains_key(&id)
                || self.vehicles.contains_key(&id)
                || self.terminals.contains_key(&id);
            if !taken {
                return id;
            }
        }
    }

    /// Certify a card key under a fresh id and register the card
    pub fn register_card(&mut self, public_key: PublicKey) -> Result<Certificate> {
        let certificate = self.issue_certificate(public_key, self.fresh_id())?;
        self.cards.insert(
            certificate.id(),
            CardRecord {
                certificate: certificate.clone(),
                blocked: false,
            },
        );
        info!(card = %certificate.id(), "Card registered");
        Ok(certificate)
    }

    /// Certificate of a registered card
    pub fn card_certificate(&self, card: PrincipalId) -> Option<&Certificate> {
        self.cards.get(&card).map(|record| &record.certificate)
    }

    /// Whether `card` is blocked; unknown cards count as blocked
    pub fn is_blocked(&self, card: PrincipalId) -> bool {
        self.cards.get(&card).is_none_or(|record| record.blocked)
    }

    /// Assign the first free vehicle to `card`
    pub fn assign(&mut self, card: PrincipalId) -> std::result::Result<Certificate, Refusal> {
        match self.cards.get(&card) {
            None => return Err(Refusal::UnknownCard),
            Some(record) if record.blocked => return Err(Refusal::CardBlocked),
            Some(_) => {}
        }
        if self.rentals.contains_key(&card) {
            return Err(Refusal::AlreadyRenting);
        }

        let (vehicle, certificate) = self
            .vehicles
            .iter()
            .find(|(id, _)| !self.rentals.values().any(|rented| rented == *id))
            .ok_or(Refusal::NoVehicleAvailable)?;
        let certificate = certificate.clone();
        self.rentals.insert(card, *vehicle);
        debug!(%card, vehicle = %certificate.id(), "Rent relation created");
        Ok(certificate)
    }

    /// Close the rental of `card`
    pub fn unassign(&mut self, card: PrincipalId, usage: Option<u32>) -> std::result::Result<String, Refusal> {
        let vehicle = self.rentals.remove(&card).ok_or(Refusal::NotRenting)?;
        self.unconfirmed.remove(&card);
        self.closed.push((card, Rental { vehicle, usage }));
        debug!(%card, %vehicle, ?usage, "Rent relation removed");
        Ok(removed_from_rent_relations(card))
    }

    /// Keep the open rental of `card` although the card never confirmed it.
    ///
    /// The card may hold the vehicle, so it stays rented until the card returns it.
    pub fn hold_for_reconciliation(&mut self, card: PrincipalId) -> std::result::Result<String, Refusal> {
        let vehicle = self.rentals.get(&card).ok_or(Refusal::NotRenting)?;
        warn!(%card, %vehicle, "Assignment unconfirmed, rental held");
        self.unconfirmed.insert(card);
        Ok(held_for_reconciliation(card))
    }

    /// Whether the open rental of `card` awaits reconciliation
    pub fn is_unconfirmed(&self, card: PrincipalId) -> bool {
        self.unconfirmed.contains(&card)
    }

    /// Vehicle currently rented by `card`
    pub fn rental(&self, card: PrincipalId) -> Option<PrincipalId> {
        self.rentals.get(&card).copied()
    }

    /// Closed rentals, oldest first
    pub fn rental_history(&self) -> &[(PrincipalId, Rental)] {
        &self.closed
    }

    /// Put `card` on the blocklist
    pub fn block(&mut self, card: PrincipalId) -> std::result::Result<String, Refusal> {
        let record = self.cards.get_mut(&card).ok_or(Refusal::UnknownCard)?;
        record.blocked = true;
        warn!(%card, "Card blocked");
        Ok(removed_from_cards(card))
    }

    /// Take `card` off the blocklist
    pub fn unblock(&mut self, card: PrincipalId) -> std::result::Result<String, Refusal> {
        let record = self.cards.get_mut(&card).ok_or(Refusal::UnknownCard)?;
        record.blocked = false;
        info!(%card, "Card unblocked");
        Ok(restored_to_cards(card))
    }

    /// Serve one mailbox request
    pub fn handle(&mut self, request: AuthorityRequest) -> AuthorityReply {
        debug!(%request, "Serving request");
        match request {
            AuthorityRequest::IsBlocked(card) => AuthorityReply::Blocked(self.is_blocked(card)),
            AuthorityRequest::RegisterCard(key) => match self.register_card(key) {
                Ok(certificate) => AuthorityReply::Certificate(certificate),
                Err(e) => AuthorityReply::Refused(e.to_string()),
            },
            AuthorityRequest::AssignVehicle(card) => match self.assign(card) {
                Ok(certificate) => AuthorityReply::VehicleAssigned(certificate),
                Err(Refusal::NoVehicleAvailable) => AuthorityReply::NoVehicleAvailable,
                Err(Refusal::CardBlocked | Refusal::UnknownCard) => AuthorityReply::CardBlocked,
                Err(refusal) => AuthorityReply::Refused(refusal.to_string()),
            },
            AuthorityRequest::ReturnVehicle { card, usage } => {
                acknowledge(self.unassign(card, Some(usage)))
            }
            AuthorityRequest::HoldRental(card) => acknowledge(self.hold_for_reconciliation(card)),
            AuthorityRequest::BlockCard(card) => acknowledge(self.block(card)),
            AuthorityRequest::UnblockCard(card) => acknowledge(self.unblock(card)),
        }
    }
}

fn acknowledge(result: std::result::Result<String, Refusal>) -> AuthorityReply {
    match result {
        Ok(text) => AuthorityReply::Acknowledged(text),
        Err(refusal) => AuthorityReply::Refused(refusal.to_string()),
    }
}
