//! Common test utilities
#![allow(dead_code)]

use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use carkey::authority::{AuthorityMail, AuthorityReply, AuthorityRequest};
use carkey::mailbox;
use carkey::messages::WireMessage;
use carkey::prelude::*;
use carkey::sim::Direction;
use carkey_apdu_core::TransportError;

/// Every principal of one rental office, wired in-process
pub struct World {
    pub config: ProtocolConfig,
    pub service: AuthorityService,
    pub root: PublicKey,
    pub vehicle_credentials: Credentials,
    pub reception: ReceptionTerminal<LocalCard>,
    pub vehicle: Vehicle<LocalCard>,
    pub card: LocalCard,
    pub card_id: PrincipalId,
}

impl World {
    /// One vehicle, one terminal, one freshly issued card inserted in both
    pub fn new() -> Self {
        Self::with_config(ProtocolConfig::default())
    }

    pub fn with_config(config: ProtocolConfig) -> Self {
        let mut authority = Authority::new(config).unwrap();
        let vehicle_credentials = authority.enroll_vehicle().unwrap();
        let terminal_credentials = authority.enroll_terminal().unwrap();
        let root = authority.public_key().clone();
        let service = AuthorityService::spawn(authority).unwrap();

        let card = LocalCard::new(Smartcard::new(&config));
        let mut reception =
            ReceptionTerminal::new(terminal_credentials, root.clone(), service.handle(), &config);
        reception.insert(card.clone());
        let card_id = reception.issue_card().unwrap();

        let mut vehicle = Vehicle::new(vehicle_credentials.clone(), root.clone(), &config);
        vehicle.insert(card.clone());

        Self {
            config,
            service,
            root,
            vehicle_credentials,
            reception,
            vehicle,
            card,
            card_id,
        }
    }

    /// A second reception terminal, wired to the card through `hook`
    pub fn reception_over<F>(&self, hook: F) -> ReceptionTerminal<Interceptor<LocalCard>>
    where
        F: FnMut(Direction, &mut Vec<u8>) -> std::result::Result<(), TransportError> + Send + 'static,
    {
        let terminal = self.service.authority().enroll_terminal().unwrap();
        let mut reception = ReceptionTerminal::new(terminal, self.root.clone(), self.service.handle(), &self.config);
        reception.insert(Interceptor::new(self.card.clone(), hook));
        reception
    }

    pub fn vehicle_id(&self) -> PrincipalId {
        self.vehicle_credentials.id()
    }

    /// P2 then P3
    pub fn rent(&mut self) -> PrincipalId {
        self.reception.authenticate_card().unwrap();
        self.reception.assign_vehicle().unwrap()
    }

    /// P1 then `updates` rounds of P5; returns the vehicle's counter
    pub fn drive(&mut self, updates: u32) -> u32 {
        self.vehicle.authenticate_card().unwrap();
        for _ in 0..updates {
            self.vehicle.update_usage().unwrap();
        }
        self.vehicle.usage()
    }

    /// P2 then P4; the vehicle forgets the closed rental
    pub fn give_back(&mut self) -> u32 {
        self.reception.authenticate_card().unwrap();
        let usage = self.reception.return_vehicle().unwrap();
        self.vehicle.end_rental();
        usage
    }

    pub fn card_state(&self) -> CardState {
        self.card.card().lock().state()
    }

    pub fn card_usage(&self) -> u32 {
        self.card.card().lock().usage()
    }

    pub fn card_manipulated(&self) -> bool {
        self.card.card().lock().is_manipulated()
    }
}

/// An assigned card and the vehicle it belongs to, built once per test binary
pub struct Rented {
    pub config: ProtocolConfig,
    pub root: PublicKey,
    pub vehicle_credentials: Credentials,
    pub card: Smartcard,
}

pub fn rented() -> &'static Rented {
    static RENTED: OnceLock<Rented> = OnceLock::new();
    RENTED.get_or_init(|| {
        let mut world = World::new();
        world.rent();
        let card = world.card.card().lock().clone();
        Rented {
            config: world.config,
            root: world.root.clone(),
            vehicle_credentials: world.vehicle_credentials.clone(),
            card,
        }
    })
}

impl Rented {
    /// A private copy of the card and a fresh vehicle controller for it
    pub fn vehicle_over<T, F>(&self, wrap: F) -> (LocalCard, Vehicle<T>)
    where
        T: carkey_apdu_core::CardTransport,
        F: FnOnce(LocalCard) -> T,
    {
        let card = LocalCard::new(self.card.clone());
        let mut vehicle = Vehicle::new(self.vehicle_credentials.clone(), self.root.clone(), &self.config);
        vehicle.insert(wrap(card.clone()));
        (card, vehicle)
    }
}

/// Authority front that answers block requests with `acknowledgment` and
/// forwards everything else to `upstream`
pub fn misleading_authority(upstream: AuthorityHandle, acknowledgment: String) -> AuthorityHandle {
    let (inbox, mailbox) = mailbox::channel::<AuthorityMail>();
    let timeout = upstream.timeout();
    thread::spawn(move || {
        while let Ok(AuthorityMail::Request { body, reply_to }) = mailbox.recv() {
            let reply = match AuthorityRequest::decode(&body).unwrap() {
                AuthorityRequest::BlockCard(_) => AuthorityReply::Acknowledged(acknowledgment.clone()),
                request => upstream.request(&request).unwrap(),
            };
            let _ = reply_to.post(reply.encode());
        }
    });
    AuthorityHandle::new(inbox, timeout)
}

/// Authority handle nobody serves
pub fn silent_authority(timeout: Duration) -> (AuthorityHandle, mailbox::Mailbox<AuthorityMail>) {
    let (inbox, mailbox) = mailbox::channel::<AuthorityMail>();
    (AuthorityHandle::new(inbox, timeout), mailbox)
}
