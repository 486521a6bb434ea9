//! One rental office: an authority, a reception terminal, a vehicle and a card.

use carkey::prelude::*;
use carkey_apdu_core::CardTransport;
use tracing::info;

pub(crate) struct Office<T> {
    pub(crate) service: AuthorityService,
    pub(crate) root: PublicKey,
    pub(crate) vehicle_credentials: Credentials,
    pub(crate) reception: ReceptionTerminal<T>,
    pub(crate) vehicle: Vehicle<T>,
    pub(crate) card: PrincipalId,
}

impl<T: CardTransport + Clone> Office<T> {
    /// Enrol one vehicle and one terminal, then issue the blank card behind `transport`
    pub(crate) fn open(config: &ProtocolConfig, transport: T) -> anyhow::Result<Self> {
        let mut authority = Authority::new(*config)?;
        let vehicle_credentials = authority.enroll_vehicle()?;
        let terminal_credentials = authority.enroll_terminal()?;
        let root = authority.public_key().clone();
        info!(root = %root.fingerprint(), "Authority ready");
        let service = AuthorityService::spawn(authority)?;

        let mut reception =
            ReceptionTerminal::new(terminal_credentials, root.clone(), service.handle(), config);
        reception.insert(transport.clone());
        let card = reception.issue_card()?;

        let mut vehicle = Vehicle::new(vehicle_credentials.clone(), root.clone(), config);
        vehicle.insert(transport);

        Ok(Self {
            service,
            root,
            vehicle_credentials,
            reception,
            vehicle,
            card,
        })
    }

    pub(crate) fn rent(&mut self) -> carkey::Result<PrincipalId> {
        self.reception.authenticate_card()?;
        self.reception.assign_vehicle()
    }

    pub(crate) fn drive(&mut self, updates: u32) -> carkey::Result<u32> {
        self.vehicle.authenticate_card()?;
        for _ in 0..updates {
            self.vehicle.update_usage()?;
        }
        Ok(self.vehicle.usage())
    }

    pub(crate) fn give_back(&mut self) -> carkey::Result<u32> {
        self.reception.authenticate_card()?;
        let usage = self.reception.return_vehicle()?;
        self.vehicle.end_rental();
        Ok(usage)
    }
}
