//! Smartcard-based vehicle access.
//!
//! A smartcard, a vehicle and a reception terminal authenticate each other with
//! authority-issued certificates, then run short signed exchanges over APDUs:
//!
//! - vehicle and terminal authentication ([`terminal::Vehicle::authenticate_card`],
//!   [`terminal::ReceptionTerminal::authenticate_card`]),
//! - vehicle assignment and return at the reception terminal,
//! - usage counter updates co-signed by card and vehicle,
//! - blocking a card for good.
//!
//! The card side lives in [`card`], the initiator side in [`terminal`], and the
//! trust root in [`authority`]. [`sim`] provides transports that run the card
//! in-process or on its own thread.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod authority;
pub mod card;
pub mod codec;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod identity;
pub mod mailbox;
pub mod messages;
pub mod session;
pub mod sim;
pub mod status;
pub mod terminal;

mod error;
pub use error::{AuthFailure, Error, ProcessFailure, Result, Tamper};

/// Commonly used types
pub mod prelude {
    pub use crate::{
        AuthFailure, Error, ProcessFailure, Result, Tamper,
        authority::{Authority, AuthorityHandle, AuthorityService},
        card::{CardState, Smartcard},
        config::ProtocolConfig,
        identity::{Certificate, Credentials, PrincipalId, PublicKey},
        sim::{ActorTransport, CardActor, Interceptor, LocalCard},
        terminal::{ReceptionTerminal, Vehicle},
    };
}
