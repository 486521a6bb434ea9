//! Initiator-side drivers: the vehicle controller and the reception terminal.

mod handshake;
mod link;
mod reception;
mod vehicle;

pub use link::{CardLink, Phase};
pub use reception::ReceptionTerminal;
pub use vehicle::Vehicle;
