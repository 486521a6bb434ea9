//! Ephemeral per-link protocol state.

use zeroize::Zeroize;

use crate::crypto;
use crate::identity::{PrincipalId, PublicKey};

/// State of one protocol run between two principals.
///
/// Sequence numbers are derived from the nonces exchanged while authenticating:
/// outgoing messages carry `peer_nonce + step`, incoming ones must carry
/// `local_nonce + step`.
#[derive(Debug, Clone, Default)]
pub struct Session {
    peer_public_key: Option<PublicKey>,
    peer_id: Option<PrincipalId>,
    local_nonce: u16,
    peer_nonce: u16,
    sequence_counter: u16,
    authenticated: bool,
}

impl Session {
    /// Start a run with a fresh local nonce; any previous state is destroyed
    pub fn begin(&mut self, local_nonce: u16) {
        self.destroy();
        self.local_nonce = local_nonce;
    }

    /// Record the peer's certified identity
    pub fn bind_peer(&mut self, id: PrincipalId, public_key: PublicKey) {
        self.peer_id = Some(id);
        self.peer_public_key = Some(public_key);
    }

    /// Record the nonce the peer contributed
    pub fn set_peer_nonce(&mut self, nonce: u16) {
        self.peer_nonce = nonce;
    }

    /// Mark the peer as authenticated
    pub fn mark_authenticated(&mut self) {
        self.authenticated = true;
    }

    /// Whether the run completed authentication
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Peer public key, once bound
    pub const fn peer_public_key(&self) -> Option<&PublicKey> {
        self.peer_public_key.as_ref()
    }

    /// Peer id, once bound
    pub const fn peer_id(&self) -> Option<PrincipalId> {
        self.peer_id
    }

    /// Nonce this side contributed
    pub const fn local_nonce(&self) -> u16 {
        self.local_nonce
    }

    /// Nonce the peer contributed
    pub const fn peer_nonce(&self) -> u16 {
        self.peer_nonce
    }

    /// Number of processing steps completed since authentication
    pub const fn sequence_counter(&self) -> u16 {
        self.sequence_counter
    }

    /// Sequence number for an outgoing message at `step`
    pub const fn outgoing(&self, step: u16) -> u16 {
        self.peer_nonce.wrapping_add(step)
    }

    /// Whether an incoming `sequence` is the one expected at `step`
    pub const fn accepts(&self, sequence: u16, step: u16) -> bool {
        crypto::is_subsequent(self.local_nonce, sequence, step)
    }

    /// Step for the next processing message; see [`Self::advance`]
    pub const fn next_step(&self) -> u16 {
        self.sequence_counter.wrapping_add(1)
    }

    /// Complete one processing step
    pub fn advance(&mut self) {
        self.sequence_counter = self.sequence_counter.wrapping_add(1);
    }

    /// Zero nonces and counters, forget the peer and de-authenticate
    pub fn destroy(&mut self) {
        self.local_nonce.zeroize();
        self.peer_nonce.zeroize();
        self.sequence_counter.zeroize();
        self.authenticated.zeroize();
        self.peer_id = None;
        self.peer_public_key = None;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy();
    }
}
