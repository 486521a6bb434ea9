//! Wire constants: field lengths, APDU classes and instructions, message literals.

/// Length of a principal identifier
pub const ID_LEN: usize = 5;

/// Length of a nonce or sequence number on the wire
pub const NONCE_LEN: usize = 2;

/// Slot size reserved for each RSA key component (exponent, modulus)
pub const KEY_COMPONENT_MAX: usize = 64;

/// Fixed capacity of an encoded public key: `u16 len || exponent slot || u16 len || modulus slot`
pub const KEY_LEN: usize = 2 + KEY_COMPONENT_MAX + 2 + KEY_COMPONENT_MAX;

/// Largest RSA modulus, in bits, that fits the key field
pub const MAX_KEY_BITS: usize = KEY_COMPONENT_MAX * 8;

/// Largest signature accepted on the wire
pub const MAX_SIGNATURE_LEN: usize = KEY_COMPONENT_MAX;

/// Length of the usage counter on the wire
pub const COUNTER_LEN: usize = 4;

/// Largest encoded certificate
pub const CERTIFICATE_MAX_LEN: usize = KEY_LEN + ID_LEN + 4 + MAX_SIGNATURE_LEN;

/// Leading byte of every success message
pub const SUCCESS_BYTE: u8 = 0xFF;

/// Leading byte of a usage confirmation
pub const CONFIRMATION_BYTE: u8 = 0x01;

/// Literal opening a vehicle assignment request
pub const ASSIGNMENT_LITERAL: &[u8] = b"Car?";

/// Literal opening a vehicle return request
pub const RETURN_LITERAL: &[u8] = b"Car Return";

/// Literal covered by the signature of a block order
pub const BLOCK_LITERAL: &[u8] = b"Block";

/// APDU class bytes, one per protocol family
pub mod cla {
    /// Start of an authentication protocol
    pub const AUTH: u8 = 0x80;
    /// Start of a processing protocol (requires an authenticated session)
    pub const PROC: u8 = 0x81;
    /// Continuation of a running protocol
    pub const CONT: u8 = 0x82;
    /// Card issuance
    pub const INIT: u8 = 0x83;
    /// End of life (blocking)
    pub const EOL: u8 = 0x84;
    /// The host rejected a card message; the payload is its status word
    pub const ERROR: u8 = 0x85;
    /// Diagnostics
    pub const DEBUG: u8 = 0x86;
}

/// APDU instruction bytes. Values are unique across classes so that an
/// instruction alone identifies the link it belongs to.
pub mod ins {
    /// Vehicle authentication, message 1
    pub const INSERT_START: u8 = 0x10;
    /// Vehicle authentication, message 2
    pub const INSERT_M2: u8 = 0x11;
    /// Vehicle authentication, success message
    pub const INSERT_MS: u8 = 0x12;

    /// Terminal authentication, message 1
    pub const AUTH_RECEPTION_START: u8 = 0x20;
    /// Terminal authentication, message 2
    pub const AUTH_RECEPTION_M2: u8 = 0x21;
    /// Terminal authentication, success message
    pub const AUTH_RECEPTION_MS: u8 = 0x22;

    /// Vehicle assignment, message 1
    pub const CAR_ASSIGNMENT_START: u8 = 0x30;
    /// Vehicle assignment, message 2
    pub const CAR_ASSIGNMENT_M2: u8 = 0x31;

    /// Vehicle return, message 1
    pub const CAR_RETURN_START: u8 = 0x40;
    /// Vehicle return, message 2
    pub const CAR_RETURN_M2: u8 = 0x41;
    /// Vehicle return, success message
    pub const CAR_RETURN_MS: u8 = 0x42;

    /// Usage counter update
    pub const USAGE_UPDATE: u8 = 0x50;

    /// Block the card
    pub const BLOCK: u8 = 0x60;

    /// Generate the card key pair
    pub const GENERATE_KEYS: u8 = 0x70;
    /// Store the issued certificate
    pub const STORE_CERTIFICATE: u8 = 0x71;

    /// Report lifecycle state
    pub const STATUS: u8 = 0x7F;
}
