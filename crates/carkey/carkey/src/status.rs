//! Status words returned by the card applet.
//!
//! Protocol-specific failures live in the `6A0x`/`6A1x` range, which ISO/IEC 7816-4
//! leaves unassigned. Generic conditions reuse the ISO values.

use carkey_apdu_core::StatusWord;
pub use carkey_apdu_core::response::status::common::{
    CLASS_NOT_SUPPORTED, CONDITIONS_NOT_SATISFIED, INVALID_INSTRUCTION, NO_PRECISE_DIAGNOSIS,
    SECURITY_CONDITION_NOT_SATISFIED as NOT_AUTHENTICATED, SUCCESS, WRONG_LENGTH,
};

/// A signature did not verify
pub const BAD_SIGNATURE: StatusWord = StatusWord::new(0x6A, 0x01);
/// A nonce echo did not match
pub const BAD_NONCE: StatusWord = StatusWord::new(0x6A, 0x02);
/// A sequence number was out of order
pub const BAD_SEQUENCE: StatusWord = StatusWord::new(0x6A, 0x03);
/// The card reached end of life
pub const CARD_BLOCKED: StatusWord = StatusWord::new(0x6A, 0x04);
/// The authority could not serve the request
pub const DATABASE_ERROR: StatusWord = StatusWord::new(0x6A, 0x05);
/// The usage counter was tampered with
pub const MANIPULATION: StatusWord = StatusWord::new(0x6A, 0x06);
/// A certificate was not issued by the trusted authority
pub const BAD_CERTIFICATE: StatusWord = StatusWord::new(0x6A, 0x07);
/// The card has not been issued yet
pub const NOT_INITIALIZED: StatusWord = StatusWord::new(0x6A, 0x10);

/// Describe a status word, including the protocol-specific ones
pub const fn describe(status: StatusWord) -> &'static str {
    match status.to_u16() {
        0x6A01 => "Bad signature",
        0x6A02 => "Bad nonce",
        0x6A03 => "Bad sequence number",
        0x6A04 => "Card blocked",
        0x6A05 => "Database error",
        0x6A06 => "Manipulation detected",
        0x6A07 => "Bad certificate",
        0x6A10 => "Card not initialized",
        _ => status.description(),
    }
}
