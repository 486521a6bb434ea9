//! Status words carried in the trailer of every response
//!
//! Only the ISO/IEC 7816-4 words the applet actually emits are named here. Applications
//! define their own words in the unassigned ranges and describe them themselves.

use std::fmt;

use tracing::Level;

/// Status Word (SW1-SW2) from an APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// Build a status word from its two trailer bytes
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Split a big-endian `u16` into SW1 and SW2
    pub const fn from_u16(status: u16) -> Self {
        let [sw1, sw2] = status.to_be_bytes();
        Self { sw1, sw2 }
    }

    /// Both bytes as one big-endian `u16`
    pub const fn to_u16(&self) -> u16 {
        u16::from_be_bytes(self.to_bytes())
    }

    /// Trailer bytes in wire order
    pub const fn to_bytes(&self) -> [u8; 2] {
        [self.sw1, self.sw2]
    }

    /// `90 00`
    pub const fn is_success(&self) -> bool {
        self.to_u16() == 0x9000
    }

    /// Level at which an exchange ending in this word is logged. Anything but
    /// success means the other side refused the command.
    pub const fn tracing_level(&self) -> Level {
        if self.is_success() {
            Level::DEBUG
        } else {
            Level::WARN
        }
    }

    /// Short human readable meaning of the ISO words in [`common`]
    pub const fn description(&self) -> &'static str {
        match self.to_u16() {
            0x9000 => "Success",
            0x6700 => "Wrong length",
            0x6982 => "Security status not satisfied",
            0x6985 => "Conditions of use not satisfied",
            0x6D00 => "Instruction code not supported or invalid",
            0x6E00 => "Class not supported",
            0x6F00 => "No precise diagnosis",
            _ => "Unknown status word",
        }
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X}", self.sw1, self.sw2)
    }
}

/// ISO/IEC 7816-4 status words
pub mod common {
    use super::StatusWord;

    /// Command completed (90 00)
    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);

    /// Lc or the payload layout does not match the instruction (67 00)
    pub const WRONG_LENGTH: StatusWord = StatusWord::new(0x67, 0x00);

    /// The caller has not authenticated (69 82)
    pub const SECURITY_CONDITION_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x82);

    /// The command is not expected in the current state (69 85)
    pub const CONDITIONS_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x85);

    /// Unknown instruction byte (6D 00)
    pub const INVALID_INSTRUCTION: StatusWord = StatusWord::new(0x6D, 0x00);

    /// Unknown class byte (6E 00)
    pub const CLASS_NOT_SUPPORTED: StatusWord = StatusWord::new(0x6E, 0x00);

    /// Internal failure without a more specific word (6F 00)
    pub const NO_PRECISE_DIAGNOSIS: StatusWord = StatusWord::new(0x6F, 0x00);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_word_u16_conversions() {
        let sw = StatusWord::from(0x6A03_u16);
        assert_eq!((sw.sw1, sw.sw2), (0x6A, 0x03));
        assert_eq!(sw.to_u16(), 0x6A03);
        assert_eq!(sw.to_bytes(), [0x6A, 0x03]);
    }

    #[test]
    fn test_only_9000_is_success() {
        assert!(common::SUCCESS.is_success());
        assert!(!StatusWord::new(0x90, 0x01).is_success());
        assert!(!StatusWord::new(0x61, 0x00).is_success());
    }

    #[test]
    fn test_refusals_log_at_warn() {
        assert_eq!(common::SUCCESS.tracing_level(), Level::DEBUG);
        assert_eq!(common::WRONG_LENGTH.tracing_level(), Level::WARN);
        assert_eq!(StatusWord::from_u16(0x6A01).tracing_level(), Level::WARN);
    }

    #[test]
    fn test_status_word_display() {
        assert_eq!(StatusWord::from_u16(0x6A04).to_string(), "6A 04");
        assert_eq!(
            common::SECURITY_CONDITION_NOT_SATISFIED.description(),
            "Security status not satisfied"
        );
        assert_eq!(StatusWord::from_u16(0x6A10).description(), "Unknown status word");
    }
}
