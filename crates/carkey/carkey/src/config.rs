//! Protocol tuning shared by every principal: authority timeout, key size and
//! nonce history.

use std::time::Duration;

/// Default wait for an authority reply
pub const DEFAULT_MAILBOX_TIMEOUT: Duration = Duration::from_secs(10);

/// Default RSA modulus size for generated keys
pub const DEFAULT_KEY_BITS: usize = 512;

/// Default number of recent nonces a generator refuses to reissue
pub const DEFAULT_NONCE_HISTORY: usize = 4096;

/// Settings shared by every principal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// How long a terminal waits for the authority
    pub mailbox_timeout: Duration,
    /// Bound on one APDU round-trip; `None` waits indefinitely
    pub exchange_timeout: Option<Duration>,
    /// Modulus size for generated keys
    pub key_bits: usize,
    /// Recent nonces never reissued by one generator
    pub nonce_history: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            mailbox_timeout: DEFAULT_MAILBOX_TIMEOUT,
            exchange_timeout: None,
            key_bits: DEFAULT_KEY_BITS,
            nonce_history: DEFAULT_NONCE_HISTORY,
        }
    }
}

impl ProtocolConfig {
    /// Set the authority reply timeout
    pub const fn with_mailbox_timeout(mut self, timeout: Duration) -> Self {
        self.mailbox_timeout = timeout;
        self
    }

    /// Bound every APDU round-trip on transports that support it
    pub const fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = Some(timeout);
        self
    }

    /// Set the modulus size for generated keys
    pub const fn with_key_bits(mut self, bits: usize) -> Self {
        self.key_bits = bits;
        self
    }

    /// Set the nonce history window
    pub const fn with_nonce_history(mut self, history: usize) -> Self {
        self.nonce_history = history;
        self
    }
}
