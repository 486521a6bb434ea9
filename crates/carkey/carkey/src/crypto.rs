//! Cryptographic primitives: SHA-256, RSASSA-PKCS1-v1_5 signatures, nonces.
//!
//! Principals never hand out their private key. Protocol code only sees the
//! [`Signer`] capability, which signs bytes and reports the matching public key.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use bytes::Bytes;
use rand::Rng;
use rsa::pkcs1v15::{Signature as RsaSignature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer as _, Verifier as _};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::config::DEFAULT_NONCE_HISTORY;
use crate::constants::MAX_KEY_BITS;
use crate::identity::PublicKey;
use crate::{Error, Result};

/// Length of a SHA-256 digest
pub const DIGEST_LEN: usize = 32;

/// Hash `data` with SHA-256
pub fn hash(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&Sha256::digest(data));
    digest
}

/// Capability to sign on behalf of a principal
pub trait Signer: Send + Sync + fmt::Debug {
    /// Sign `message` (RSASSA-PKCS1-v1_5 over its SHA-256 digest)
    fn sign(&self, message: &[u8]) -> Result<Bytes>;

    /// Public key matching the signing key
    fn public_key(&self) -> &PublicKey;
}

/// [`Signer`] backed by an in-memory RSA private key
#[derive(Clone)]
pub struct RsaSigner {
    signing_key: SigningKey<Sha256>,
    public_key: PublicKey,
}

impl RsaSigner {
    /// Generate a fresh key pair with a modulus of `bits` bits
    pub fn generate(bits: usize) -> Result<Self> {
        if bits > MAX_KEY_BITS {
            return Err(Error::KeyTooLarge {
                bits,
                max: MAX_KEY_BITS,
            });
        }
        let private_key = RsaPrivateKey::new(&mut rand_v8::thread_rng(), bits)?;
        Self::from_private_key(private_key)
    }

    /// Wrap an existing private key
    pub fn from_private_key(private_key: RsaPrivateKey) -> Result<Self> {
        let public_key = PublicKey::try_from(RsaPublicKey::from(&private_key))?;
        Ok(Self {
            signing_key: SigningKey::new(private_key),
            public_key,
        })
    }
}

impl Signer for RsaSigner {
    fn sign(&self, message: &[u8]) -> Result<Bytes> {
        let signature = self.signing_key.try_sign(message)?;
        Ok(Bytes::from(signature.to_vec()))
    }

    fn public_key(&self) -> &PublicKey {
        &self.public_key
    }
}

impl fmt::Debug for RsaSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaSigner")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Verify an RSASSA-PKCS1-v1_5/SHA-256 signature over `message`
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &[u8]) -> bool {
    let Ok(signature) = RsaSignature::try_from(signature) else {
        return false;
    };
    VerifyingKey::<Sha256>::new(public_key.as_rsa().clone())
        .verify(message, &signature)
        .is_ok()
}

/// Draw a 16-bit nonce from the thread-local CSPRNG
pub fn nonce() -> u16 {
    rand::rng().random()
}

/// Nonce generator that never repeats a value within its history window.
///
/// Values are drawn from the CSPRNG; a value issued within the last `history`
/// draws is redrawn.
#[derive(Debug, Clone)]
pub struct NonceSource {
    history: usize,
    issued: VecDeque<u16>,
    seen: HashSet<u16>,
}

impl NonceSource {
    /// Half of the 16-bit space, so a fresh value is always at most a couple of draws away
    pub const MAX_HISTORY: usize = 1 << 15;

    /// Create a generator remembering the last `history` values (capped at [`Self::MAX_HISTORY`])
    pub fn new(history: usize) -> Self {
        let history = history.min(Self::MAX_HISTORY);
        Self {
            history,
            issued: VecDeque::with_capacity(history),
            seen: HashSet::with_capacity(history),
        }
    }

    /// Draw the next nonce
    pub fn next_nonce(&mut self) -> u16 {
        let mut rng = rand::rng();
        let value = loop {
            let candidate: u16 = rng.random();
            if !self.seen.contains(&candidate) {
                break candidate;
            }
        };

        if self.history > 0 {
            if self.issued.len() == self.history {
                if let Some(oldest) = self.issued.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
            self.issued.push_back(value);
            self.seen.insert(value);
        }
        value
    }
}

impl Default for NonceSource {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_HISTORY)
    }
}

/// Whether `sequence` is exactly `step` after `previous`, modulo 2^16
pub const fn is_subsequent(previous: u16, sequence: u16, step: u16) -> bool {
    previous.wrapping_add(step) == sequence
}
