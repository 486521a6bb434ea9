//! Principal identities, public keys and certificates.
//!
//! A certificate binds a public key to a principal id. It is issued and verified
//! against the authority's key only; there is no chain and no delegation.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use derive_more::Display;
use rand::Rng;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};

use crate::codec::{self, DecodeError, Reader, Writer};
use crate::constants::{ID_LEN, KEY_COMPONENT_MAX, KEY_LEN, MAX_KEY_BITS, MAX_SIGNATURE_LEN};
use crate::crypto::{self, Signer};
use crate::{Error, Result};

/// Fixed-length principal identifier
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("{}", hex::encode(_0))]
pub struct PrincipalId([u8; ID_LEN]);

impl PrincipalId {
    /// Wrap raw id bytes
    pub const fn new(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Draw a random id
    pub fn random() -> Self {
        Self(rand::rng().random())
    }

    /// Raw id bytes
    pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub(crate) fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        reader.read_array("id").map(Self)
    }
}

impl fmt::Debug for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrincipalId({self})")
    }
}

impl From<[u8; ID_LEN]> for PrincipalId {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for PrincipalId {
    type Error = DecodeError;

    fn try_from(bytes: &[u8]) -> std::result::Result<Self, Self::Error> {
        let mut reader = Reader::new(bytes);
        let id = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(id)
    }
}

impl AsRef<[u8]> for PrincipalId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// RSA public key that fits the fixed-capacity key field
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Underlying RSA key
    pub const fn as_rsa(&self) -> &RsaPublicKey {
        &self.0
    }

    /// Encode as `u16 len || exponent slot || u16 len || modulus slot`.
    ///
    /// Each component is left-aligned in its 64-byte slot and zero-padded.
    pub fn encode(&self) -> [u8; KEY_LEN] {
        let mut field = [0u8; KEY_LEN];
        let exponent = self.0.e().to_bytes_be();
        let modulus = self.0.n().to_bytes_be();

        let mut offset = 0;
        for component in [&exponent, &modulus] {
            codec::write_u16(&mut field, offset, component.len() as u16);
            codec::copy_bytes(component, 0, &mut field, offset + 2, component.len());
            offset += 2 + KEY_COMPONENT_MAX;
        }
        field
    }

    /// Decode a key field that must span the whole buffer
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let key = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(key)
    }

    /// Read a key field from a message
    pub fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        let exponent = read_component(reader, "key exponent")?;
        let modulus = read_component(reader, "key modulus")?;
        RsaPublicKey::new(BigUint::from_bytes_be(modulus), BigUint::from_bytes_be(exponent))
            .map(Self)
            .map_err(|_| DecodeError::InvalidValue("public key"))
    }

    /// Short hex fingerprint for logs
    pub fn fingerprint(&self) -> String {
        hex::encode(&crypto::hash(&self.encode())[..4])
    }
}

fn read_component<'a>(
    reader: &mut Reader<'a>,
    field: &'static str,
) -> std::result::Result<&'a [u8], DecodeError> {
    let len = usize::from(reader.read_u16(field)?);
    if len > KEY_COMPONENT_MAX {
        return Err(DecodeError::Oversized {
            field,
            len,
            max: KEY_COMPONENT_MAX,
        });
    }
    let slot = reader.read_bytes(KEY_COMPONENT_MAX, field)?;
    let (component, padding) = slot.split_at(len);
    if padding.iter().any(|&b| b != 0) {
        return Err(DecodeError::InvalidValue(field));
    }
    Ok(component)
}

impl TryFrom<RsaPublicKey> for PublicKey {
    type Error = Error;

    fn try_from(key: RsaPublicKey) -> Result<Self> {
        let too_large = |component: &BigUint| component.to_bytes_be().len() > KEY_COMPONENT_MAX;
        if too_large(key.n()) || too_large(key.e()) {
            return Err(Error::KeyTooLarge {
                bits: key.n().bits(),
                max: MAX_KEY_BITS,
            });
        }
        Ok(Self(key))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}, {} bits)", self.fingerprint(), self.0.n().bits())
    }
}

/// Authority-signed binding of a public key to a principal id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    public_key: PublicKey,
    id: PrincipalId,
    signature: Bytes,
}

impl Certificate {
    /// Issue a certificate for `public_key` and `id`, signed by `issuer`
    pub fn issue(public_key: PublicKey, id: PrincipalId, issuer: &dyn Signer) -> Result<Self> {
        let signature = issuer.sign(&signed_bytes(&public_key, &id))?;
        Ok(Self {
            public_key,
            id,
            signature,
        })
    }

    /// Certified public key
    pub const fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Certified principal id
    pub const fn id(&self) -> PrincipalId {
        self.id
    }

    /// Issuer signature
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Bytes covered by the issuer signature: `key field || id`
    pub fn to_be_signed(&self) -> Vec<u8> {
        signed_bytes(&self.public_key, &self.id)
    }

    /// Check the issuer signature against `issuer`
    pub fn verify(&self, issuer: &PublicKey) -> bool {
        crypto::verify(issuer, &self.to_be_signed(), &self.signature)
    }

    /// Encode as `key field || id || u32 sig_len || sig`
    pub fn encode(&self) -> Bytes {
        let mut writer = Writer::with_capacity(KEY_LEN + ID_LEN + 4 + self.signature.len());
        writer
            .put_slice(&self.public_key.encode())
            .put_slice(self.id.as_bytes())
            .put_prefixed(&self.signature);
        writer.freeze()
    }

    /// Decode a certificate that must span the whole buffer
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let certificate = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(certificate)
    }

    /// Read a certificate embedded in a message
    pub fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        let public_key = PublicKey::read(reader)?;
        let id = PrincipalId::read(reader)?;
        let signature = reader.read_prefixed(MAX_SIGNATURE_LEN, "certificate signature")?;
        Ok(Self {
            public_key,
            id,
            signature: Bytes::copy_from_slice(signature),
        })
    }
}

fn signed_bytes(public_key: &PublicKey, id: &PrincipalId) -> Vec<u8> {
    codec::concat(&[&public_key.encode()[..], id.as_bytes()])
}

/// Issue an encoded certificate for `subject_key` and `subject_id`
pub fn issue_certificate(
    subject_key: &PublicKey,
    subject_id: PrincipalId,
    issuer: &dyn Signer,
) -> Result<Bytes> {
    Certificate::issue(subject_key.clone(), subject_id, issuer).map(|cert| cert.encode())
}

/// Verify an encoded certificate; malformed bytes never verify
pub fn verify_certificate(certificate: &[u8], issuer: &PublicKey) -> bool {
    Certificate::decode(certificate).is_ok_and(|cert| cert.verify(issuer))
}

/// What a principal presents: its signing capability and its certificate
#[derive(Debug, Clone)]
pub struct Credentials {
    signer: Arc<dyn Signer>,
    certificate: Certificate,
}

impl Credentials {
    /// Pair a signer with the certificate issued for its key
    pub fn new(signer: Arc<dyn Signer>, certificate: Certificate) -> Result<Self> {
        if signer.public_key() != certificate.public_key() {
            return Err(Error::CredentialMismatch);
        }
        Ok(Self {
            signer,
            certificate,
        })
    }

    /// Principal id
    pub const fn id(&self) -> PrincipalId {
        self.certificate.id()
    }

    /// Principal public key
    pub const fn public_key(&self) -> &PublicKey {
        self.certificate.public_key()
    }

    /// Certificate presented to peers
    pub const fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Sign with the principal's key
    pub fn sign(&self, message: &[u8]) -> Result<Bytes> {
        self.signer.sign(message)
    }

    /// Signing capability
    pub fn signer(&self) -> &dyn Signer {
        self.signer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use super::*;
    use crate::crypto::RsaSigner;

    static ISSUER: LazyLock<RsaSigner> = LazyLock::new(|| RsaSigner::generate(512).unwrap());
    static SUBJECT: LazyLock<RsaSigner> = LazyLock::new(|| RsaSigner::generate(512).unwrap());

    fn certificate() -> Certificate {
        let id = PrincipalId::new([0x01, 0x02, 0x03, 0x04, 0x05]);
        Certificate::issue(SUBJECT.public_key().clone(), id, &*ISSUER).unwrap()
    }

    #[test]
    fn test_id_display_and_conversion() {
        let id = PrincipalId::new([0xDE, 0xAD, 0xBE, 0xEF, 0x01]);
        assert_eq!(id.to_string(), "deadbeef01");
        assert_eq!(PrincipalId::try_from(id.as_ref()).unwrap(), id);
        assert!(PrincipalId::try_from(&[0u8; 4][..]).is_err());
        assert!(PrincipalId::try_from(&[0u8; 6][..]).is_err());
    }

    #[test]
    fn test_key_field_layout() {
        let field = SUBJECT.public_key().encode();
        // e = 65537
        assert_eq!(&field[..5], &[0x00, 0x03, 0x01, 0x00, 0x01]);
        assert!(field[5..66].iter().all(|&b| b == 0));
        assert_eq!(&field[66..68], &[0x00, 0x40]);
        assert_eq!(PublicKey::decode(&field).unwrap(), *SUBJECT.public_key());
    }

    #[test]
    fn test_key_decode_rejects_bad_fields() {
        let field = SUBJECT.public_key().encode();

        let mut oversized = field;
        codec::write_u16(&mut oversized, 66, 65);
        assert!(matches!(
            PublicKey::decode(&oversized),
            Err(DecodeError::Oversized { len: 65, .. })
        ));

        let mut padded = field;
        padded[10] = 0x01;
        assert_eq!(
            PublicKey::decode(&padded),
            Err(DecodeError::InvalidValue("key exponent"))
        );

        assert!(matches!(
            PublicKey::decode(&field[..KEY_LEN - 1]),
            Err(DecodeError::Truncated { .. })
        ));

        let empty = [0u8; KEY_LEN];
        assert_eq!(
            PublicKey::decode(&empty),
            Err(DecodeError::InvalidValue("public key"))
        );
    }

    #[test]
    fn test_certificate_verifies_against_issuer_only() {
        let cert = certificate();
        assert!(cert.verify(ISSUER.public_key()));
        assert!(!cert.verify(SUBJECT.public_key()));

        let encoded = cert.encode();
        assert!(verify_certificate(&encoded, ISSUER.public_key()));
        assert_eq!(Certificate::decode(&encoded).unwrap(), cert);
    }

    #[test]
    fn test_flipping_any_certificate_byte_breaks_verification() {
        let encoded = certificate().encode();
        for index in 0..encoded.len() {
            let mut tampered = encoded.to_vec();
            tampered[index] ^= 0x01;
            assert!(
                !verify_certificate(&tampered, ISSUER.public_key()),
                "flip at byte {index} still verified"
            );
        }
    }

    #[test]
    fn test_issue_certificate_free_function() {
        let id = PrincipalId::random();
        let encoded = issue_certificate(SUBJECT.public_key(), id, &*ISSUER).unwrap();
        assert!(verify_certificate(&encoded, ISSUER.public_key()));
        assert_eq!(Certificate::decode(&encoded).unwrap().id(), id);
    }

    #[test]
    fn test_credentials_require_matching_key() {
        let cert = certificate();
        let signer: Arc<dyn Signer> = Arc::new(SUBJECT.clone());
        let credentials = Credentials::new(signer, cert.clone()).unwrap();
        assert_eq!(credentials.id(), cert.id());

        let wrong: Arc<dyn Signer> = Arc::new(ISSUER.clone());
        assert!(matches!(
            Credentials::new(wrong, cert),
            Err(Error::CredentialMismatch)
        ));
    }
}
