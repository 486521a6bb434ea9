//! Typed wire messages shared by the card and the terminals.
//!
//! Both halves of every protocol encode and decode through these types, so field
//! order and lengths agree by construction. Signed messages expose the exact bytes
//! their signature covers via [`Signed::signed_bytes`]; there is no canonical form
//! beyond that concatenation.

use bytes::Bytes;

use crate::card::CardState;
use crate::codec::{self, DecodeError, Reader, Writer};
use crate::constants::{
    ASSIGNMENT_LITERAL, BLOCK_LITERAL, CONFIRMATION_BYTE, MAX_SIGNATURE_LEN, RETURN_LITERAL,
    SUCCESS_BYTE,
};
use crate::crypto::{self, Signer};
use crate::identity::{Certificate, PrincipalId, PublicKey};
use crate::Result;

/// A message with a fixed binary layout
pub trait WireMessage: Sized {
    /// Append the message fields in wire order
    fn write(&self, writer: &mut Writer);

    /// Read the message fields in wire order
    fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError>;

    /// Encode into a fresh buffer
    fn encode(&self) -> Bytes {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.freeze()
    }

    /// Decode a message that must span the whole buffer
    fn decode(bytes: &[u8]) -> std::result::Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let message = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(message)
    }
}

/// A message carrying a signature over some of its fields
pub trait Signed {
    /// Bytes covered by the signature
    fn signed_bytes(&self) -> Vec<u8>;

    /// Signature as received
    fn signature(&self) -> &[u8];

    /// Check the signature against the sender's key
    fn verify(&self, public_key: &PublicKey) -> bool {
        crypto::verify(public_key, &self.signed_bytes(), self.signature())
    }
}

fn read_signature(reader: &mut Reader<'_>) -> std::result::Result<Bytes, DecodeError> {
    reader
        .read_prefixed(MAX_SIGNATURE_LEN, "signature")
        .map(Bytes::copy_from_slice)
}

macro_rules! signed_message {
    ($ty:ty, |$msg:ident| $bytes:expr) => {
        impl Signed for $ty {
            fn signed_bytes(&self) -> Vec<u8> {
                let $msg = self;
                $bytes
            }

            fn signature(&self) -> &[u8] {
                &self.signature
            }
        }
    };
}

/// Message 1 of an authentication run: the card's certificate and nonce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateOffer {
    /// Card certificate
    pub certificate: Certificate,
    /// Card nonce
    pub nonce: u16,
}

impl WireMessage for CertificateOffer {
    fn write(&self, writer: &mut Writer) {
        writer.put_slice(&self.certificate.encode()).put_u16(self.nonce);
    }

    fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        Ok(Self {
            certificate: Certificate::read(reader)?,
            nonce: reader.read_u16("nonce")?,
        })
    }
}

/// Message 2 of an authentication run: the terminal's certificate, its signature
/// over the card nonce, and its own nonce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    /// Terminal certificate
    pub certificate: Certificate,
    /// Card nonce echoed back
    pub echo: u16,
    /// Signature over `echo`
    pub signature: Bytes,
    /// Terminal nonce
    pub nonce: u16,
}

impl ChallengeResponse {
    /// Sign `echo` and assemble the message
    pub fn sign(certificate: Certificate, echo: u16, nonce: u16, signer: &dyn Signer) -> Result<Self> {
        Ok(Self {
            certificate,
            echo,
            signature: signer.sign(&echo.to_be_bytes())?,
            nonce,
        })
    }
}

signed_message!(ChallengeResponse, |msg| msg.echo.to_be_bytes().to_vec());

impl WireMessage for ChallengeResponse {
    fn write(&self, writer: &mut Writer) {
        writer
            .put_slice(&self.certificate.encode())
            .put_u16(self.echo)
            .put_prefixed(&self.signature)
            .put_u16(self.nonce);
    }

    fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        Ok(Self {
            certificate: Certificate::read(reader)?,
            echo: reader.read_u16("nonce echo")?,
            signature: read_signature(reader)?,
            nonce: reader.read_u16("nonce")?,
        })
    }
}

/// Message 3 of an authentication run: the card's signature over the terminal nonce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceProof {
    /// Terminal nonce echoed back
    pub echo: u16,
    /// Signature over `echo`
    pub signature: Bytes,
}

impl NonceProof {
    /// Sign `echo`
    pub fn sign(echo: u16, signer: &dyn Signer) -> Result<Self> {
        Ok(Self {
            echo,
            signature: signer.sign(&echo.to_be_bytes())?,
        })
    }
}

signed_message!(NonceProof, |msg| msg.echo.to_be_bytes().to_vec());

impl WireMessage for NonceProof {
    fn write(&self, writer: &mut Writer) {
        writer.put_u16(self.echo).put_prefixed(&self.signature);
    }

    fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        Ok(Self {
            echo: reader.read_u16("nonce echo")?,
            signature: read_signature(reader)?,
        })
    }
}

/// Signed success marker closing a protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessProof {
    /// Sequence number
    pub sequence: u16,
    /// Signature over `0xFF || sequence`
    pub signature: Bytes,
}

impl SuccessProof {
    /// Sign a success marker at `sequence`
    pub fn sign(sequence: u16, signer: &dyn Signer) -> Result<Self> {
        let signature = signer.sign(&success_bytes(sequence))?;
        Ok(Self { sequence, signature })
    }
}

fn success_bytes(sequence: u16) -> Vec<u8> {
    codec::concat(&[&[SUCCESS_BYTE][..], &sequence.to_be_bytes()])
}

signed_message!(SuccessProof, |msg| success_bytes(msg.sequence));

impl WireMessage for SuccessProof {
    fn write(&self, writer: &mut Writer) {
        writer
            .put_u8(SUCCESS_BYTE)
            .put_u16(self.sequence)
            .put_prefixed(&self.signature);
    }

    fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        reader.expect_literal(&[SUCCESS_BYTE], "success byte")?;
        Ok(Self {
            sequence: reader.read_u16("sequence")?,
            signature: read_signature(reader)?,
        })
    }
}

/// Card asks the terminal for a vehicle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRequest {
    /// Sequence number
    pub sequence: u16,
    /// Signature over `"Car?" || sequence`
    pub signature: Bytes,
}

impl AssignmentRequest {
    /// Sign a request at `sequence`
    pub fn sign(sequence: u16, signer: &dyn Signer) -> Result<Self> {
        let signature = signer.sign(&literal_bytes(ASSIGNMENT_LITERAL, sequence))?;
        Ok(Self { sequence, signature })
    }
}

fn literal_bytes(literal: &[u8], sequence: u16) -> Vec<u8> {
    codec::concat(&[literal, &sequence.to_be_bytes()])
}

signed_message!(AssignmentRequest, |msg| literal_bytes(ASSIGNMENT_LITERAL, msg.sequence));

impl WireMessage for AssignmentRequest {
    fn write(&self, writer: &mut Writer) {
        writer
            .put_slice(ASSIGNMENT_LITERAL)
            .put_u16(self.sequence)
            .put_prefixed(&self.signature);
    }

    fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        reader.expect_literal(ASSIGNMENT_LITERAL, "assignment literal")?;
        Ok(Self {
            sequence: reader.read_u16("sequence")?,
            signature: read_signature(reader)?,
        })
    }
}

/// Terminal hands the card the certificate of its assigned vehicle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentGrant {
    /// Vehicle certificate
    pub vehicle: Certificate,
    /// Sequence number
    pub sequence: u16,
    /// Signature over `vehicle certificate || sequence`
    pub signature: Bytes,
}

impl AssignmentGrant {
    /// Sign a grant for `vehicle` at `sequence`
    pub fn sign(vehicle: Certificate, sequence: u16, signer: &dyn Signer) -> Result<Self> {
        let signature = signer.sign(&grant_bytes(&vehicle, sequence))?;
        Ok(Self {
            vehicle,
            sequence,
            signature,
        })
    }
}

fn grant_bytes(vehicle: &Certificate, sequence: u16) -> Vec<u8> {
    codec::concat(&[&vehicle.encode()[..], &sequence.to_be_bytes()])
}

signed_message!(AssignmentGrant, |msg| grant_bytes(&msg.vehicle, msg.sequence));

impl WireMessage for AssignmentGrant {
    fn write(&self, writer: &mut Writer) {
        writer
            .put_slice(&self.vehicle.encode())
            .put_u16(self.sequence)
            .put_prefixed(&self.signature);
    }

    fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        Ok(Self {
            vehicle: Certificate::read(reader)?,
            sequence: reader.read_u16("sequence")?,
            signature: read_signature(reader)?,
        })
    }
}

/// Card opens a vehicle return and reports its manipulation flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnRequest {
    /// Sequence number
    pub sequence: u16,
    /// Whether the card saw a tampered usage update
    pub manipulation: bool,
    /// Signature over `"Car Return" || sequence || manipulation`
    pub signature: Bytes,
}

impl ReturnRequest {
    /// Sign a return request
    pub fn sign(sequence: u16, manipulation: bool, signer: &dyn Signer) -> Result<Self> {
        let signature = signer.sign(&return_bytes(sequence, manipulation))?;
        Ok(Self {
            sequence,
            manipulation,
            signature,
        })
    }
}

fn return_bytes(sequence: u16, manipulation: bool) -> Vec<u8> {
    codec::concat(&[
        RETURN_LITERAL,
        &sequence.to_be_bytes(),
        &[u8::from(manipulation)],
    ])
}

signed_message!(ReturnRequest, |msg| return_bytes(msg.sequence, msg.manipulation));

impl WireMessage for ReturnRequest {
    fn write(&self, writer: &mut Writer) {
        writer
            .put_slice(RETURN_LITERAL)
            .put_u16(self.sequence)
            .put_bool(self.manipulation)
            .put_prefixed(&self.signature);
    }

    fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        reader.expect_literal(RETURN_LITERAL, "return literal")?;
        Ok(Self {
            sequence: reader.read_u16("sequence")?,
            manipulation: reader.read_bool("manipulation flag")?,
            signature: read_signature(reader)?,
        })
    }
}

/// Terminal challenges the card to report its usage counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnChallenge {
    /// Fresh terminal nonce the report must echo
    pub nonce: u16,
    /// Sequence number
    pub sequence: u16,
    /// Signature over `nonce || sequence`
    pub signature: Bytes,
}

impl ReturnChallenge {
    /// Sign a challenge
    pub fn sign(nonce: u16, sequence: u16, signer: &dyn Signer) -> Result<Self> {
        let signature = signer.sign(&pair_bytes(nonce, sequence))?;
        Ok(Self {
            nonce,
            sequence,
            signature,
        })
    }
}

fn pair_bytes(first: u16, second: u16) -> Vec<u8> {
    codec::concat(&[&first.to_be_bytes()[..], &second.to_be_bytes()])
}

signed_message!(ReturnChallenge, |msg| pair_bytes(msg.nonce, msg.sequence));

impl WireMessage for ReturnChallenge {
    fn write(&self, writer: &mut Writer) {
        writer
            .put_u16(self.nonce)
            .put_u16(self.sequence)
            .put_prefixed(&self.signature);
    }

    fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        Ok(Self {
            nonce: reader.read_u16("nonce")?,
            sequence: reader.read_u16("sequence")?,
            signature: read_signature(reader)?,
        })
    }
}

/// Card reports the final usage counter of the rental
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnReport {
    /// Usage counter
    pub usage: u32,
    /// Challenge nonce echoed back
    pub echo: u16,
    /// Sequence number
    pub sequence: u16,
    /// Signature over `usage || echo || sequence`
    pub signature: Bytes,
}

impl ReturnReport {
    /// Sign a report
    pub fn sign(usage: u32, echo: u16, sequence: u16, signer: &dyn Signer) -> Result<Self> {
        let signature = signer.sign(&report_bytes(usage, echo, sequence))?;
        Ok(Self {
            usage,
            echo,
            sequence,
            signature,
        })
    }
}

fn report_bytes(usage: u32, echo: u16, sequence: u16) -> Vec<u8> {
    let mut buf = vec![0u8; 8];
    codec::write_u32(&mut buf, 0, usage);
    codec::write_u16(&mut buf, 4, echo);
    codec::write_u16(&mut buf, 6, sequence);
    buf
}

signed_message!(ReturnReport, |msg| report_bytes(msg.usage, msg.echo, msg.sequence));

impl WireMessage for ReturnReport {
    fn write(&self, writer: &mut Writer) {
        writer
            .put_u32(self.usage)
            .put_u16(self.echo)
            .put_u16(self.sequence)
            .put_prefixed(&self.signature);
    }

    fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        Ok(Self {
            usage: reader.read_u32("usage counter")?,
            echo: reader.read_u16("nonce echo")?,
            sequence: reader.read_u16("sequence")?,
            signature: read_signature(reader)?,
        })
    }
}

/// Vehicle sends the incremented usage counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageUpdate {
    /// New usage counter
    pub counter: u32,
    /// Sequence number
    pub sequence: u16,
    /// Signature over `counter || sequence`
    pub signature: Bytes,
}

impl UsageUpdate {
    /// Sign an update
    pub fn sign(counter: u32, sequence: u16, signer: &dyn Signer) -> Result<Self> {
        let signature = signer.sign(&counter_bytes(None, counter, sequence))?;
        Ok(Self {
            counter,
            sequence,
            signature,
        })
    }
}

fn counter_bytes(prefix: Option<u8>, counter: u32, sequence: u16) -> Vec<u8> {
    let mut writer = Writer::with_capacity(7);
    if let Some(prefix) = prefix {
        writer.put_u8(prefix);
    }
    writer.put_u32(counter).put_u16(sequence);
    writer.freeze().to_vec()
}

signed_message!(UsageUpdate, |msg| counter_bytes(None, msg.counter, msg.sequence));

impl WireMessage for UsageUpdate {
    fn write(&self, writer: &mut Writer) {
        writer
            .put_u32(self.counter)
            .put_u16(self.sequence)
            .put_prefixed(&self.signature);
    }

    fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        Ok(Self {
            counter: reader.read_u32("usage counter")?,
            sequence: reader.read_u16("sequence")?,
            signature: read_signature(reader)?,
        })
    }
}

/// Card co-signs the usage counter it committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageConfirmation {
    /// Committed usage counter
    pub counter: u32,
    /// Sequence number
    pub sequence: u16,
    /// Signature over `0x01 || counter || sequence`
    pub signature: Bytes,
}

impl UsageConfirmation {
    /// Sign a confirmation
    pub fn sign(counter: u32, sequence: u16, signer: &dyn Signer) -> Result<Self> {
        let signature = signer.sign(&counter_bytes(Some(CONFIRMATION_BYTE), counter, sequence))?;
        Ok(Self {
            counter,
            sequence,
            signature,
        })
    }
}

signed_message!(UsageConfirmation, |msg| counter_bytes(
    Some(CONFIRMATION_BYTE),
    msg.counter,
    msg.sequence
));

impl WireMessage for UsageConfirmation {
    fn write(&self, writer: &mut Writer) {
        writer
            .put_u8(CONFIRMATION_BYTE)
            .put_u32(self.counter)
            .put_u16(self.sequence)
            .put_prefixed(&self.signature);
    }

    fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        reader.expect_literal(&[CONFIRMATION_BYTE], "confirmation byte")?;
        Ok(Self {
            counter: reader.read_u32("usage counter")?,
            sequence: reader.read_u16("sequence")?,
            signature: read_signature(reader)?,
        })
    }
}

/// Terminal orders a blocked card to its end of life
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOrder {
    /// Terminal certificate
    pub terminal: Certificate,
    /// Sequence number
    pub sequence: u16,
    /// Signature over `"Block" || sequence`
    pub signature: Bytes,
}

impl BlockOrder {
    /// Sign a block order
    pub fn sign(terminal: Certificate, sequence: u16, signer: &dyn Signer) -> Result<Self> {
        let signature = signer.sign(&literal_bytes(BLOCK_LITERAL, sequence))?;
        Ok(Self {
            terminal,
            sequence,
            signature,
        })
    }
}

signed_message!(BlockOrder, |msg| literal_bytes(BLOCK_LITERAL, msg.sequence));

impl WireMessage for BlockOrder {
    fn write(&self, writer: &mut Writer) {
        writer
            .put_slice(&self.terminal.encode())
            .put_u16(self.sequence)
            .put_prefixed(&self.signature);
    }

    fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        Ok(Self {
            terminal: Certificate::read(reader)?,
            sequence: reader.read_u16("sequence")?,
            signature: read_signature(reader)?,
        })
    }
}

/// Diagnostic snapshot of the card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardStatus {
    /// Lifecycle state
    pub state: CardState,
    /// Usage counter
    pub usage: u32,
    /// Manipulation flag
    pub manipulated: bool,
    /// Card id, once issued
    pub id: Option<PrincipalId>,
}

impl WireMessage for CardStatus {
    fn write(&self, writer: &mut Writer) {
        writer
            .put_u8(self.state.to_u8())
            .put_u32(self.usage)
            .put_bool(self.manipulated);
        match &self.id {
            Some(id) => writer.put_bool(true).put_slice(id.as_bytes()),
            None => writer.put_bool(false),
        };
    }

    fn read(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        let state = CardState::from_u8(reader.read_u8("card state")?)
            .ok_or(DecodeError::InvalidValue("card state"))?;
        let usage = reader.read_u32("usage counter")?;
        let manipulated = reader.read_bool("manipulation flag")?;
        let id = if reader.read_bool("id present")? {
            Some(PrincipalId::read(reader)?)
        } else {
            None
        };
        Ok(Self {
            state,
            usage,
            manipulated,
            id,
        })
    }
}
