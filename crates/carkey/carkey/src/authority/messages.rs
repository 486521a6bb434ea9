//! Byte encoding of the authority's mailbox protocol: a tag byte followed by
//! the body. Text travels behind a `u16` length prefix.

use derive_more::Display;

use crate::codec::{DecodeError, Reader, Writer};
use crate::constants::KEY_LEN;
use crate::identity::{Certificate, PrincipalId, PublicKey};
use crate::messages::WireMessage;

const MAX_TEXT_LEN: usize = 256;

/// Request a terminal posts to the authority
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum AuthorityRequest {
    /// Is this card blocked?
    #[display("IsBlocked({_0})")]
    IsBlocked(PrincipalId),
    /// Certify a freshly generated card key under a new id
    #[display("RegisterCard")]
    RegisterCard(PublicKey),
    /// Hand the card a free vehicle
    #[display("AssignVehicle({_0})")]
    AssignVehicle(PrincipalId),
    /// Close the card's rental at the given usage
    #[display("ReturnVehicle({card}, {usage})")]
    ReturnVehicle {
        /// Card returning its vehicle
        card: PrincipalId,
        /// Final usage counter
        usage: u32,
    },
    /// Keep the card's rental open until the card is seen again
    #[display("HoldRental({_0})")]
    HoldRental(PrincipalId),
    /// Block the card
    #[display("BlockCard({_0})")]
    BlockCard(PrincipalId),
    /// Unblock the card
    #[display("UnblockCard({_0})")]
    UnblockCard(PrincipalId),
}

/// The authority's answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityReply {
    /// Blocklist lookup result
    Blocked(bool),
    /// Certificate issued for a card
    Certificate(Certificate),
    /// Certificate of the vehicle assigned to the card
    VehicleAssigned(Certificate),
    /// Every vehicle is rented out
    NoVehicleAvailable,
    /// The card is blocked
    CardBlocked,
    /// Acknowledgment text
    Acknowledged(String),
    /// The request could not be served
    Refused(String),
}

mod tag {
    pub(super) const IS_BLOCKED: u8 = 0x01;
    pub(super) const REGISTER_CARD: u8 = 0x02;
    pub(super) const ASSIGN_VEHICLE: u8 = 0x03;
    pub(super) const RETURN_VEHICLE: u8 = 0x04;
    pub(super) const BLOCK_CARD: u8 = 0x05;
    pub(super) const UNBLOCK_CARD: u8 = 0x06;
    pub(super) const HOLD_RENTAL: u8 = 0x07;

    pub(super) const BLOCKED: u8 = 0x81;
    pub(super) const CERTIFICATE: u8 = 0x82;
    pub(super) const VEHICLE_ASSIGNED: u8 = 0x83;
    pub(super) const NO_VEHICLE: u8 = 0x84;
    pub(super) const CARD_BLOCKED: u8 = 0x85;
    pub(super) const ACKNOWLEDGED: u8 = 0x86;
    pub(super) const REFUSED: u8 = 0x87;
}

impl WireMessage for AuthorityRequest {
    fn write(&self, writer: &mut Writer) {
        match self {
            Self::IsBlocked(id) => writer.put_u8(tag::IS_BLOCKED).put_slice(id.as_bytes()),
            Self::RegisterCard(key) => writer.put_u8(tag::REGISTER_CARD).put_slice(&key.encode()),
            Self::AssignVehicle(id) => writer.put_u8(tag::ASSIGN_VEHICLE).put_slice(id.as_bytes()),
            Self::ReturnVehicle { card, usage } => writer
                .put_u8(tag::RETURN_VEHICLE)
                .put_slice(card.as_bytes())
                .put_u32(*usage),
            Self::HoldRental(id) => writer.put_u8(tag::HOLD_RENTAL).put_slice(id.as_bytes()),
            Self::BlockCard(id) => writer.put_u8(tag::BLOCK_CARD).put_slice(id.as_bytes()),
            Self::UnblockCard(id) => writer.put_u8(tag::UNBLOCK_CARD).put_slice(id.as_bytes()),
        };
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let id = |reader: &mut Reader<'_>| reader.read_array("id").map(PrincipalId::new);
        Ok(match reader.read_u8("request tag")? {
            tag::IS_BLOCKED => Self::IsBlocked(id(reader)?),
            tag::REGISTER_CARD => {
                Self::RegisterCard(PublicKey::decode(reader.read_bytes(KEY_LEN, "card key")?)?)
            }
            tag::ASSIGN_VEHICLE => Self::AssignVehicle(id(reader)?),
            tag::RETURN_VEHICLE => Self::ReturnVehicle {
                card: id(reader)?,
                usage: reader.read_u32("usage counter")?,
            },
            tag::HOLD_RENTAL => Self::HoldRental(id(reader)?),
            tag::BLOCK_CARD => Self::BlockCard(id(reader)?),
            tag::UNBLOCK_CARD => Self::UnblockCard(id(reader)?),
            _ => return Err(DecodeError::InvalidValue("request tag")),
        })
    }
}

impl WireMessage for AuthorityReply {
    fn write(&self, writer: &mut Writer) {
        match self {
            Self::Blocked(blocked) => writer.put_u8(tag::BLOCKED).put_bool(*blocked),
            Self::Certificate(cert) => writer.put_u8(tag::CERTIFICATE).put_slice(&cert.encode()),
            Self::VehicleAssigned(cert) => writer.put_u8(tag::VEHICLE_ASSIGNED).put_slice(&cert.encode()),
            Self::NoVehicleAvailable => writer.put_u8(tag::NO_VEHICLE),
            Self::CardBlocked => writer.put_u8(tag::CARD_BLOCKED),
            Self::Acknowledged(text) => writer.put_u8(tag::ACKNOWLEDGED).put_prefixed_u16(text.as_bytes()),
            Self::Refused(text) => writer.put_u8(tag::REFUSED).put_prefixed_u16(text.as_bytes()),
        };
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let text = |reader: &mut Reader<'_>| -> Result<String, DecodeError> {
            let bytes = reader.read_prefixed_u16(MAX_TEXT_LEN, "text")?;
            String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidValue("text"))
        };
        Ok(match reader.read_u8("reply tag")? {
            tag::BLOCKED => Self::Blocked(reader.read_bool("blocked flag")?),
            tag::CERTIFICATE => Self::Certificate(Certificate::read(reader)?),
            tag::VEHICLE_ASSIGNED => Self::VehicleAssigned(Certificate::read(reader)?),
            tag::NO_VEHICLE => Self::NoVehicleAvailable,
            tag::CARD_BLOCKED => Self::CardBlocked,
            tag::ACKNOWLEDGED => Self::Acknowledged(text(reader)?),
            tag::REFUSED => Self::Refused(text(reader)?),
            _ => return Err(DecodeError::InvalidValue("reply tag")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let id = PrincipalId::new([1, 2, 3, 4, 5]);
        let request = AuthorityRequest::ReturnVehicle { card: id, usage: 10 };
        let bytes = request.encode();
        assert_eq!(bytes.as_ref(), &[0x04, 1, 2, 3, 4, 5, 0, 0, 0, 10]);
        assert_eq!(AuthorityRequest::decode(&bytes).unwrap(), request);
        assert_eq!(request.to_string(), "ReturnVehicle(0102030405, 10)");
    }

    #[test]
    fn test_reply_text() {
        let reply = AuthorityReply::Acknowledged("0102030405 has been removed from cards.".into());
        let bytes = reply.encode();
        assert_eq!(&bytes[..3], &[0x86, 0x00, 39]);
        assert_eq!(AuthorityReply::decode(&bytes).unwrap(), reply);
    }

    #[test]
    fn test_unknown_tags() {
        assert_eq!(
            AuthorityRequest::decode(&[0x7F]),
            Err(DecodeError::InvalidValue("request tag"))
        );
        assert_eq!(
            AuthorityReply::decode(&[0x01]),
            Err(DecodeError::InvalidValue("reply tag"))
        );
        assert!(AuthorityReply::decode(&[0x86, 0x00, 0x02, 0xFF, 0xFE]).is_err());
    }
}
