//! APDU command definitions
//!
//! This module provides the generic command type together with its ISO/IEC 7816-4
//! serialization. Payloads longer than 255 bytes are framed with extended length
//! fields (`00 Lc1 Lc2`), everything else uses the short form.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Largest payload that fits the short Lc field
pub const SHORT_DATA_MAX: usize = 255;

/// Largest payload that fits the extended Lc field
pub const EXTENDED_DATA_MAX: usize = 65_535;

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length (optional). `0` requests the maximum for the chosen form.
    pub le: Option<u16>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Set the data field. An empty payload is treated as no data.
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        let data = data.into();
        self.data = (!data.is_empty()).then_some(data);
        self
    }

    /// Command payload, empty if there is none
    pub fn payload(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    /// Whether this command needs extended length framing
    pub fn is_extended(&self) -> bool {
        self.payload().len() > SHORT_DATA_MAX || self.le.is_some_and(|le| le > 256)
    }

    /// Calculate length of serialized command
    pub fn command_length(&self) -> usize {
        let data_len = self.payload().len();
        let extended = self.is_extended();

        let mut length = 4;
        if data_len > 0 {
            length += if extended { 3 } else { 1 } + data_len;
        }
        if self.le.is_some() {
            length += match (extended, data_len > 0) {
                (false, _) => 1,
                (true, true) => 2,
                (true, false) => 3,
            };
        }
        length
    }

    /// Convert to raw APDU bytes
    pub fn to_bytes(&self) -> Result<Bytes> {
        let data = self.payload();
        if data.len() > EXTENDED_DATA_MAX {
            return Err(Error::DataTooLong(data.len()));
        }
        let extended = self.is_extended();

        let mut buffer = BytesMut::with_capacity(self.command_length());

        // Header: CLA, INS, P1, P2
        buffer.put_u8(self.cla);
        buffer.put_u8(self.ins);
        buffer.put_u8(self.p1);
        buffer.put_u8(self.p2);

        // Lc and data
        if !data.is_empty() {
            if extended {
                buffer.put_u8(0x00);
                buffer.put_u16(data.len() as u16);
            } else {
                buffer.put_u8(data.len() as u8);
            }
            buffer.put_slice(data);
        }

        // Le
        if let Some(le) = self.le {
            if extended {
                if data.is_empty() {
                    buffer.put_u8(0x00);
                }
                buffer.put_u16(le);
            } else {
                // 256 is encoded as 00 in the short form
                buffer.put_u8(le as u8);
            }
        }

        Ok(buffer.freeze())
    }

    /// Parse a command from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::InvalidCommandLength(data.len()));
        }

        let mut command = Self::new(data[0], data[1], data[2], data[3]);
        let body = &data[4..];

        match body {
            // Case 1: header only
            [] => {}
            // Case 2 short: Le only
            [le] => command.le = Some(u16::from(*le)),
            // Case 2 extended: 00 Le1 Le2
            [0x00, hi, lo] => command.le = Some(u16::from_be_bytes([*hi, *lo])),
            // Case 3/4 extended: 00 Lc1 Lc2 data [Le1 Le2]
            [0x00, hi, lo, rest @ ..] => {
                let lc = usize::from(u16::from_be_bytes([*hi, *lo]));
                if lc == 0 {
                    return Err(Error::InvalidCommandLength(data.len()));
                }
                match rest.len().checked_sub(lc) {
                    Some(0) => {}
                    Some(2) => command.le = Some(u16::from_be_bytes([rest[lc], rest[lc + 1]])),
                    _ => return Err(Error::InvalidCommandLength(data.len())),
                }
                command.data = Some(Bytes::copy_from_slice(&rest[..lc]));
            }
            // Case 3/4 short: Lc data [Le]
            [lc, rest @ ..] => {
                let lc = usize::from(*lc);
                if lc == 0 {
                    return Err(Error::InvalidCommandLength(data.len()));
                }
                match rest.len().checked_sub(lc) {
                    Some(0) => {}
                    Some(1) => command.le = Some(u16::from(rest[lc])),
                    _ => return Err(Error::InvalidCommandLength(data.len())),
                }
                command.data = Some(Bytes::copy_from_slice(&rest[..lc]));
            }
        }

        Ok(command)
    }
}
