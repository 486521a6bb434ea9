//! Core traits and types for APDU (Application Protocol Data Unit) operations
//!
//! This crate provides the foundational types and traits for working with smart card
//! APDU commands and responses according to ISO/IEC 7816-4.
//!
//! ## Overview
//!
//! APDU is the communication format used by smart cards. This crate provides:
//!
//! - Creating and parsing APDU commands (short and extended length) and responses
//! - A transport abstraction for exchanging raw APDUs with a card
//! - Error handling and status word interpretation
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

// Main modules
pub mod command;
pub mod response;
pub mod transport;

// Core error types
mod error;
pub use error::{Error, Result};
pub(crate) use error::ResultExt;

// Re-exports for common types
pub use command::Command;
pub use response::Response;
pub use response::status::StatusWord;
pub use transport::{CardTransport, TransportError};
