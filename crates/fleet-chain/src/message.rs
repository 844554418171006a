//! Cross-domain message parsing and identification
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! version(1) | nonce(4) | origin(4) | sender(32) | destination(4) | recipient(32) | body(..)
//! ```

use sha3::{Digest, Keccak256};

use crate::error::{Error, Result};
use crate::types::{DomainId, H256};

const HEADER_LEN: usize = 1 + 4 + 4 + 32 + 4 + 32;

/// A decoded message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub version: u8,
    pub nonce: u32,
    pub origin: DomainId,
    pub sender: H256,
    pub destination: DomainId,
    pub recipient: H256,
    pub body: Vec<u8>,
}

impl ParsedMessage {
    /// Encode back into the wire layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.push(self.version);
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&self.origin.to_be_bytes());
        out.extend_from_slice(&self.sender.0);
        out.extend_from_slice(&self.destination.to_be_bytes());
        out.extend_from_slice(&self.recipient.0);
        out.extend_from_slice(&self.body);
        out
    }

    pub fn id(&self) -> H256 {
        message_id(&self.to_bytes())
    }
}

/// Decode a message from its wire bytes
pub fn parse_message(bytes: &[u8]) -> Result<ParsedMessage> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::InvalidMessage(format!(
            "expected at least {} bytes, got {}",
            HEADER_LEN,
            bytes.len()
        )));
    }

    let u32_at = |offset: usize| {
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[offset..offset + 4]);
        u32::from_be_bytes(word)
    };
    let h256_at = |offset: usize| {
        let mut word = [0u8; 32];
        word.copy_from_slice(&bytes[offset..offset + 32]);
        H256(word)
    };

    Ok(ParsedMessage {
        version: bytes[0],
        nonce: u32_at(1),
        origin: u32_at(5),
        sender: h256_at(9),
        destination: u32_at(41),
        recipient: h256_at(45),
        body: bytes[HEADER_LEN..].to_vec(),
    })
}

/// Keccak-256 of the raw message bytes
pub fn message_id(bytes: &[u8]) -> H256 {
    let digest = Keccak256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    H256(out)
}
