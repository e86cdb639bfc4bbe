//! Container index and container-map records.
//!
//! A container is not stored anywhere: it is the pairing of the i-th
//! private-key object with whatever public key and certificate share its
//! identifier attribute. Both the count and the index-to-key mapping are
//! recomputed from the live token store on every call, so a card swapped
//! behind the adapter's back is reflected by the very next request.

pub mod guid;

use bitflags::bitflags;

use crate::error::Status;
use crate::token::{ObjectId, TokenSession};

/// Encoded size of one container-map record.
pub const RECORD_LEN: usize = 86;

/// Width of the GUID field inside a record, in UTF-16 units
/// (35 name characters, a hyphenated GUID's 36, plus the terminator fit
/// the host's fixed 40-unit field).
pub const GUID_FIELD_UNITS: usize = 40;

bitflags! {
    /// Per-record flag byte in the container map.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContainerFlags: u8 {
        /// The record describes a usable container.
        const VALID = 0b01;
        /// The container holds the card's default key.
        const DEFAULT = 0b10;
    }
}

/// Number of containers currently on the token.
pub fn count<S: TokenSession>(session: &S) -> Result<usize, Status> {
    Ok(session.private_keys()?.len())
}

/// Private-key object backing container `index`, or `None` when the index
/// is past the end of the live enumeration.
pub fn at<S: TokenSession>(session: &S, index: usize) -> Result<Option<ObjectId>, Status> {
    Ok(session.private_keys()?.into_iter().nth(index))
}

/// One derived container-map record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMapRecord {
    /// Hyphenated lowercase GUID, 36 characters.
    pub guid: String,
    pub flags: ContainerFlags,
    /// Always zero: no separate signature key is modeled.
    pub signature_key_bits: u16,
    /// Bit length of the container's private key.
    pub key_exchange_key_bits: u16,
}

impl ContainerMapRecord {
    /// Encode into the host's fixed 86-byte wire layout: the GUID as a
    /// null-terminated UTF-16LE string in a 40-unit field, the flag byte,
    /// one reserved byte, then the two key sizes as little-endian words.
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        for (i, unit) in self.guid.encode_utf16().take(GUID_FIELD_UNITS - 1).enumerate() {
            out[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        out[80] = self.flags.bits();
        // out[81] reserved
        out[82..84].copy_from_slice(&self.signature_key_bits.to_le_bytes());
        out[84..86].copy_from_slice(&self.key_exchange_key_bits.to_le_bytes());
        out
    }
}

/// Records for every current container, in index order. Container 0 is
/// flagged as the default; all containers are flagged valid.
pub fn map_records<S: TokenSession>(session: &S) -> Result<Vec<ContainerMapRecord>, Status> {
    let keys = session.private_keys()?;
    let mut records = Vec::with_capacity(keys.len());
    for (index, key) in keys.into_iter().enumerate() {
        let mut flags = ContainerFlags::VALID;
        if index == 0 {
            flags |= ContainerFlags::DEFAULT;
        }
        let bits = session.key_size_bits(key)?;
        records.push(ContainerMapRecord {
            guid: guid::container_guid(session, key)?,
            flags,
            signature_key_bits: 0,
            key_exchange_key_bits: u16::try_from(bits).map_err(|_| Status::Unexpected)?,
        });
    }
    Ok(records)
}

/// The complete container-map file: concatenated encoded records.
pub fn encode_map<S: TokenSession>(session: &S) -> Result<Vec<u8>, Status> {
    let records = map_records(session)?;
    let mut out = Vec::with_capacity(records.len() * RECORD_LEN);
    for record in &records {
        out.extend_from_slice(&record.encode());
    }
    Ok(out)
}
