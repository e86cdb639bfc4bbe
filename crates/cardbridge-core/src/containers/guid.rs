//! Container GUID derivation.
//!
//! A container's GUID is derived from its private key's identifier
//! attribute. Identifiers of 16 bytes or more are used verbatim (first 16
//! bytes). Shorter identifiers are folded into the token serial number:
//! the identifier is XORed into the low bytes of the serial, right-aligned,
//! so distinct short identifiers on one token yield distinct GUIDs as long
//! as the identifiers themselves are distinct. No version or variant bits
//! are forced; the 16 bytes are formatted as-is.

use uuid::Uuid;

use crate::error::Status;
use crate::token::{AttributeId, ObjectId, SERIAL_NUMBER_LEN, TokenSession};

/// Raw GUID length in bytes.
pub const GUID_LEN: usize = 16;

/// Derive the raw 16-byte GUID for the container backed by `private_key`.
pub fn derive_guid<S: TokenSession>(
    session: &S,
    private_key: ObjectId,
) -> Result<[u8; GUID_LEN], Status> {
    let id = session
        .attribute(private_key, AttributeId::Id)?
        .ok_or(Status::Unexpected)?;

    if id.len() >= GUID_LEN {
        let mut raw = [0u8; GUID_LEN];
        raw.copy_from_slice(&id[..GUID_LEN]);
        return Ok(raw);
    }

    let mut raw = session.info()?.serial_number;
    debug_assert_eq!(raw.len(), SERIAL_NUMBER_LEN);
    let offset = GUID_LEN - id.len();
    for (slot, byte) in raw[offset..].iter_mut().zip(id.iter()) {
        *slot ^= byte;
    }
    Ok(raw)
}

/// Format a raw GUID in the hyphenated 8-4-4-4-12 lowercase-hex layout.
pub fn format_guid(raw: &[u8; GUID_LEN]) -> String {
    Uuid::from_bytes(*raw).hyphenated().to_string()
}

/// Derived and formatted GUID for one container.
pub fn container_guid<S: TokenSession>(
    session: &S,
    private_key: ObjectId,
) -> Result<String, Status> {
    Ok(format_guid(&derive_guid(session, private_key)?))
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::token::{ObjectClass, SoftObject, SoftToken};

    const SERIAL: [u8; 16] = hex!("00112233445566778899aabbccddeeff");

    fn key_with_id(token: &SoftToken, id: &[u8]) -> ObjectId {
        token.add_object(
            SoftObject::new(ObjectClass::PrivateKey)
                .with_attribute(AttributeId::Id, id)
                .with_key_size_bits(2048),
        )
    }

    #[test]
    fn long_identifiers_are_used_verbatim() {
        let token = SoftToken::new(SERIAL);
        let id = hex!("f0e1d2c3b4a5968778695a4b3c2d1e0fdeadbeef");
        let key = key_with_id(&token, &id);
        assert_eq!(&derive_guid(&token, key).unwrap()[..], &id[..16]);
    }

    #[test]
    fn short_identifiers_fold_into_the_low_serial_bytes() {
        let token = SoftToken::new(SERIAL);
        let key = key_with_id(&token, &hex!("01020304"));
        // XOR lands right-aligned: only the last four bytes change.
        assert_eq!(
            derive_guid(&token, key).unwrap(),
            hex!("00112233445566778899aabbcddfedfb")
        );
    }

    #[test]
    fn formatting_groups_8_4_4_4_12_lowercase() {
        let raw = hex!("00112233445566778899AABBCCDDEEFF");
        assert_eq!(format_guid(&raw), "00112233-4455-6677-8899-aabbccddeeff");
    }

    #[test]
    fn guid_is_stable_while_the_store_is_unchanged() {
        let token = SoftToken::new(SERIAL);
        let key = key_with_id(&token, b"\x01\x02");
        let first = container_guid(&token, key).unwrap();
        let second = container_guid(&token, key).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 36);
    }

    #[test]
    fn missing_identifier_attribute_is_unexpected() {
        let token = SoftToken::new(SERIAL);
        let key = token.add_object(SoftObject::new(ObjectClass::PrivateKey));
        assert_eq!(derive_guid(&token, key).unwrap_err(), Status::Unexpected);
    }
}
