//! Property tests over the derived formats: GUID grouping and the RSA
//! blob layout must hold for arbitrary identifiers and moduli.

use cardbridge_core::blob::{RSA_HEADER_LEN, rsa_public_key_bytes};
use cardbridge_core::containers::guid::{derive_guid, format_guid};
use cardbridge_core::token::{AttributeId, ObjectClass, SoftObject, SoftToken};
use proptest::prelude::*;

proptest! {
    #[test]
    fn guid_formatting_is_always_8_4_4_4_12(raw in any::<[u8; 16]>()) {
        let formatted = format_guid(&raw);
        prop_assert_eq!(formatted.len(), 36);
        let groups: Vec<&str> = formatted.split('-').collect();
        prop_assert_eq!(groups.len(), 5);
        let lens: Vec<usize> = groups.iter().map(|g| g.len()).collect();
        prop_assert_eq!(lens, vec![8, 4, 4, 4, 12]);
        for group in groups {
            prop_assert!(group.bytes().all(|b| b.is_ascii_hexdigit()));
            prop_assert!(!group.bytes().any(|b| b.is_ascii_uppercase()));
        }
    }

    #[test]
    fn short_identifiers_derive_by_right_aligned_xor(
        serial in any::<[u8; 16]>(),
        id in prop::collection::vec(any::<u8>(), 1..16),
    ) {
        let token = SoftToken::new(serial);
        let key = token.add_object(
            SoftObject::new(ObjectClass::PrivateKey).with_attribute(AttributeId::Id, &id),
        );
        let raw = derive_guid(&token, key).unwrap();

        let offset = 16 - id.len();
        for i in 0..offset {
            prop_assert_eq!(raw[i], serial[i]);
        }
        for (i, byte) in id.iter().enumerate() {
            prop_assert_eq!(raw[offset + i], serial[offset + i] ^ byte);
        }
    }

    #[test]
    fn long_identifiers_pass_through(
        serial in any::<[u8; 16]>(),
        id in prop::collection::vec(any::<u8>(), 16..40),
    ) {
        let token = SoftToken::new(serial);
        let key = token.add_object(
            SoftObject::new(ObjectClass::PrivateKey).with_attribute(AttributeId::Id, &id),
        );
        let raw = derive_guid(&token, key).unwrap();
        prop_assert_eq!(&raw[..], &id[..16]);
    }

    #[test]
    fn rsa_blob_round_trips_the_modulus(
        modulus in prop::collection::vec(any::<u8>(), 1..512),
    ) {
        let blob = rsa_public_key_bytes(&modulus);
        prop_assert_eq!(blob.len(), RSA_HEADER_LEN + modulus.len());

        // Bit length advertised in the key header.
        let bits = u32::from_le_bytes(blob[12..16].try_into().unwrap());
        prop_assert_eq!(bits as usize, modulus.len() * 8);

        // Stripping the headers and reversing the byte order recovers the
        // big-endian modulus exactly.
        let mut recovered = blob[RSA_HEADER_LEN..].to_vec();
        recovered.reverse();
        prop_assert_eq!(recovered, modulus);
    }
}
