//! Property and capability catalogue.
//!
//! The host interrogates the card through a fixed set of named properties.
//! Each resolves to a deterministic value derived from live token state or
//! from constants; values are written into the caller's buffer in the
//! host's little-endian structure layouts. An unknown name fails with
//! `InvalidParameter` and leaves the destination untouched; a destination
//! smaller than the property requires fails with `InsufficientBuffer`
//! carrying the exact required size, again without touching the
//! destination.

use bitflags::bitflags;
use tracing::debug;

use crate::blob;
use crate::containers;
use crate::error::Status;
use crate::token::{AttributeId, ObjectClass, PinRole, TokenSession};

// ==================== Property names ====================

/// Card-level property names.
pub mod names {
    pub const FREE_SPACE: &str = "Free Space";
    pub const CAPABILITIES: &str = "Capabilities";
    pub const KEY_SIZES: &str = "Key Sizes";
    pub const READ_ONLY: &str = "Read Only Mode";
    pub const CACHE_MODE: &str = "Cache Mode";
    pub const X509_ENROLLMENT: &str = "Supports Windows x.509 Enrollment";
    pub const CARD_GUID: &str = "Card Identifier";
    pub const SERIAL_NUMBER: &str = "Card Serial Number";
    pub const PIN_INFO: &str = "PIN Information";
    pub const PIN_LIST: &str = "PIN List";
    pub const AUTHENTICATED_STATE: &str = "Authenticated State";
    pub const PIN_STRENGTH_VERIFY: &str = "PIN Strength Verify";
    pub const KEY_IMPORT_SUPPORT: &str = "Key Import Support";

    /// Per-container property names.
    pub const CONTAINER_INFO: &str = "Container Info";
    pub const PIN_IDENTIFIER: &str = "PIN Identifier";
}

/// Every card-level property name, in catalogue order.
pub const CARD_PROPERTY_NAMES: [&str; 13] = [
    names::FREE_SPACE,
    names::CAPABILITIES,
    names::KEY_SIZES,
    names::READ_ONLY,
    names::CACHE_MODE,
    names::X509_ENROLLMENT,
    names::CARD_GUID,
    names::SERIAL_NUMBER,
    names::PIN_INFO,
    names::PIN_LIST,
    names::AUTHENTICATED_STATE,
    names::PIN_STRENGTH_VERIFY,
    names::KEY_IMPORT_SUPPORT,
];

// ==================== Algorithm identifiers ====================

pub const AT_KEYEXCHANGE: u32 = 1;
pub const AT_SIGNATURE: u32 = 2;
pub const AT_ECDHE_P256: u32 = 3;
pub const AT_ECDHE_P384: u32 = 4;
pub const AT_ECDHE_P521: u32 = 5;
pub const AT_ECDSA_P256: u32 = 6;
pub const AT_ECDSA_P384: u32 = 7;
pub const AT_ECDSA_P521: u32 = 8;

// ==================== Scalar constants ====================

/// Cache-mode value telling the host to re-query on every access.
pub const CACHE_MODE_NO_CACHE: u32 = 3;

/// PIN strength: the PIN travels to the card in plaintext.
pub const PIN_STRENGTH_PLAINTEXT: u32 = 1;

bitflags! {
    /// Set of PIN roles, as the host's one-bit-per-role mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PinSet: u32 {
        const USER = 1 << 1;
    }
}

impl PinRole {
    /// Singleton set containing this role.
    pub fn as_set(self) -> PinSet {
        match self {
            PinRole::User => PinSet::USER,
        }
    }
}

// ==================== Structured values ====================

pub const FREE_SPACE_INFO_VERSION: u32 = 1;
pub const CAPABILITIES_VERSION: u32 = 1;
pub const KEY_SIZES_VERSION: u32 = 1;
pub const PIN_INFO_VERSION: u32 = 6;
pub const PIN_CACHE_POLICY_VERSION: u32 = 6;
pub const CONTAINER_INFO_VERSION: u32 = 1;

/// Free-space report. The card is read-mostly: nothing is available for
/// writing, and the container ceiling is whatever is currently present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeSpaceInfo {
    pub version: u32,
    pub bytes_available: u32,
    pub containers_available: u32,
    pub max_containers: u32,
}

impl FreeSpaceInfo {
    pub const ENCODED_LEN: usize = 16;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..8].copy_from_slice(&self.bytes_available.to_le_bytes());
        out[8..12].copy_from_slice(&self.containers_available.to_le_bytes());
        out[12..16].copy_from_slice(&self.max_containers.to_le_bytes());
        out
    }
}

impl Default for FreeSpaceInfo {
    fn default() -> Self {
        FreeSpaceInfo {
            version: FREE_SPACE_INFO_VERSION,
            bytes_available: 0,
            containers_available: 0,
            max_containers: 0,
        }
    }
}

/// Card capability switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardCapabilities {
    pub version: u32,
    pub certificate_compression: bool,
    pub key_generation: bool,
}

impl CardCapabilities {
    pub const ENCODED_LEN: usize = 12;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..8].copy_from_slice(&u32::from(self.certificate_compression).to_le_bytes());
        out[8..12].copy_from_slice(&u32::from(self.key_generation).to_le_bytes());
        out
    }
}

impl Default for CardCapabilities {
    fn default() -> Self {
        CardCapabilities {
            version: CAPABILITIES_VERSION,
            certificate_compression: false,
            key_generation: false,
        }
    }
}

/// Key-size range for one algorithm family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySizes {
    pub version: u32,
    pub minimum_bits: u32,
    pub default_bits: u32,
    pub maximum_bits: u32,
    pub incremental_bits: u32,
}

impl KeySizes {
    pub const ENCODED_LEN: usize = 20;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..8].copy_from_slice(&self.minimum_bits.to_le_bytes());
        out[8..12].copy_from_slice(&self.default_bits.to_le_bytes());
        out[12..16].copy_from_slice(&self.maximum_bits.to_le_bytes());
        out[16..20].copy_from_slice(&self.incremental_bits.to_le_bytes());
        out
    }
}

impl Default for KeySizes {
    fn default() -> Self {
        KeySizes {
            version: KEY_SIZES_VERSION,
            minimum_bits: 0,
            default_bits: 0,
            maximum_bits: 0,
            incremental_bits: 0,
        }
    }
}

/// How the host obtains the PIN from the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinType {
    Alphanumeric = 0,
    /// Verified on an external pad; the host never sees the PIN.
    External = 1,
    ChallengeResponse = 2,
    Empty = 3,
}

/// What the PIN protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinPurpose {
    Authentication = 0,
    DigitalSignature = 1,
    Encryption = 2,
    NonRepudiation = 3,
    Administrator = 4,
    PrimaryCard = 5,
    UnblockOnly = 6,
}

/// Host-side caching policy for a PIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCachePolicyType {
    Normal = 0,
    Timed = 1,
    None = 2,
    AlwaysPrompt = 3,
}

/// Caching policy block inside [`PinInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinCachePolicy {
    pub version: u32,
    pub policy: PinCachePolicyType,
    pub policy_info: u32,
}

/// Metadata for the single user PIN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinInfo {
    pub version: u32,
    pub pin_type: PinType,
    pub purpose: PinPurpose,
    pub change_permission: PinSet,
    pub unblock_permission: PinSet,
    pub cache_policy: PinCachePolicy,
    pub flags: u32,
}

impl PinInfo {
    pub const ENCODED_LEN: usize = 36;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..8].copy_from_slice(&(self.pin_type as u32).to_le_bytes());
        out[8..12].copy_from_slice(&(self.purpose as u32).to_le_bytes());
        out[12..16].copy_from_slice(&self.change_permission.bits().to_le_bytes());
        out[16..20].copy_from_slice(&self.unblock_permission.bits().to_le_bytes());
        out[20..24].copy_from_slice(&self.cache_policy.version.to_le_bytes());
        out[24..28].copy_from_slice(&(self.cache_policy.policy as u32).to_le_bytes());
        out[28..32].copy_from_slice(&self.cache_policy.policy_info.to_le_bytes());
        out[32..36].copy_from_slice(&self.flags.to_le_bytes());
        out
    }
}

// ==================== Value synthesis ====================

/// Free space as seen on the live token.
pub fn free_space<S: TokenSession>(session: &S) -> Result<FreeSpaceInfo, Status> {
    Ok(FreeSpaceInfo {
        version: FREE_SPACE_INFO_VERSION,
        bytes_available: 0,
        containers_available: 0,
        max_containers: u32::try_from(containers::count(session)?).map_err(|_| Status::Unexpected)?,
    })
}

/// Static capability switches of this adapter.
pub fn capabilities() -> CardCapabilities {
    CardCapabilities {
        version: CAPABILITIES_VERSION,
        certificate_compression: true,
        key_generation: false,
    }
}

/// Key-size range for `algorithm`. Identifiers outside the known set are
/// parameter errors; identifiers the adapter knows but cannot serve
/// (P-384, P-521) are unsupported features.
pub fn key_sizes(algorithm: u32) -> Result<KeySizes, Status> {
    match algorithm {
        0 | AT_KEYEXCHANGE | AT_SIGNATURE => Ok(KeySizes {
            version: KEY_SIZES_VERSION,
            minimum_bits: 1024,
            default_bits: 2048,
            maximum_bits: 2048,
            incremental_bits: 8,
        }),
        AT_ECDSA_P256 | AT_ECDHE_P256 => Ok(KeySizes {
            version: KEY_SIZES_VERSION,
            minimum_bits: 256,
            default_bits: 256,
            maximum_bits: 256,
            incremental_bits: 0,
        }),
        AT_ECDHE_P384 | AT_ECDHE_P521 | AT_ECDSA_P384 | AT_ECDSA_P521 => {
            Err(Status::UnsupportedFeature)
        }
        _ => Err(Status::InvalidParameter),
    }
}

/// PIN metadata for the role carried in `role_flags`. Only the user role
/// exists on this card.
pub fn pin_info<S: TokenSession>(session: &S, role_flags: u32) -> Result<PinInfo, Status> {
    if role_flags != PinRole::User.id() {
        return Err(Status::InvalidParameter);
    }
    let info = session.info()?;
    Ok(PinInfo {
        version: PIN_INFO_VERSION,
        pin_type: if info.protected_authentication_path {
            PinType::External
        } else {
            PinType::Alphanumeric
        },
        purpose: PinPurpose::PrimaryCard,
        change_permission: PinRole::User.as_set(),
        unblock_permission: PinSet::empty(),
        cache_policy: PinCachePolicy {
            version: PIN_CACHE_POLICY_VERSION,
            policy: PinCachePolicyType::Normal,
            policy_info: 0,
        },
        flags: 0,
    })
}

/// Serial number with trailing blank padding stripped.
pub fn serial_number<S: TokenSession>(session: &S) -> Result<Vec<u8>, Status> {
    let serial = session.info()?.serial_number;
    let mut len = serial.len();
    while len > 0 && serial[len - 1] == b' ' {
        len -= 1;
    }
    Ok(serial[..len].to_vec())
}

/// Roles the session is currently authenticated as.
pub fn authenticated_state<S: TokenSession>(session: &S) -> Result<PinSet, Status> {
    Ok(match session.authenticated_role()? {
        Some(role) => role.as_set(),
        None => PinSet::empty(),
    })
}

// ==================== Catalogue dispatch ====================

fn write_value(dest: &mut [u8], value: &[u8]) -> Result<usize, Status> {
    let required = value.len();
    if dest.len() < required {
        return Err(Status::InsufficientBuffer { required });
    }
    dest[..required].copy_from_slice(value);
    Ok(required)
}

/// Resolve one card-level property into `dest`, returning the number of
/// bytes written. `flags` carries the algorithm identifier for the
/// key-sizes property and the PIN role for the PIN-information property;
/// it must be zero for the free-space property and is ignored by the
/// remaining scalar lookups.
pub fn card_property<S: TokenSession>(
    session: &S,
    name: &str,
    flags: u32,
    dest: &mut [u8],
) -> Result<usize, Status> {
    match name {
        names::FREE_SPACE => {
            if dest.len() < FreeSpaceInfo::ENCODED_LEN {
                return Err(Status::InsufficientBuffer {
                    required: FreeSpaceInfo::ENCODED_LEN,
                });
            }
            if flags != 0 {
                return Err(Status::InvalidParameter);
            }
            write_value(dest, &free_space(session)?.encode())
        }
        names::CAPABILITIES => write_value(dest, &capabilities().encode()),
        names::KEY_SIZES => {
            if dest.len() < KeySizes::ENCODED_LEN {
                return Err(Status::InsufficientBuffer {
                    required: KeySizes::ENCODED_LEN,
                });
            }
            write_value(dest, &key_sizes(flags)?.encode())
        }
        names::READ_ONLY => write_value(dest, &1u32.to_le_bytes()),
        names::CACHE_MODE => write_value(dest, &CACHE_MODE_NO_CACHE.to_le_bytes()),
        names::X509_ENROLLMENT => write_value(dest, &0u32.to_le_bytes()),
        names::CARD_GUID => write_value(dest, &session.info()?.serial_number),
        names::SERIAL_NUMBER => write_value(dest, &serial_number(session)?),
        names::PIN_INFO => {
            if dest.len() < PinInfo::ENCODED_LEN {
                return Err(Status::InsufficientBuffer {
                    required: PinInfo::ENCODED_LEN,
                });
            }
            write_value(dest, &pin_info(session, flags)?.encode())
        }
        names::PIN_LIST => write_value(dest, &PinRole::User.as_set().bits().to_le_bytes()),
        names::AUTHENTICATED_STATE => {
            write_value(dest, &authenticated_state(session)?.bits().to_le_bytes())
        }
        names::PIN_STRENGTH_VERIFY => write_value(dest, &PIN_STRENGTH_PLAINTEXT.to_le_bytes()),
        names::KEY_IMPORT_SUPPORT => write_value(dest, &0u32.to_le_bytes()),
        _ => {
            debug!(property = name, "unknown card property");
            Err(Status::InvalidParameter)
        }
    }
}

/// Public-key blob for container `index`: the public key matching the
/// private key's identifier attribute, rendered by the blob encoder.
pub fn container_public_key_bytes<S: TokenSession>(
    session: &S,
    index: u8,
) -> Result<Vec<u8>, Status> {
    let private_key = containers::at(session, usize::from(index))?.ok_or(Status::NoKeyContainer)?;
    let id = session
        .attribute(private_key, AttributeId::Id)?
        .ok_or(Status::Unexpected)?;
    let public_key = session
        .find_by_id(ObjectClass::PublicKey, &id)?
        .ok_or(Status::Unexpected)?;
    Ok(blob::public_key_bytes(session, public_key)?)
}

/// Container-info property value: a 16-byte header (version, reserved,
/// signature-blob length, key-exchange-blob length) followed by the
/// key-exchange blob. No signature blob is ever present.
pub fn container_info_bytes<S: TokenSession>(session: &S, index: u8) -> Result<Vec<u8>, Status> {
    let key_exchange = container_public_key_bytes(session, index)?;
    let mut out = Vec::with_capacity(16 + key_exchange.len());
    out.extend_from_slice(&CONTAINER_INFO_VERSION.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&u32::try_from(key_exchange.len()).map_err(|_| Status::Unexpected)?.to_le_bytes());
    out.extend_from_slice(&key_exchange);
    Ok(out)
}

/// Resolve one per-container property into `dest`. `flags` must be zero.
pub fn container_property<S: TokenSession>(
    session: &S,
    index: u8,
    name: &str,
    flags: u32,
    dest: &mut [u8],
) -> Result<usize, Status> {
    match name {
        names::CONTAINER_INFO => {
            if flags != 0 {
                return Err(Status::InvalidParameter);
            }
            write_value(dest, &container_info_bytes(session, index)?)
        }
        names::PIN_IDENTIFIER => write_value(dest, &PinRole::User.id().to_le_bytes()),
        _ => {
            debug!(property = name, "unknown container property");
            Err(Status::InvalidParameter)
        }
    }
}
