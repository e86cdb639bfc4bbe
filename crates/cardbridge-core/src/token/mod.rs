//! Token collaborator contract.
//!
//! The adapter binds to exactly one token session and only ever reads from
//! it: ordered enumeration of private-key objects, raw attribute lookup,
//! class-plus-identifier matching, and a handful of token-wide facts
//! (serial number, authentication-path capability, authenticated role).
//! Everything behind these traits (APDU transport, PIN verification,
//! cryptographic execution) belongs to the collaborating token stack.

pub mod soft;

use thiserror::Error;

pub use soft::{SoftConnector, SoftObject, SoftToken};

/// Opaque handle to one object inside a token session's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u64);

/// Object classes the adapter queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    PrivateKey,
    PublicKey,
    Certificate,
}

/// Attributes the adapter reads from token objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AttributeId {
    /// Opaque identifier bytes pairing a private key with its public key
    /// and certificate.
    Id,
    /// RSA modulus, big-endian.
    Modulus,
    /// DER-encoded elliptic-curve domain parameters.
    EcParams,
    /// DER OCTET STRING holding an uncompressed elliptic-curve point.
    EcPoint,
    /// Raw value bytes (DER certificate for certificate objects).
    Value,
}

/// Byte length of a token serial number.
pub const SERIAL_NUMBER_LEN: usize = 16;

/// Token-wide facts exposed by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    /// Fixed-width serial number, blank-padded on the right.
    pub serial_number: [u8; SERIAL_NUMBER_LEN],
    /// True when the token verifies PINs through an external pad rather
    /// than accepting them from the host.
    pub protected_authentication_path: bool,
}

/// PIN roles. This adapter models the single user role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinRole {
    User,
}

impl PinRole {
    /// Numeric identifier of the role in the host's PIN namespace.
    pub const fn id(self) -> u32 {
        match self {
            PinRole::User => 1,
        }
    }
}

/// Failures reported by the token collaborator.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The transport to the card failed.
    #[error("token transport failure: {0}")]
    Transport(String),

    /// The session is no longer usable (card removed, session closed).
    #[error("token session closed")]
    SessionClosed,
}

/// One live, read-only session against a token.
///
/// Enumeration order must be stable for an unchanged object store; every
/// call reflects the store as it is at that moment.
pub trait TokenSession {
    /// Token-wide facts, re-read from the live token.
    fn info(&self) -> Result<TokenInfo, TokenError>;

    /// Handles of all private-key objects, in enumeration order.
    fn private_keys(&self) -> Result<Vec<ObjectId>, TokenError>;

    /// Raw bytes of one attribute, or `None` when the object does not
    /// carry it.
    fn attribute(
        &self,
        object: ObjectId,
        attribute: AttributeId,
    ) -> Result<Option<Vec<u8>>, TokenError>;

    /// Key length in bits of a key object.
    fn key_size_bits(&self, object: ObjectId) -> Result<u32, TokenError>;

    /// First object of `class` whose identifier attribute equals `id`.
    fn find_by_id(
        &self,
        class: ObjectClass,
        id: &[u8],
    ) -> Result<Option<ObjectId>, TokenError>;

    /// Role the session is currently authenticated as, if any.
    fn authenticated_role(&self) -> Result<Option<PinRole>, TokenError>;

    /// Release the session. The default drops it.
    fn close(self)
    where
        Self: Sized,
    {
    }
}

/// Identity of the card connection a session binds to.
#[derive(Debug, Clone)]
pub struct CardBinding {
    pub card_handle: u64,
    pub transport_handle: u64,
    pub atr: Vec<u8>,
}

/// Opens token sessions for validated card bindings.
pub trait TokenConnector {
    type Session: TokenSession;

    fn open(&self, binding: CardBinding) -> Result<Self::Session, TokenError>;
}
