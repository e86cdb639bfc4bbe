//! Public-key blob encoders.
//!
//! The host framework consumes public keys in two fixed binary layouts:
//! a legacy RSA layout (blob header, RSA header, little-endian modulus)
//! and a P-256 layout (magic, coordinate length, raw X||Y). Both are
//! reproduced byte for byte; nothing else is negotiable. Only the P-256
//! curve is supported on the elliptic side.

use thiserror::Error;

use crate::error::Status;
use crate::host::{HostAlloc, HostBuf};
use crate::token::{AttributeId, ObjectId, TokenError, TokenSession};

/// Combined size of the blob header (8 bytes) and RSA key header (12
/// bytes) preceding the modulus.
pub const RSA_HEADER_LEN: usize = 20;

/// Header preceding the coordinates in an elliptic-curve blob.
pub const ECC_HEADER_LEN: usize = 8;

/// Raw coordinate bytes (X || Y) of an uncompressed P-256 point.
pub const ECC_COORDINATES_LEN: usize = 64;

/// Total size of an uncompressed point attribute: DER octet-string header,
/// uncompressed-point tag, 64 coordinate bytes.
pub const EC_POINT_ATTRIBUTE_LEN: usize = 67;

const BLOB_TYPE_PUBLIC_KEY: u8 = 0x06;
const BLOB_VERSION: u8 = 0x02;
const ALG_RSA_KEY_EXCHANGE: u32 = 0x0000a400;
const RSA_MAGIC: u32 = 0x31415352; // "RSA1"
const ECDH_P256_MAGIC: u32 = 0x314b4345; // "ECK1"

/// DER encoding of the P-256 domain parameter OID, the one curve the host
/// layout supports.
pub const P256_PARAMS_DER: [u8; 10] = [0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];

/// Fixed RSA public exponent carried in the blob.
pub const RSA_PUBLIC_EXPONENT: u32 = 65537;

/// Failures while rendering a public key into the host layouts.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The public key object lacks a required attribute.
    #[error("public key is missing the {0:?} attribute")]
    MissingAttribute(AttributeId),

    /// The curve parameters are not the P-256 domain OID.
    #[error("unsupported curve parameters")]
    UnsupportedCurve,

    /// The point attribute is not a 67-byte uncompressed encoding.
    #[error("malformed elliptic-curve point")]
    MalformedPoint,

    /// The host allocator declined the blob allocation.
    #[error("out of memory")]
    NoMemory,

    #[error(transparent)]
    Token(#[from] TokenError),
}

impl From<BlobError> for Status {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NoMemory => Status::NoMemory,
            _ => Status::Unexpected,
        }
    }
}

/// Encode a big-endian RSA modulus into the legacy public-key layout.
///
/// Layout: type/version/reserved/algorithm header, then magic, bit length
/// (8·L) and exponent 65537, then the modulus reversed into little-endian
/// byte order.
pub fn rsa_public_key_bytes(modulus: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(RSA_HEADER_LEN + modulus.len());
    out.push(BLOB_TYPE_PUBLIC_KEY);
    out.push(BLOB_VERSION);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&ALG_RSA_KEY_EXCHANGE.to_le_bytes());
    out.extend_from_slice(&RSA_MAGIC.to_le_bytes());
    let bit_len = u32::try_from(modulus.len()).unwrap_or(0) << 3;
    out.extend_from_slice(&bit_len.to_le_bytes());
    out.extend_from_slice(&RSA_PUBLIC_EXPONENT.to_le_bytes());
    out.extend(modulus.iter().rev());
    out
}

/// Encode P-256 curve parameters and an uncompressed point attribute into
/// the elliptic public-key layout.
pub fn ec_public_key_bytes(params: &[u8], point: &[u8]) -> Result<Vec<u8>, BlobError> {
    if params != P256_PARAMS_DER.as_slice() {
        return Err(BlobError::UnsupportedCurve);
    }
    if point.len() != EC_POINT_ATTRIBUTE_LEN || point[2] != 0x04 {
        return Err(BlobError::MalformedPoint);
    }

    let mut out = Vec::with_capacity(ECC_HEADER_LEN + ECC_COORDINATES_LEN);
    out.extend_from_slice(&ECDH_P256_MAGIC.to_le_bytes());
    out.extend_from_slice(&(ECC_COORDINATES_LEN as u32 / 2).to_le_bytes());
    out.extend_from_slice(&point[3..]);
    Ok(out)
}

/// Render `public_key` into whichever layout its attributes call for: RSA
/// when a modulus attribute is present, P-256 otherwise.
pub fn public_key_bytes<S: TokenSession>(
    session: &S,
    public_key: ObjectId,
) -> Result<Vec<u8>, BlobError> {
    if let Some(modulus) = session.attribute(public_key, AttributeId::Modulus)? {
        return Ok(rsa_public_key_bytes(&modulus));
    }

    let params = session
        .attribute(public_key, AttributeId::EcParams)?
        .ok_or(BlobError::MissingAttribute(AttributeId::EcParams))?;
    let point = session
        .attribute(public_key, AttributeId::EcPoint)?
        .ok_or(BlobError::MissingAttribute(AttributeId::EcPoint))?;
    ec_public_key_bytes(&params, &point)
}

/// Like [`public_key_bytes`] but placing the blob in a host-owned buffer.
pub fn encode_public_key<S: TokenSession>(
    alloc: &HostAlloc,
    session: &S,
    public_key: ObjectId,
) -> Result<HostBuf, BlobError> {
    let bytes = public_key_bytes(session, public_key)?;
    alloc.alloc_copy(&bytes).map_err(|_| BlobError::NoMemory)
}
