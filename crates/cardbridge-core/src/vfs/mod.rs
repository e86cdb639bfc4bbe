//! The synthesized card file system.
//!
//! Nothing here is stored: every file is rendered from live token state at
//! the moment it is read. The tree has exactly two addressable levels: the
//! root (card identity, cache descriptor, application list) and the single
//! application directory (container map plus one certificate file per
//! container). Names are validated before any lookup happens.

use tracing::{debug, trace};

use crate::containers;
use crate::error::Status;
use crate::token::{AttributeId, ObjectClass, TokenSession};

/// Root file holding the raw 16-byte token serial number.
pub const CARD_IDENTIFIER_FILE: &str = "cardid";
/// Root file holding the cache descriptor.
pub const CACHE_FILE: &str = "cardcf";
/// Root file listing the card's applications.
pub const APPLICATIONS_FILE: &str = "cardapps";
/// The one addressable subdirectory.
pub const APPLICATION_DIRECTORY: &str = "mscp";
/// Container-map file inside the application directory.
pub const CONTAINER_MAP_FILE: &str = "cmapfile";
/// Prefix of per-container certificate files (`kxc` + zero-padded index).
pub const KEY_EXCHANGE_CERT_PREFIX: &str = "kxc";

/// Content of the applications file: the application name in a fixed
/// 8-byte field.
pub const APPLICATIONS_CONTENT: [u8; 8] = *b"mscp\0\0\0\0";

/// Size of the all-zero cache descriptor: a version byte, a PIN freshness
/// byte, and two 16-bit freshness counters. All zero means "no valid
/// cache", which forces the host to re-read instead of trusting counters.
pub const CACHE_DESCRIPTOR_LEN: usize = 6;

/// Longest permitted file or directory name.
pub const MAX_NAME_LEN: usize = 8;

/// Access rule attached to every virtual file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessCondition {
    #[default]
    Invalid = 0,
    EveryoneReadUserWrite = 1,
    UserWriteExecute = 2,
    EveryoneReadAdminWrite = 3,
}

/// Validate a file or directory name: 1 to 8 printable ASCII characters.
pub fn check_name(name: &str) -> Result<(), Status> {
    let len = name.len();
    if len < 1 || len > MAX_NAME_LEN {
        return Err(Status::InvalidParameter);
    }
    if !name.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        return Err(Status::InvalidParameter);
    }
    Ok(())
}

/// The two addressable directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directory {
    Root,
    Application,
}

/// Resolve an optional directory name: `None` is the root, `mscp` the
/// application directory, any other printable name is unknown.
pub fn resolve_directory(directory: Option<&str>) -> Result<Directory, Status> {
    match directory {
        None => Ok(Directory::Root),
        Some(name) => {
            check_name(name)?;
            if name == APPLICATION_DIRECTORY {
                Ok(Directory::Application)
            } else {
                debug!(directory = name, "unknown directory");
                Err(Status::DirectoryNotFound)
            }
        }
    }
}

/// Synthesize the content of one virtual file.
pub fn read_file<S: TokenSession>(
    session: &S,
    directory: Option<&str>,
    file: &str,
) -> Result<Vec<u8>, Status> {
    let dir = resolve_directory(directory)?;
    check_name(file)?;
    trace!(?dir, file, "reading virtual file");

    match dir {
        Directory::Root => match file {
            CARD_IDENTIFIER_FILE => Ok(session.info()?.serial_number.to_vec()),
            CACHE_FILE => Ok(vec![0u8; CACHE_DESCRIPTOR_LEN]),
            APPLICATIONS_FILE => Ok(APPLICATIONS_CONTENT.to_vec()),
            _ => Err(Status::FileNotFound),
        },
        Directory::Application => {
            if file == CONTAINER_MAP_FILE {
                containers::encode_map(session)
            } else if let Some(index) = parse_certificate_name(file) {
                read_certificate(session, index)
            } else {
                Err(Status::FileNotFound)
            }
        }
    }
}

/// Index encoded in a `kxcNN` name, or `None` when the name is not a
/// certificate file.
fn parse_certificate_name(file: &str) -> Option<usize> {
    let digits = file.strip_prefix(KEY_EXCHANGE_CERT_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// DER bytes of the certificate paired with container `index`.
fn read_certificate<S: TokenSession>(session: &S, index: usize) -> Result<Vec<u8>, Status> {
    let private_key = containers::at(session, index)?.ok_or(Status::FileNotFound)?;
    let id = session
        .attribute(private_key, AttributeId::Id)?
        .ok_or(Status::Unexpected)?;
    trace!(index, id = %hex::encode(&id), "certificate lookup");
    let certificate = session
        .find_by_id(ObjectClass::Certificate, &id)?
        .ok_or(Status::FileNotFound)?;
    session
        .attribute(certificate, AttributeId::Value)?
        .ok_or(Status::Unexpected)
}

/// Names in `directory` as a NUL-separated, double-NUL-terminated
/// multistring. The root list is fixed; the application list grows one
/// `kxcNN` entry per live container.
pub fn enum_files<S: TokenSession>(
    session: &S,
    directory: Option<&str>,
) -> Result<Vec<u8>, Status> {
    match resolve_directory(directory)? {
        Directory::Root => {
            let mut out = Vec::new();
            for name in [CARD_IDENTIFIER_FILE, CACHE_FILE, APPLICATIONS_FILE] {
                out.extend_from_slice(name.as_bytes());
                out.push(0);
            }
            out.push(0);
            Ok(out)
        }
        Directory::Application => {
            let count = containers::count(session)?;
            let mut out = Vec::new();
            out.extend_from_slice(CONTAINER_MAP_FILE.as_bytes());
            out.push(0);
            for index in 0..count {
                out.extend_from_slice(format!("{KEY_EXCHANGE_CERT_PREFIX}{index:02}").as_bytes());
                out.push(0);
            }
            out.push(0);
            Ok(out)
        }
    }
}

/// Names in a multistring, for callers that want them split.
pub fn split_multistring(multistring: &[u8]) -> Vec<String> {
    multistring
        .split(|&b| b == 0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect()
}
