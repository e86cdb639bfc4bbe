//! Host-visible status vocabulary.
//!
//! Every entry point resolves to either success or exactly one of these
//! statuses. Failures are local and terminal for the call: nothing in this
//! layer retries, and no operation leaves partially written host output
//! behind (the single documented exception is [`Status::InsufficientBuffer`],
//! which reports the exact number of bytes the caller must provide).

use thiserror::Error;

use crate::token::TokenError;

/// Terminal status of a failed adapter call.
///
/// The set is closed: token-transport failures that have no more specific
/// mapping surface as [`Status::Unexpected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Status {
    /// An argument failed validation (null-equivalent, bad flags, unknown
    /// name, malformed structure).
    #[error("invalid parameter")]
    InvalidParameter,

    /// The caller's destination buffer is too small. `required` is the exact
    /// size the property or record needs; the destination was not written.
    #[error("destination buffer too small: {required} bytes required")]
    InsufficientBuffer { required: usize },

    /// No virtual file with the requested name exists in the directory.
    #[error("file not found")]
    FileNotFound,

    /// The directory name is valid but names no known directory.
    #[error("directory not found")]
    DirectoryNotFound,

    /// The container index does not address a key on the token.
    #[error("no key container at the requested index")]
    NoKeyContainer,

    /// A structure or interface version lies outside the supported range.
    /// The offending version field is left untouched.
    #[error("revision mismatch")]
    RevisionMismatch,

    /// The operation exists in the dispatch table but this adapter does not
    /// implement it.
    #[error("unsupported feature")]
    UnsupportedFeature,

    /// The host allocator declined an allocation.
    #[error("out of memory")]
    NoMemory,

    /// A token or transport failure with no more specific mapping.
    #[error("unexpected token failure")]
    Unexpected,

    /// The card handle supplied by the host is not usable.
    #[error("invalid card handle")]
    InvalidHandle,
}

impl From<TokenError> for Status {
    fn from(_: TokenError) -> Self {
        Status::Unexpected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_errors_surface_as_unexpected() {
        let status: Status = TokenError::Transport("reader gone".into()).into();
        assert_eq!(status, Status::Unexpected);
    }

    #[test]
    fn insufficient_buffer_carries_required_size() {
        let status = Status::InsufficientBuffer { required: 86 };
        assert_eq!(status.to_string(), "destination buffer too small: 86 bytes required");
    }
}
